use arcanum::shared::serde_ext::{lookup_path, merge_shallow, parse_via_string};
use serde::{Deserialize, Deserializer};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
struct NonEmpty(String);

impl NonEmpty {
    fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("must not be empty".to_string());
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl<'de> Deserialize<'de> for NonEmpty {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_via_string(deserializer, "non-empty value", Self::parse)
    }
}

#[test]
fn shared_serde_ext_module_parses_typed_value_from_string() {
    let parsed: NonEmpty = serde_yaml::from_str("\"  hello  \"").expect("parse non-empty");
    assert_eq!(parsed, NonEmpty("hello".to_string()));

    let err = serde_yaml::from_str::<NonEmpty>("\"   \"").expect_err("empty should fail");
    assert!(err.to_string().contains("invalid non-empty value"));
    assert!(err.to_string().contains("must not be empty"));
}

#[test]
fn shared_serde_ext_module_reads_paths_and_merges_fields() {
    let doc = json!({ "tasks": [{ "id": "t1" }], "owner": { "name": "ada" } });
    assert_eq!(lookup_path(&doc, "tasks.0.id"), Some(&json!("t1")));
    assert_eq!(lookup_path(&doc, "owner.email"), None);

    let mut target = json!({ "a": 1, "b": { "keep": true } })
        .as_object()
        .cloned()
        .expect("object");
    let patch = json!({ "b": 2, "c": 3 }).as_object().cloned().expect("object");
    merge_shallow(&mut target, &patch);
    assert_eq!(serde_json::Value::Object(target), json!({ "a": 1, "b": 2, "c": 3 }));
}

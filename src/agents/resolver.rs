use super::AgentError;
use crate::protocol::{
    AgentDefinition, ModelConfig, ModelPolicyKind, PromptMode, ProtocolDefinition,
    ToolsPolicyKind,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A built-in agent supplied by the host tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseAgent {
    pub id: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,
    pub tools: Vec<String>,
}

impl BaseAgent {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            model: None,
            tools: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseAgentCatalog {
    agents: BTreeMap<String, BaseAgent>,
}

impl BaseAgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, agent: BaseAgent) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn with(mut self, agent: BaseAgent) -> Self {
        self.insert(agent);
        self
    }

    pub fn get(&self, id: &str) -> Option<&BaseAgent> {
        self.agents.get(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAgent {
    pub id: String,
    pub description: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,
    pub tools: Vec<String>,
    /// `(rule id, rule document)` in the agent's reference order.
    pub rules: Vec<(String, Value)>,
}

pub fn resolve(
    agent: &AgentDefinition,
    catalog: &BaseAgentCatalog,
    rules: &BTreeMap<String, Value>,
) -> Result<ResolvedAgent, AgentError> {
    let base = match agent.base.as_deref() {
        Some(base_id) => Some(catalog.get(base_id).ok_or_else(|| {
            AgentError::UnknownBaseAgent {
                agent: agent.id.clone(),
                base: base_id.to_string(),
            }
        })?),
        None => None,
    };

    let own_prompt = agent.prompt.as_deref();
    let prompt = match (base, own_prompt) {
        (None, Some(own)) => own.to_string(),
        (None, None) => {
            return Err(AgentError::MissingPrompt {
                agent: agent.id.clone(),
            })
        }
        (Some(base), None) => base.prompt.clone(),
        (Some(base), Some(own)) => merge_prompt(agent.mode, &base.prompt, own),
    };

    let model = match agent.model.policy {
        ModelPolicyKind::Override => Some(agent.model.config.clone().ok_or_else(|| {
            AgentError::MissingModelConfig {
                agent: agent.id.clone(),
            }
        })?),
        ModelPolicyKind::Inherit => base.and_then(|base| base.model.clone()),
    };

    let base_tools = base.map(|base| base.tools.as_slice()).unwrap_or_default();
    let tools = match (base, agent.tools.policy) {
        (None, _) | (Some(_), ToolsPolicyKind::Replace) => dedup(agent.tools.list.iter()),
        (Some(_), ToolsPolicyKind::Inherit) => base_tools.to_vec(),
        (Some(_), ToolsPolicyKind::Add) => dedup(base_tools.iter().chain(&agent.tools.list)),
    };

    let rules = agent
        .rules
        .iter()
        .map(|rule_id| {
            rules
                .get(rule_id)
                .map(|rule| (rule_id.clone(), rule.clone()))
                .ok_or_else(|| AgentError::UnknownRule {
                    agent: agent.id.clone(),
                    rule: rule_id.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ResolvedAgent {
        id: agent.id.clone(),
        description: agent.description.clone(),
        prompt,
        model,
        tools,
        rules,
    })
}

/// Resolves every agent declared by the protocol, keyed by agent id.
pub fn resolve_all(
    protocol: &ProtocolDefinition,
    catalog: &BaseAgentCatalog,
) -> Result<BTreeMap<String, ResolvedAgent>, AgentError> {
    protocol
        .agents
        .iter()
        .map(|(id, agent)| Ok((id.clone(), resolve(agent, catalog, &protocol.rules)?)))
        .collect()
}

fn dedup<'a>(tools: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tool in tools {
        if !out.contains(tool) {
            out.push(tool.clone());
        }
    }
    out
}

fn merge_prompt(mode: PromptMode, base: &str, own: &str) -> String {
    match mode {
        PromptMode::Append => format!("{base}\n\n{own}"),
        PromptMode::Prepend => format!("{own}\n\n{base}"),
        PromptMode::Replace => own.to_string(),
        PromptMode::Patch => patch_sections(base, own),
    }
}

struct Section {
    heading: Option<String>,
    body: String,
}

/// Splits markdown into level-2 sections. Text before the first `## ` heading is a
/// headless preamble.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = vec![Section {
        heading: None,
        body: String::new(),
    }];
    for line in text.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            sections.push(Section {
                heading: Some(heading.trim().to_string()),
                body: String::new(),
            });
        }
        if let Some(current) = sections.last_mut() {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }
    sections
}

fn patch_sections(base: &str, own: &str) -> String {
    let mut merged = split_sections(base);
    for section in split_sections(own) {
        let Some(heading) = section.heading.as_deref() else {
            continue;
        };
        let position = merged
            .iter()
            .position(|existing| existing.heading.as_deref() == Some(heading));
        match position {
            Some(index) => merged[index].body = section.body,
            None => merged.push(section),
        }
    }
    merged
        .iter()
        .filter(|section| !section.body.trim().is_empty())
        .map(|section| section.body.trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_replaces_matching_sections_and_appends_new_ones() {
        let base = "You are a coder.\n\n## Style\nBe terse.\n\n## Tools\nUse bash.\n";
        let own = "## Style\nBe thorough.\n\n## Review\nCheck tests.\n";
        let merged = patch_sections(base, own);
        assert_eq!(
            merged,
            "You are a coder.\n\n## Style\nBe thorough.\n\n## Tools\nUse bash.\n\n## Review\nCheck tests."
        );
    }

    #[test]
    fn patch_ignores_own_preamble() {
        let merged = patch_sections("## A\none\n", "ignored text\n## A\ntwo\n");
        assert_eq!(merged, "## A\ntwo");
    }

    #[test]
    fn prompt_modes_join_with_blank_line() {
        assert_eq!(merge_prompt(PromptMode::Append, "B", "O"), "B\n\nO");
        assert_eq!(merge_prompt(PromptMode::Prepend, "B", "O"), "O\n\nB");
        assert_eq!(merge_prompt(PromptMode::Replace, "B", "O"), "O");
    }
}

use super::error::ProtocolError;
use super::paths::{is_document_file, ProtocolPaths};
use super::schema::{AgentDefinition, ProtocolDefinition, ProtocolIndex, WorkflowDefinition};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Loads the protocol rooted at `<project_dir>/.opencode/protocol`.
pub fn load_protocol(project_dir: &Path) -> Result<ProtocolDefinition, ProtocolError> {
    load_protocol_from(&ProtocolPaths::for_project(project_dir))
}

/// Loads every document of a protocol directory. Any malformed document fails the
/// whole load.
pub fn load_protocol_from(paths: &ProtocolPaths) -> Result<ProtocolDefinition, ProtocolError> {
    let index_path = paths
        .index_file()
        .ok_or_else(|| ProtocolError::ProtocolNotFound {
            path: paths.protocol_dir.display().to_string(),
        })?;
    let index: ProtocolIndex = read_document(&index_path)?;
    index
        .validate()
        .map_err(|reason| ProtocolError::schema(display(&index_path), reason))?;

    let mut workflows = BTreeMap::new();
    for path in list_documents(&paths.workflows_dir())? {
        let mut workflow: WorkflowDefinition = read_document(&path)?;
        if workflow.id.is_empty() {
            workflow.id = file_stem(&path);
        }
        workflow
            .validate()
            .map_err(|reason| ProtocolError::schema(display(&path), reason))?;
        if workflows.contains_key(&workflow.id) {
            return Err(ProtocolError::schema(
                display(&path),
                format!("workflow id `{}` must be unique", workflow.id),
            ));
        }
        workflows.insert(workflow.id.clone(), workflow);
    }

    let mut rules = BTreeMap::new();
    for path in list_documents(&paths.rules_dir())? {
        let content: Value = read_document(&path)?;
        rules.insert(file_stem(&path), content);
    }

    let mut agents = BTreeMap::new();
    for path in list_documents(&paths.agents_dir())? {
        let mut agent: AgentDefinition = read_document(&path)?;
        if agent.id.is_empty() {
            agent.id = file_stem(&path);
        }
        agent
            .validate()
            .map_err(|reason| ProtocolError::schema(display(&path), reason))?;
        for rule in &agent.rules {
            if !rules.contains_key(rule) {
                return Err(ProtocolError::schema(
                    display(&path),
                    format!("agent `{}` references unknown rule `{rule}`", agent.id),
                ));
            }
        }
        if agents.contains_key(&agent.id) {
            return Err(ProtocolError::schema(
                display(&path),
                format!("agent id `{}` must be unique", agent.id),
            ));
        }
        agents.insert(agent.id.clone(), agent);
    }

    let protocol = ProtocolDefinition {
        root: paths.protocol_dir.clone(),
        index,
        workflows,
        agents,
        rules,
    };
    validate_references(&protocol, paths)?;
    Ok(protocol)
}

fn validate_references(
    protocol: &ProtocolDefinition,
    paths: &ProtocolPaths,
) -> Result<(), ProtocolError> {
    if protocol.default_workflow().is_none() {
        return Err(ProtocolError::UnknownDefaultWorkflow {
            workflow: protocol.index.default_workflow.clone(),
            available: protocol.workflow_ids(),
        });
    }

    for workflow in protocol.workflows.values() {
        for step in &workflow.steps {
            let Some(invoke) = step.invoke.as_ref() else {
                continue;
            };
            if protocol.workflow(&invoke.workflow).is_none() {
                return Err(ProtocolError::schema(
                    display(&paths.workflows_dir()),
                    format!(
                        "workflow `{}` step `{}` invokes unknown workflow `{}`",
                        workflow.id, step.id, invoke.workflow
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, ProtocolError> {
    let raw = fs::read_to_string(path).map_err(|source| ProtocolError::Read {
        path: display(path),
        source,
    })?;
    let document: serde_yaml::Value =
        serde_yaml::from_str(&raw).map_err(|source| ProtocolError::Parse {
            path: display(path),
            source,
        })?;
    // Syntax is already checked; shape mismatches are schema failures.
    serde_yaml::from_value(document)
        .map_err(|err| ProtocolError::schema(display(path), err.to_string()))
}

/// Document files of `dir`, sorted by name. A missing directory is empty.
fn list_documents(dir: &Path) -> Result<Vec<PathBuf>, ProtocolError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) if source.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ProtocolError::Read {
                path: display(dir),
                source,
            })
        }
    };

    let mut documents = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ProtocolError::Read {
            path: display(dir),
            source,
        })?;
        let path = entry.path();
        if is_document_file(&path) {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

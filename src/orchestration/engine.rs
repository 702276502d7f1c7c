use crate::config::EngineOptions;
use crate::gate::GateEvaluator;
use crate::orchestration::error::EngineError;
use crate::orchestration::fsm::FsmExecutor;
use crate::orchestration::state::{
    ExecutionStatus, ProtocolState, CHILD_ABORTED_FIELD, NESTED_RESULT_FIELD,
};
use crate::orchestration::state_store::StateManager;
use crate::orchestration::transition_log::{TransitionKind, TransitionLog, TransitionLogEntry};
use crate::protocol::{
    load_protocol_from, InvokeDefinition, ProtocolDefinition, ProtocolPaths,
};
use crate::shared::logging::EngineLogger;
use crate::shared::serde_ext::lookup_path;
use crate::snippets::{
    HookMeta, HookResult, HookRunner, ScriptHookRunner, SnippetExecutor, SnippetRegistry,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Uninitialized,
    Loading,
    Ready,
    Invoking,
    Failed,
}

/// What `Engine::status` reports: the engine phase until the engine is ready, the
/// persisted execution status afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Uninitialized,
    Loading,
    Invoking,
    Running,
    Waiting,
    Halted,
    Completed,
    Failed,
}

impl LifecycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Invoking => "invoking",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Halted => "halted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl From<ExecutionStatus> for LifecycleStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Running => Self::Running,
            ExecutionStatus::Waiting => Self::Waiting,
            ExecutionStatus::Halted => Self::Halted,
            ExecutionStatus::Completed => Self::Completed,
            ExecutionStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub status: LifecycleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionResult {
    pub success: bool,
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransitionResult {
    pub fn ok(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            success: true,
            from: from.into(),
            to: to.into(),
            error: None,
        }
    }

    pub fn failed(from: impl Into<String>, to: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            from: from.into(),
            to: to.into(),
            error: Some(error.into()),
        }
    }
}

/// Drives one project's protocol. The persisted state document is the only source
/// of truth; every operation re-reads it before acting.
pub struct Engine {
    paths: ProtocolPaths,
    options: EngineOptions,
    logger: EngineLogger,
    registry: SnippetRegistry,
    phase: EnginePhase,
    last_error: Option<String>,
    runtime: Option<Runtime>,
}

impl Engine {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self::with_options(project_dir, EngineOptions::default())
    }

    pub fn with_options(project_dir: impl Into<PathBuf>, options: EngineOptions) -> Self {
        let project_dir = project_dir.into();
        let paths = options.paths_for(&project_dir);
        let logger = if options.diagnostics {
            EngineLogger::for_state_dir(&paths.state_dir)
        } else {
            EngineLogger::disabled()
        };
        Self {
            paths,
            options,
            logger,
            registry: SnippetRegistry::new(),
            phase: EnginePhase::Uninitialized,
            last_error: None,
            runtime: None,
        }
    }

    /// In-process hooks take precedence over scripts in `snippets/` with the same id.
    /// Takes effect on the next `initialize`.
    pub fn with_snippets(mut self, registry: SnippetRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn register_snippet<F>(&mut self, hook_id: impl Into<String>, hook: F)
    where
        F: Fn(&mut crate::snippets::HookContext<'_>) -> Result<HookResult, String>
            + Send
            + Sync
            + 'static,
    {
        self.registry.register(hook_id, hook);
    }

    pub fn paths(&self) -> &ProtocolPaths {
        &self.paths
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn initialize(&mut self) -> Result<(), EngineError> {
        self.phase = EnginePhase::Loading;
        self.last_error = None;
        self.runtime = None;
        match self.build_runtime() {
            Ok(runtime) => {
                self.runtime = Some(runtime);
                self.phase = EnginePhase::Ready;
                Ok(())
            }
            Err(err) => {
                self.phase = EnginePhase::Failed;
                self.last_error = Some(err.to_string());
                self.logger.error("initialize_failed", &err.to_string());
                Err(err)
            }
        }
    }

    /// Advances the protocol by at most one transition, invoke or return. `None`
    /// means nothing moved: the workflow is waiting, halted or completed.
    pub fn step(&mut self) -> Result<Option<TransitionResult>, EngineError> {
        let runtime = self.runtime.as_mut().ok_or(EngineError::NotInitialized)?;
        let outcome = runtime.step(&mut self.phase);
        if self.phase == EnginePhase::Invoking {
            self.phase = EnginePhase::Ready;
        }
        self.note_fatal(outcome)
    }

    /// Moves to `to` on operator request. A `manual` gate on the transition counts as
    /// approved; every other gate must still pass.
    pub fn request_transition(&mut self, to: &str) -> Result<TransitionResult, EngineError> {
        let runtime = self.runtime.as_mut().ok_or(EngineError::NotInitialized)?;
        let outcome = runtime.request_transition(to);
        self.note_fatal(outcome)
    }

    pub fn state(&self) -> Result<Option<ProtocolState>, EngineError> {
        match &self.runtime {
            Some(runtime) => runtime.states.load(),
            None => Ok(None),
        }
    }

    pub fn status(&self) -> EngineStatus {
        let idle = |status: LifecycleStatus| EngineStatus {
            status,
            workflow: None,
            step: None,
            depth: 0,
            error: self.last_error.clone(),
        };
        match self.phase {
            EnginePhase::Uninitialized => return idle(LifecycleStatus::Uninitialized),
            EnginePhase::Loading => return idle(LifecycleStatus::Loading),
            EnginePhase::Failed if self.runtime.is_none() => {
                return idle(LifecycleStatus::Failed)
            }
            _ => {}
        }
        match self.state() {
            Ok(Some(state)) => EngineStatus {
                status: match self.phase {
                    EnginePhase::Invoking => LifecycleStatus::Invoking,
                    EnginePhase::Failed => LifecycleStatus::Failed,
                    _ => state.status.into(),
                },
                workflow: Some(state.workflow),
                step: Some(state.step),
                depth: state.depth,
                error: self.last_error.clone(),
            },
            Ok(None) => idle(LifecycleStatus::Failed),
            Err(err) => EngineStatus {
                error: Some(err.to_string()),
                ..idle(LifecycleStatus::Failed)
            },
        }
    }

    pub fn protocol(&self) -> Option<&ProtocolDefinition> {
        self.runtime.as_ref().map(|runtime| &runtime.protocol)
    }

    /// Merges caller fields into the state. Engine-owned fields are rejected.
    pub fn update_state(&mut self, patch: Map<String, Value>) -> Result<ProtocolState, EngineError> {
        let runtime = self.runtime.as_mut().ok_or(EngineError::NotInitialized)?;
        runtime.states.update(&patch)
    }

    /// Targets of the transitions whose gates currently pass, in the order `step`
    /// would consider them.
    pub fn available_transitions(&mut self) -> Result<Vec<String>, EngineError> {
        let runtime = self.runtime.as_mut().ok_or(EngineError::NotInitialized)?;
        let state = runtime.sync()?;
        let value = state.to_value();
        Ok(runtime
            .fsm
            .available_transitions(&value, &runtime.gates)
            .into_iter()
            .map(|transition| transition.to.clone())
            .collect())
    }

    pub fn halt(&mut self) -> Result<ProtocolState, EngineError> {
        let runtime = self.runtime.as_mut().ok_or(EngineError::NotInitialized)?;
        runtime.states.modify(|state| {
            if !state.status.can_halt() {
                return Err(EngineError::CannotHalt {
                    status: state.status,
                });
            }
            state.status = ExecutionStatus::Halted;
            Ok(())
        })
    }

    pub fn resume(&mut self) -> Result<ProtocolState, EngineError> {
        let runtime = self.runtime.as_mut().ok_or(EngineError::NotInitialized)?;
        runtime.states.modify(|state| {
            if state.status != ExecutionStatus::Halted {
                return Err(EngineError::NotHalted {
                    status: state.status,
                });
            }
            state.status = ExecutionStatus::Running;
            Ok(())
        })
    }

    pub fn depth(&self) -> Result<usize, EngineError> {
        Ok(self.state()?.map(|state| state.depth).unwrap_or(0))
    }

    pub fn is_nested(&self) -> Result<bool, EngineError> {
        Ok(self.depth()? > 0)
    }

    /// Discards the running child and returns to its parent with
    /// `child_aborted: true` merged into the parent state.
    pub fn abort_child(&mut self) -> Result<TransitionResult, EngineError> {
        let runtime = self.runtime.as_mut().ok_or(EngineError::NotInitialized)?;
        let outcome = runtime.return_to_parent(true);
        self.note_fatal(outcome)
    }

    pub fn transition_history(&self) -> Result<Vec<TransitionLogEntry>, EngineError> {
        let runtime = self.runtime.as_ref().ok_or(EngineError::NotInitialized)?;
        runtime.history.entries()
    }

    fn build_runtime(&self) -> Result<Runtime, EngineError> {
        let protocol = load_protocol_from(&self.paths)?;
        let states = StateManager::new(&self.paths.state_dir, protocol.state_format())
            .with_max_depth(self.options.max_nesting_depth);
        let history = TransitionLog::new(
            self.paths.transition_log_path(),
            self.options.transition_log_cap,
        );
        let gates = GateEvaluator::new(&self.paths.project_dir, self.logger.clone());
        let registry: Arc<dyn HookRunner> = Arc::new(self.registry.clone());
        let scripts: Arc<dyn HookRunner> =
            Arc::new(ScriptHookRunner::new(self.paths.snippets_dir()));
        let snippets = SnippetExecutor::new(&self.paths.project_dir, self.logger.clone())
            .with_runner(registry)
            .with_runner(scripts);

        let (state, fresh) = match states.load()? {
            Some(state) => (state, false),
            None => {
                let workflow = protocol.default_workflow().ok_or_else(|| {
                    EngineError::UnknownWorkflow {
                        workflow: protocol.index.default_workflow.clone(),
                    }
                })?;
                let initial = workflow.initial_step().ok_or_else(|| EngineError::UnknownStep {
                    workflow: workflow.id.clone(),
                    step: "<initial>".to_string(),
                })?;
                (states.initialize(&workflow.id, &initial.id)?, true)
            }
        };
        let fsm = bind_executor(&protocol, &state.workflow, &state.step)?;
        let runtime = Runtime {
            protocol,
            states,
            history,
            snippets,
            gates,
            fsm,
            logger: self.logger.clone(),
        };
        if fresh {
            runtime.run_on_enter(&state.step)?;
            self.logger.append(
                "info",
                "state_initialized",
                &format!("initialized `{}` at `{}`", state.workflow, state.step),
                None,
            );
        }
        Ok(runtime)
    }

    fn note_fatal<T>(&mut self, outcome: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(err) = &outcome {
            if matches!(err, EngineError::StateConsistency { .. }) {
                self.phase = EnginePhase::Failed;
                self.last_error = Some(err.to_string());
            }
        }
        outcome
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("paths", &self.paths)
            .field("phase", &self.phase)
            .field("last_error", &self.last_error)
            .finish()
    }
}

fn bind_executor(
    protocol: &ProtocolDefinition,
    workflow_id: &str,
    step_id: &str,
) -> Result<FsmExecutor, EngineError> {
    let workflow = protocol
        .workflow(workflow_id)
        .ok_or_else(|| EngineError::UnknownWorkflow {
            workflow: workflow_id.to_string(),
        })?;
    FsmExecutor::new(workflow.clone(), step_id)
}

/// Everything that exists only after a successful `initialize`.
struct Runtime {
    protocol: ProtocolDefinition,
    states: StateManager,
    history: TransitionLog,
    snippets: SnippetExecutor,
    gates: GateEvaluator,
    fsm: FsmExecutor,
    logger: EngineLogger,
}

impl Runtime {
    /// Loads the persisted state and points the executor at it.
    fn sync(&mut self) -> Result<ProtocolState, EngineError> {
        let state = self.states.load_required()?;
        if self.fsm.workflow().id != state.workflow || self.fsm.current_step() != state.step {
            self.fsm = bind_executor(&self.protocol, &state.workflow, &state.step)?;
        }
        Ok(state)
    }

    fn step(&mut self, phase: &mut EnginePhase) -> Result<Option<TransitionResult>, EngineError> {
        let state = self.sync()?;
        match state.status {
            ExecutionStatus::Halted | ExecutionStatus::Failed => return Ok(None),
            ExecutionStatus::Completed if state.depth == 0 => return Ok(None),
            _ => {}
        }

        if state.returned_from_child() {
            self.states.clear_child_marker()?;
        } else if let Some(invoke) = self.fsm.check_invoke().cloned() {
            *phase = EnginePhase::Invoking;
            return self.invoke(&state, &invoke).map(Some);
        }

        if self.fsm.is_terminal() {
            if state.depth > 0 {
                return self.return_to_parent(false).map(Some);
            }
            self.states.set_status(ExecutionStatus::Completed)?;
            return Ok(None);
        }

        let state = self.states.load_required()?;
        let value = state.to_value();
        let next = self
            .fsm
            .available_transitions(&value, &self.gates)
            .first()
            .map(|transition| transition.to.clone());
        let Some(target) = next else {
            if state.status != ExecutionStatus::Waiting {
                self.states.set_status(ExecutionStatus::Waiting)?;
            }
            return Ok(None);
        };
        self.commit_transition(&target, false).map(Some)
    }

    fn request_transition(&mut self, to: &str) -> Result<TransitionResult, EngineError> {
        let state = self.sync()?;
        let value = state.to_value();
        // Reject before on_exit runs so an impossible request has no side effects.
        let mut probe = self.fsm.clone();
        if let Err(err) = probe.approve_transition(to, &value, &self.gates) {
            if err.is_transition_rejection() {
                return Ok(TransitionResult::failed(&state.step, to, err.to_string()));
            }
            return Err(err);
        }
        self.commit_transition(to, true)
    }

    fn commit_transition(
        &mut self,
        requested: &str,
        directed: bool,
    ) -> Result<TransitionResult, EngineError> {
        let workflow_id = self.fsm.workflow().id.clone();
        let from = self.fsm.current_step().to_string();
        let mut target = requested.to_string();

        let on_exit = self
            .fsm
            .step_definition()
            .and_then(|step| step.on_exit.clone());
        if let Some(hook_id) = on_exit {
            let state = self.states.load_required()?;
            let outcome = self.snippets.run(
                &hook_id,
                &state,
                HookMeta::new(&workflow_id, &from, Some(&target)),
            );
            if let HookResult::Abort { reason } = &outcome.result {
                let reason = reason.as_deref().unwrap_or("no reason given");
                return Ok(TransitionResult::failed(
                    &from,
                    &target,
                    format!("on_exit hook `{hook_id}` aborted: {reason}"),
                ));
            }
            if let Err(err) = self.apply_patches(&outcome.patches) {
                if is_patch_rejection(&err) {
                    return Ok(TransitionResult::failed(
                        &from,
                        &target,
                        format!("on_exit hook `{hook_id}` aborted: {err}"),
                    ));
                }
                return Err(err);
            }
            if let HookResult::Transition { to, .. } = outcome.result {
                target = to;
            }
        }

        let state = self.states.load_required()?;
        let value = state.to_value();
        let executed = if directed {
            self.fsm.approve_transition(&target, &value, &self.gates)
        } else {
            self.fsm.transition(&target, &value, &self.gates)
        };
        let transition = match executed {
            Ok(transition) => transition,
            Err(err) if err.is_transition_rejection() => {
                return Ok(TransitionResult::failed(&from, &target, err.to_string()));
            }
            Err(err) => return Err(err),
        };
        if let Err(err) = self.states.set_step(&target, ExecutionStatus::Running) {
            self.fsm.reset_to(&from);
            return Err(err);
        }

        let gate = transition.gate.as_ref().map(|gate| gate.describe());
        self.history.record(
            TransitionKind::Transition,
            &workflow_id,
            &from,
            &target,
            gate.clone(),
        )?;
        self.logger.append(
            "info",
            "transition",
            &format!("{workflow_id}: {from} -> {target}"),
            Some(&json!({ "gate": gate, "directed": directed })),
        );

        self.run_on_enter(&target)?;
        Ok(TransitionResult::ok(from, target))
    }

    /// Runs the step's `on_enter` hook and applies its patches. The transition that
    /// led here is already committed, so abort and redirect are only reported.
    fn run_on_enter(&self, step_id: &str) -> Result<(), EngineError> {
        let workflow = self.fsm.workflow();
        let Some(hook_id) = workflow.step(step_id).and_then(|step| step.on_enter.clone()) else {
            return Ok(());
        };
        let state = self.states.load_required()?;
        let outcome = self
            .snippets
            .run(&hook_id, &state, HookMeta::new(&workflow.id, step_id, None));

        let unsupported = |detail: String| {
            self.logger.append(
                "warn",
                "on_enter_unsupported_result",
                &format!("on_enter hook `{hook_id}` at `{}:{step_id}`: {detail}", workflow.id),
                None,
            );
        };
        if let Err(err) = self.apply_patches(&outcome.patches) {
            if !is_patch_rejection(&err) {
                return Err(err);
            }
            unsupported(format!("patch rejected: {err}"));
        }
        match &outcome.result {
            HookResult::Abort { reason } => unsupported(format!(
                "abort ignored: {}",
                reason.as_deref().unwrap_or("no reason given")
            )),
            HookResult::Transition { to, .. } => {
                unsupported(format!("redirect to `{to}` ignored"))
            }
            HookResult::Ok | HookResult::Patch { .. } => {}
        }
        Ok(())
    }

    fn apply_patches(&self, patches: &Map<String, Value>) -> Result<(), EngineError> {
        if patches.is_empty() {
            return Ok(());
        }
        self.states.update(patches).map(|_| ())
    }

    fn invoke(
        &mut self,
        state: &ProtocolState,
        invoke: &InvokeDefinition,
    ) -> Result<TransitionResult, EngineError> {
        let parent_workflow = state.workflow.clone();
        let from = state.step.clone();

        let Some(child) = self.protocol.workflow(&invoke.workflow).cloned() else {
            let err = EngineError::UnknownWorkflow {
                workflow: invoke.workflow.clone(),
            };
            return Ok(TransitionResult::failed(from, &invoke.workflow, err.to_string()));
        };
        let Some(initial) = child.initial_step().map(|step| step.id.clone()) else {
            return Ok(TransitionResult::failed(
                from,
                &invoke.workflow,
                format!("workflow `{}` has no initial step", child.id),
            ));
        };
        let to = format!("{}:{initial}", child.id);
        if let Some(resume) = &invoke.resume {
            if !self.fsm.workflow().has_step(resume) {
                let err = EngineError::InvalidResumeStep {
                    workflow: parent_workflow,
                    step: resume.clone(),
                };
                return Ok(TransitionResult::failed(from, to, err.to_string()));
            }
        }

        let input = child_input(&state.to_value(), &invoke.input);
        match self.states.invoke_child(
            &child.id,
            &initial,
            input,
            invoke.resume.clone(),
            invoke.output.clone(),
        ) {
            Ok(_) => {}
            Err(err) if err.is_transition_rejection() => {
                return Ok(TransitionResult::failed(from, to, err.to_string()));
            }
            Err(err) => return Err(err),
        }
        self.fsm = FsmExecutor::new(child, &initial)?;

        self.history.record(
            TransitionKind::Invoke,
            &parent_workflow,
            &from,
            &to,
            None,
        )?;
        self.logger.append(
            "info",
            "invoke",
            &format!("{parent_workflow}: {from} -> {to}"),
            Some(&json!({ "depth": state.depth + 1 })),
        );
        Ok(TransitionResult::ok(from, to))
    }

    fn return_to_parent(&mut self, aborted: bool) -> Result<TransitionResult, EngineError> {
        let state = self.sync()?;
        let entry = state.call_stack.last().cloned().ok_or(EngineError::NotNested)?;
        let from = format!("{}:{}", state.workflow, state.step);

        let result = if aborted {
            let mut result = Map::new();
            result.insert(CHILD_ABORTED_FIELD.to_string(), Value::Bool(true));
            result
        } else {
            map_child_result(state.field(NESTED_RESULT_FIELD), &entry.output)
        };
        let restored = self.states.return_to_parent(result)?;
        self.fsm = bind_executor(&self.protocol, &restored.workflow, &restored.step)?;

        self.history.record(
            TransitionKind::Return,
            &restored.workflow,
            &from,
            &restored.step,
            aborted.then(|| "aborted".to_string()),
        )?;
        self.logger.append(
            "info",
            "return",
            &format!("{}: {from} -> {}", restored.workflow, restored.step),
            Some(&json!({ "aborted": aborted, "depth": restored.depth })),
        );
        Ok(TransitionResult::ok(from, restored.step))
    }
}

fn is_patch_rejection(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::ReservedStateField { .. } | EngineError::InvalidState { .. }
    )
}

/// Child input bag: each child key takes the value at a dot-path into the parent
/// state. A leading `state.` is optional; missing paths are left out.
fn child_input(parent: &Value, mapping: &BTreeMap<String, String>) -> Map<String, Value> {
    mapping
        .iter()
        .filter_map(|(child_key, parent_path)| {
            let path = parent_path.strip_prefix("state.").unwrap_or(parent_path);
            lookup_path(parent, path).map(|value| (child_key.clone(), value.clone()))
        })
        .collect()
}

/// Parent fields produced from a finished child's `nested_result`. Without an output
/// mapping an object result is merged whole; other result shapes are dropped.
fn map_child_result(
    result: Option<&Value>,
    mapping: &BTreeMap<String, String>,
) -> Map<String, Value> {
    let Some(result) = result else {
        return Map::new();
    };
    if mapping.is_empty() {
        return result.as_object().cloned().unwrap_or_default();
    }
    mapping
        .iter()
        .filter_map(|(child_path, parent_key)| {
            let path = child_path
                .strip_prefix(NESTED_RESULT_FIELD)
                .map(|rest| rest.trim_start_matches('.'))
                .unwrap_or(child_path);
            lookup_path(result, path).map(|value| (parent_key.clone(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_input_reads_dot_paths_with_optional_state_prefix() {
        let parent = json!({ "tasks": [{ "id": "t1" }], "owner": { "name": "ada" } });
        let mapping = BTreeMap::from([
            ("first".to_string(), "state.tasks.0.id".to_string()),
            ("owner".to_string(), "owner.name".to_string()),
            ("missing".to_string(), "nope".to_string()),
        ]);
        let input = child_input(&parent, &mapping);
        assert_eq!(input.get("first"), Some(&json!("t1")));
        assert_eq!(input.get("owner"), Some(&json!("ada")));
        assert!(!input.contains_key("missing"));
    }

    #[test]
    fn child_result_without_mapping_merges_whole_object() {
        let result = json!({ "verdict": "pass", "score": 3 });
        let merged = map_child_result(Some(&result), &BTreeMap::new());
        assert_eq!(merged.len(), 2);
        assert!(map_child_result(Some(&json!("text")), &BTreeMap::new()).is_empty());
        assert!(map_child_result(None, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn child_result_mapping_accepts_prefixed_paths() {
        let result = json!({ "review": { "verdict": "pass" } });
        let mapping = BTreeMap::from([
            ("review.verdict".to_string(), "verdict".to_string()),
            ("nested_result.review".to_string(), "review".to_string()),
        ]);
        let mapped = map_child_result(Some(&result), &mapping);
        assert_eq!(mapped.get("verdict"), Some(&json!("pass")));
        assert_eq!(mapped.get("review"), Some(&json!({ "verdict": "pass" })));
    }
}

use crate::gate::GateEvaluator;
use crate::orchestration::error::EngineError;
use crate::protocol::{InvokeDefinition, StepDefinition, TransitionDefinition, WorkflowDefinition};
use serde_json::Value;

/// Current-step pointer over one workflow. Holds no persisted state.
#[derive(Debug, Clone)]
pub struct FsmExecutor {
    workflow: WorkflowDefinition,
    current_step: String,
}

impl FsmExecutor {
    pub fn new(workflow: WorkflowDefinition, current_step: &str) -> Result<Self, EngineError> {
        if !workflow.has_step(current_step) {
            return Err(EngineError::UnknownStep {
                workflow: workflow.id.clone(),
                step: current_step.to_string(),
            });
        }
        Ok(Self {
            workflow,
            current_step: current_step.to_string(),
        })
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    pub fn step_definition(&self) -> Option<&StepDefinition> {
        self.workflow.step(&self.current_step)
    }

    pub fn is_terminal(&self) -> bool {
        self.step_definition().is_some_and(|step| step.terminal)
    }

    pub fn check_invoke(&self) -> Option<&InvokeDefinition> {
        self.step_definition().and_then(|step| step.invoke.as_ref())
    }

    /// Outgoing transitions whose gate passes, lowest priority first. The sort is
    /// stable, so declaration order breaks ties.
    pub fn available_transitions(
        &self,
        state: &Value,
        gates: &GateEvaluator,
    ) -> Vec<&TransitionDefinition> {
        let mut available: Vec<&TransitionDefinition> = self
            .workflow
            .transitions_from(&self.current_step)
            .filter(|transition| gates.passes(transition.gate.as_ref(), state))
            .collect();
        available.sort_by_key(|transition| transition.effective_priority());
        available
    }

    pub fn can_transition(&self, to: &str, state: &Value, gates: &GateEvaluator) -> bool {
        self.passing_transition(to, state, gates, false).is_ok()
    }

    pub fn transition(
        &mut self,
        to: &str,
        state: &Value,
        gates: &GateEvaluator,
    ) -> Result<TransitionDefinition, EngineError> {
        let transition = self.passing_transition(to, state, gates, false)?.clone();
        self.current_step = to.to_string();
        Ok(transition)
    }

    /// Operator-directed transition: a `manual` gate counts as approved, every other
    /// gate must still pass.
    pub fn approve_transition(
        &mut self,
        to: &str,
        state: &Value,
        gates: &GateEvaluator,
    ) -> Result<TransitionDefinition, EngineError> {
        let transition = self.passing_transition(to, state, gates, true)?.clone();
        self.current_step = to.to_string();
        Ok(transition)
    }

    pub(crate) fn reset_to(&mut self, step: &str) {
        self.current_step = step.to_string();
    }

    fn passing_transition(
        &self,
        to: &str,
        state: &Value,
        gates: &GateEvaluator,
        approve_manual: bool,
    ) -> Result<&TransitionDefinition, EngineError> {
        let mut candidates: Vec<&TransitionDefinition> = self
            .workflow
            .transitions_from(&self.current_step)
            .filter(|transition| transition.to == to)
            .collect();
        if candidates.is_empty() {
            return Err(EngineError::NoSuchTransition {
                workflow: self.workflow.id.clone(),
                from: self.current_step.clone(),
                to: to.to_string(),
            });
        }
        candidates.sort_by_key(|transition| transition.effective_priority());
        candidates
            .into_iter()
            .find(|transition| match transition.gate.as_ref() {
                Some(gate) if gate.is_manual() => approve_manual,
                gate => gates.passes(gate, state),
            })
            .ok_or_else(|| EngineError::GateBlocked {
                workflow: self.workflow.id.clone(),
                from: self.current_step.clone(),
                to: to.to_string(),
            })
    }
}

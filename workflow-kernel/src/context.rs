//! In-memory run state: variables, step results, log entries, token/cost
//! accounting, and the serializable snapshot used for crash-recovery
//! checkpointing. Actual snapshot file IO lives in `workflow-core`; this
//! module owns only the pure data shape and the mutation/query methods so it
//! can be unit-tested without touching a filesystem.

use crate::interpolation::VariableSource;
use crate::model::StepResult;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Checkpoint/snapshot format version. Bump when `ContextSnapshot`'s shape
/// changes in a way that breaks restoring an older checkpoint.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub log_type: LogType,
    pub message: String,
    #[serde(default)]
    pub step: Option<String>,
}

/// Per-model USD cost per token, used when a step result doesn't carry its
/// own actual billed cost. Unknown model names fall back to the sonnet rate.
pub fn cost_per_token(model: &str) -> f64 {
    match model {
        m if m.contains("haiku") => 0.00025 / 1_000_000.0,
        m if m.contains("opus") => 0.015 / 1_000_000.0,
        _ => 0.003 / 1_000_000.0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ContextSnapshot {
    pub schema_version: u32,
    pub workflow: String,
    pub run_id: String,
    pub variables: BTreeMap<String, Value>,
    pub step_results: BTreeMap<String, StepResult>,
    pub completed_steps: Vec<String>,
    pub next_step_index: usize,
    pub tokens_used: u64,
    pub cost: f64,
    pub logs: Vec<LogEntry>,
}

/// Mutable run-time state threaded through step execution. Holds both the
/// declared `variables` (set at start, mutated only by explicit `store_as`
/// writes onto a variable name) and `step_results` (one entry per completed
/// step, keyed by step name).
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    workflow: String,
    run_id: String,
    variables: BTreeMap<String, Value>,
    step_results: BTreeMap<String, StepResult>,
    completed_steps: Vec<String>,
    next_step_index: usize,
    tokens_used: u64,
    cost: f64,
    logs: Vec<LogEntry>,
}

impl WorkflowContext {
    pub fn new(workflow: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            run_id: run_id.into(),
            variables: BTreeMap::new(),
            step_results: BTreeMap::new(),
            completed_steps: Vec::new(),
            next_step_index: 0,
            tokens_used: 0,
            cost: 0.0,
            logs: Vec::new(),
        }
    }

    pub fn from_snapshot(snapshot: ContextSnapshot) -> Self {
        Self {
            workflow: snapshot.workflow,
            run_id: snapshot.run_id,
            variables: snapshot.variables,
            step_results: snapshot.step_results,
            completed_steps: snapshot.completed_steps,
            next_step_index: snapshot.next_step_index,
            tokens_used: snapshot.tokens_used,
            cost: snapshot.cost,
            logs: snapshot.logs,
        }
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            schema_version: SCHEMA_VERSION,
            workflow: self.workflow.clone(),
            run_id: self.run_id.clone(),
            variables: self.variables.clone(),
            step_results: self.step_results.clone(),
            completed_steps: self.completed_steps.clone(),
            next_step_index: self.next_step_index,
            tokens_used: self.tokens_used,
            cost: self.cost,
            logs: self.logs.clone(),
        }
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// `get()` semantics: variables take precedence over step results of the
    /// same name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables
            .get(name)
            .or_else(|| self.step_results.get(name).map(|r| &r.data))
    }

    /// `get_all()` semantics: step results override variables of the same
    /// name, producing a single merged map for templates that want the full
    /// namespace at once.
    pub fn get_all(&self) -> BTreeMap<String, Value> {
        let mut merged = self.variables.clone();
        for (name, result) in &self.step_results {
            merged.insert(name.clone(), result.data.clone());
        }
        merged
    }

    /// Records a step's completion and output. Token/cost accounting is not
    /// this method's concern — it is accrued once, at call time, via
    /// `add_tokens`.
    pub fn record_step_result(&mut self, name: impl Into<String>, result: StepResult) {
        let name = name.into();
        self.completed_steps.push(name.clone());
        self.step_results.insert(name, result);
    }

    pub fn step_result(&self, name: &str) -> Option<&StepResult> {
        self.step_results.get(name)
    }

    pub fn is_step_complete(&self, name: &str) -> bool {
        self.step_results.get(name).is_some()
    }

    pub fn add_tokens(&mut self, tokens: u64, model: &str) {
        self.tokens_used += tokens;
        self.cost += tokens as f64 * cost_per_token(model);
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn log(&mut self, log_type: LogType, message: impl Into<String>, step: Option<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            log_type,
            message: message.into(),
            step,
        });
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn next_step_index(&self) -> usize {
        self.next_step_index
    }

    pub fn advance(&mut self) {
        self.next_step_index += 1;
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl VariableSource for WorkflowContext {
    fn lookup_variable(&self, name: &str) -> Option<Value> {
        self.variables.get(name).cloned()
    }

    fn lookup_step_result(&self, name: &str) -> Option<Value> {
        self.step_results.get(name).map(|r| r.data.clone())
    }

    fn workflow_name(&self) -> &str {
        &self.workflow
    }

    fn run_id(&self) -> &str {
        &self.run_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepStatus;

    #[test]
    fn get_prefers_variables_over_step_results() {
        let mut ctx = WorkflowContext::new("wf", "run-1");
        ctx.set_variable("x", Value::String("from-var".into()));
        let mut result = StepResult::pending();
        result.status = StepStatus::Success;
        result.data = Value::String("from-step".into());
        ctx.record_step_result("x", result);
        assert_eq!(ctx.get("x"), Some(&Value::String("from-var".into())));
    }

    #[test]
    fn get_all_prefers_step_results_over_variables() {
        let mut ctx = WorkflowContext::new("wf", "run-1");
        ctx.set_variable("x", Value::String("from-var".into()));
        let mut result = StepResult::pending();
        result.status = StepStatus::Success;
        result.data = Value::String("from-step".into());
        ctx.record_step_result("x", result);
        assert_eq!(
            ctx.get_all().get("x"),
            Some(&Value::String("from-step".into()))
        );
    }

    #[test]
    fn snapshot_round_trips() {
        let mut ctx = WorkflowContext::new("wf", "run-1");
        ctx.set_variable("n", serde_json::json!(3));
        ctx.add_tokens(1000, "claude-haiku");
        let snap = ctx.snapshot();
        assert_eq!(snap.schema_version, SCHEMA_VERSION);
        let restored = WorkflowContext::from_snapshot(snap);
        assert_eq!(restored.get("n"), Some(&serde_json::json!(3)));
        assert_eq!(restored.tokens_used(), 1000);
    }

    #[test]
    fn unknown_model_uses_sonnet_rate() {
        assert_eq!(cost_per_token("mystery-model"), cost_per_token("claude-sonnet"));
    }
}

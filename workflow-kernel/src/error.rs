use thiserror::Error;

/// One variant per error kind a workflow run can surface to an external caller.
/// Structured context travels in the fields; nothing here carries a raw stack trace.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("validation failed for workflow `{workflow}`: {message}")]
    Validation { workflow: String, message: String },

    #[error("permission profile `{name}` not found")]
    ProfileNotFound { name: String },

    #[error("circular inheritance detected resolving profile `{name}` (path: {path})")]
    CircularInheritance { name: String, path: String },

    #[error("interpolation error in expression `{expression}`: {reason}")]
    Interpolation { expression: String, reason: String },

    #[error("condition could not be evaluated: `{condition}`: {reason}")]
    ConditionEvaluation { condition: String, reason: String },

    #[error("permission denied for tool `{tool}`: {reason}")]
    PermissionDenied { tool: String, reason: String },

    #[error("budget exceeded on {dimension}: limit {limit}, actual {actual}")]
    BudgetExceeded {
        dimension: String,
        limit: f64,
        actual: f64,
    },

    #[error("step `{step}` failed: {reason}")]
    StepExecution { step: String, reason: String },

    #[error("step `{step}` timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout {
        step: String,
        elapsed_ms: u64,
        limit_ms: u64,
    },

    #[error("confidence {actual} below gate {gate} for step `{step}`")]
    LowConfidence { step: String, gate: u8, actual: u8 },

    #[error("no checkpoint found for run `{run_id}`")]
    CheckpointMissing { run_id: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

//! IO seams as trait definitions. The kernel defines the trait and the
//! request/response shapes; `workflow-core` provides the concrete,
//! tokio-backed implementations. Keeping the trait here lets step-execution
//! logic that dispatches on these ports stay testable with a fake.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Wall-clock access behind a trait, so time-dependent logic (cron
/// scheduling) can be driven by an injected fixed clock in tests instead of
/// sleeping for real.
pub trait ClockPort {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone)]
pub struct ShellRequest {
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ShellResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u128,
}

pub trait ShellPort {
    type Error: std::error::Error + Send + Sync + 'static;

    fn run(&self, request: ShellRequest) -> Result<ShellResponse, Self::Error>;
}

/// A single LLM call: the resolved prompt plus the model chosen for it.
/// `agent_invocation` and `framework_invocation` steps both reduce to this
/// at the port boundary; what differs between them lives in workflow-core's
/// executor, which decides how to build the prompt and interpret the reply.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub model: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub tokens_used: u64,
    pub confidence: Option<u8>,
}

pub trait LlmCapability {
    type Error: std::error::Error + Send + Sync + 'static;

    fn complete(&self, request: LlmRequest, events: &dyn EventSink) -> Result<LlmResponse, Self::Error>;
}

pub trait EventSink {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

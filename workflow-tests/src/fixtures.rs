//! Shared test scaffolding: a temp-rooted `EngineConfig`, a workflow-document
//! writer, and a stub LLM, mirroring the helpers `workflow_core::runner`'s own
//! unit tests use but exposed here for cross-crate, end-to-end scenarios.

use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use workflow_core::config::EngineConfig;
use workflow_kernel::ports::{EventSink, LlmCapability, LlmRequest, LlmResponse};

pub fn test_config(tmp: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.workflows_dir = tmp.path().join("definitions");
    config.permissions_dir = tmp.path().join("permissions");
    config.preferences_dir = tmp.path().join("preferences");
    config.logs_dir = tmp.path().join("logs");
    config.checkpoints_dir = tmp.path().join(".checkpoints");
    config.events_dir = tmp.path().join(".events");
    config.daemon_pid_file = tmp.path().join(".daemon.pid");
    config.daemon_status_file = tmp.path().join(".daemon.status");
    config
}

pub fn write_workflow(config: &EngineConfig, name: &str, contents: &str) {
    write_under(&config.workflows_dir, name, contents);
}

pub fn write_profile(dir: &Path, name: &str, contents: &str) {
    write_under(dir, name, contents);
}

fn write_under(dir: &Path, name: &str, contents: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let mut f = std::fs::File::create(dir.join(format!("{name}.toml"))).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
}

pub struct StubLlm {
    pub tokens_per_call: u64,
    pub reply: String,
}

impl Default for StubLlm {
    fn default() -> Self {
        Self {
            tokens_per_call: 0,
            reply: "ok".to_string(),
        }
    }
}

impl LlmCapability for StubLlm {
    type Error = std::convert::Infallible;

    fn complete(&self, request: LlmRequest, _events: &dyn EventSink) -> Result<LlmResponse, Self::Error> {
        Ok(LlmResponse {
            text: format!("{} (prompt was: {})", self.reply, request.prompt),
            tokens_used: self.tokens_per_call,
            confidence: Some(95),
        })
    }
}

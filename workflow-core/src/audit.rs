//! Stateful audit logging: owns the on-disk chain file for a run and calls
//! into `workflow_kernel::audit`'s pure hash-chain functions for every event.
//! One log file per run at `logs/{workflow}-{run_id}.audit.json`, matching
//! the original engine's per-run audit file layout.

use crate::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use workflow_kernel::audit::{
    self, AuditEntry, AuditEventType, AuditSummary,
};
use workflow_kernel::value::Value;
use workflow_kernel::WorkflowResult;

fn merged_redact_patterns(extra: &[String]) -> Vec<String> {
    let mut patterns = audit::default_redact_patterns();
    for pattern in extra {
        if !patterns.contains(pattern) {
            patterns.push(pattern.clone());
        }
    }
    patterns
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
struct AuditFile {
    workflow_name: String,
    run_id: String,
    entries: Vec<AuditEntry>,
    final_hash: Option<String>,
}

pub struct AuditLogger {
    path: PathBuf,
    workflow_name: String,
    run_id: String,
    chain: Vec<AuditEntry>,
    redact_patterns: Vec<String>,
}

impl AuditLogger {
    /// `extra_redact_patterns` is a run's resolved `PermissionsProfile.secrets.never_log`
    /// globs, if any; they're merged with the four built-in defaults.
    pub fn new(
        config: &EngineConfig,
        workflow_name: impl Into<String>,
        run_id: impl Into<String>,
        extra_redact_patterns: &[String],
    ) -> Self {
        let workflow_name = workflow_name.into();
        let run_id = run_id.into();
        let path = config
            .logs_dir
            .join(format!("{workflow_name}-{run_id}.audit.json"));
        Self {
            path,
            workflow_name,
            run_id,
            chain: Vec::new(),
            redact_patterns: merged_redact_patterns(extra_redact_patterns),
        }
    }

    pub fn load(
        config: &EngineConfig,
        workflow_name: &str,
        run_id: &str,
        extra_redact_patterns: &[String],
    ) -> WorkflowResult<Self> {
        let path = config
            .logs_dir
            .join(format!("{workflow_name}-{run_id}.audit.json"));
        let contents = std::fs::read_to_string(&path)?;
        let file: AuditFile = serde_json::from_str(&contents)?;
        Ok(Self {
            path,
            workflow_name: file.workflow_name,
            run_id: file.run_id,
            chain: file.entries,
            redact_patterns: merged_redact_patterns(extra_redact_patterns),
        })
    }

    fn record(
        &mut self,
        event_type: AuditEventType,
        message: impl Into<String>,
        step_name: Option<String>,
        data: Option<Value>,
    ) -> WorkflowResult<()> {
        let data = data.map(|d| audit::truncate_output(audit::redact_fields(&d, &self.redact_patterns)));
        audit::append_entry(
            &mut self.chain,
            self.workflow_name.clone(),
            self.run_id.clone(),
            event_type,
            message,
            step_name,
            data,
        );
        self.flush()
    }

    fn flush(&self) -> WorkflowResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = AuditFile {
            workflow_name: self.workflow_name.clone(),
            run_id: self.run_id.clone(),
            entries: self.chain.clone(),
            final_hash: self.chain.last().map(|e| e.entry_hash.clone()),
        };
        let contents = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    pub fn log_start(&mut self) -> WorkflowResult<()> {
        self.record(AuditEventType::WorkflowStart, "workflow started", None, None)
    }

    pub fn log_complete(&mut self) -> WorkflowResult<()> {
        self.record(AuditEventType::WorkflowComplete, "workflow completed", None, None)
    }

    pub fn log_failed(&mut self, reason: &str) -> WorkflowResult<()> {
        self.record(AuditEventType::WorkflowFailed, reason, None, None)
    }

    pub fn log_paused(&mut self, reason: &str) -> WorkflowResult<()> {
        self.record(AuditEventType::WorkflowPaused, reason, None, None)
    }

    pub fn log_resumed(&mut self) -> WorkflowResult<()> {
        self.record(AuditEventType::WorkflowResumed, "workflow resumed", None, None)
    }

    pub fn log_step_start(&mut self, step: &str) -> WorkflowResult<()> {
        self.record(
            AuditEventType::StepStart,
            format!("step `{step}` started"),
            Some(step.to_string()),
            None,
        )
    }

    pub fn log_step_complete(&mut self, step: &str, data: Option<Value>) -> WorkflowResult<()> {
        self.record(
            AuditEventType::StepComplete,
            format!("step `{step}` completed"),
            Some(step.to_string()),
            data,
        )
    }

    pub fn log_step_failed(&mut self, step: &str, reason: &str) -> WorkflowResult<()> {
        self.record(
            AuditEventType::StepFailed,
            reason,
            Some(step.to_string()),
            None,
        )
    }

    pub fn log_step_skipped(&mut self, step: &str, reason: &str) -> WorkflowResult<()> {
        self.record(
            AuditEventType::StepSkipped,
            reason,
            Some(step.to_string()),
            None,
        )
    }

    pub fn log_tool_call(&mut self, step: &str, tool: &str, args: Value) -> WorkflowResult<()> {
        self.record(
            AuditEventType::ToolCall,
            format!("tool `{tool}` invoked"),
            Some(step.to_string()),
            Some(args),
        )
    }

    pub fn log_tool_result(&mut self, step: &str, tool: &str, result: Value) -> WorkflowResult<()> {
        self.record(
            AuditEventType::ToolResult,
            format!("tool `{tool}` returned"),
            Some(step.to_string()),
            Some(result),
        )
    }

    pub fn log_permission_check(
        &mut self,
        step: &str,
        tool: &str,
        decision: &str,
    ) -> WorkflowResult<()> {
        let event = match decision {
            "deny" => AuditEventType::PermissionDenied,
            "allow" | "allow_constrained" => AuditEventType::PermissionGranted,
            _ => AuditEventType::PermissionCheck,
        };
        self.record(
            event,
            format!("permission check for `{tool}`: {decision}"),
            Some(step.to_string()),
            None,
        )
    }

    pub fn log_budget_update(&mut self, tokens_used: u64, cost: f64) -> WorkflowResult<()> {
        self.record(
            AuditEventType::BudgetUpdate,
            format!("budget now at {tokens_used} tokens / ${cost:.4}"),
            None,
            None,
        )
    }

    pub fn log_budget_warning(&mut self, message: &str) -> WorkflowResult<()> {
        self.record(AuditEventType::BudgetWarning, message, None, None)
    }

    pub fn log_budget_exceeded(&mut self, message: &str) -> WorkflowResult<()> {
        self.record(AuditEventType::BudgetExceeded, message, None, None)
    }

    pub fn log_checkpoint_created(&mut self) -> WorkflowResult<()> {
        self.record(AuditEventType::CheckpointCreated, "checkpoint saved", None, None)
    }

    pub fn log_checkpoint_restored(&mut self) -> WorkflowResult<()> {
        self.record(AuditEventType::CheckpointRestored, "checkpoint restored", None, None)
    }

    pub fn log_error(&mut self, message: &str) -> WorkflowResult<()> {
        self.record(AuditEventType::Error, message, None, None)
    }

    pub fn log_warning(&mut self, message: &str) -> WorkflowResult<()> {
        self.record(AuditEventType::Warning, message, None, None)
    }

    pub fn get_summary(&self) -> AuditSummary {
        audit::summarize(&self.workflow_name, &self.run_id, &self.chain)
    }

    pub fn verify(&self) -> bool {
        audit::verify_chain(&self.chain)
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn logs_persist_and_verify_across_reload() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.logs_dir = tmp.path().join("logs");

        let mut logger = AuditLogger::new(&config, "demo", "run-1", &[]);
        logger.log_start().unwrap();
        logger.log_step_start("fetch").unwrap();
        logger.log_step_complete("fetch", None).unwrap();
        logger.log_complete().unwrap();

        let reloaded = AuditLogger::load(&config, "demo", "run-1", &[]).unwrap();
        assert!(reloaded.verify());
        assert_eq!(reloaded.get_summary().steps_started, 1);
        assert_eq!(reloaded.get_summary().steps_completed, 1);
    }

    #[test]
    fn tool_call_args_are_redacted_on_disk() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.logs_dir = tmp.path().join("logs");

        let mut logger = AuditLogger::new(&config, "demo", "run-1", &[]);
        logger
            .log_tool_call("s1", "curl", serde_json::json!({"API_KEY": "sekrit"}))
            .unwrap();

        let reloaded = AuditLogger::load(&config, "demo", "run-1", &[]).unwrap();
        let entry = &reloaded.entries()[0];
        assert_eq!(
            entry.data.as_ref().unwrap()["API_KEY"],
            serde_json::json!("[REDACTED]")
        );
    }

    #[test]
    fn profile_secrets_never_log_extends_the_default_patterns() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.logs_dir = tmp.path().join("logs");

        let never_log = vec!["*_HANDLE".to_string()];
        let mut logger = AuditLogger::new(&config, "demo", "run-1", &never_log);
        logger
            .log_tool_call("s1", "lookup", serde_json::json!({"ACCOUNT_HANDLE": "acct-42"}))
            .unwrap();

        let reloaded = AuditLogger::load(&config, "demo", "run-1", &[]).unwrap();
        let entry = &reloaded.entries()[0];
        assert_eq!(
            entry.data.as_ref().unwrap()["ACCOUNT_HANDLE"],
            serde_json::json!("[REDACTED]")
        );
    }
}

//! Checkpoint persistence for `workflow_kernel::context::WorkflowContext`.
//!
//! The kernel context is pure in-memory state; this module adds the file IO
//! needed to survive a crash mid-run: write a `ContextSnapshot` to
//! `.checkpoints/{workflow}-{run_id}.json` after each step, and restore one
//! on resume.

use crate::config::EngineConfig;
use std::path::PathBuf;
use workflow_kernel::context::{ContextSnapshot, WorkflowContext};
use workflow_kernel::{WorkflowError, WorkflowResult};

pub fn checkpoint_path(config: &EngineConfig, workflow: &str, run_id: &str) -> PathBuf {
    config
        .checkpoints_dir
        .join(format!("{workflow}-{run_id}.json"))
}

pub fn save(config: &EngineConfig, context: &WorkflowContext) -> WorkflowResult<()> {
    std::fs::create_dir_all(&config.checkpoints_dir)?;
    let path = checkpoint_path(config, context.workflow_name(), context.run_id());
    let snapshot = context.snapshot();
    let contents = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn restore(
    config: &EngineConfig,
    workflow: &str,
    run_id: &str,
) -> WorkflowResult<WorkflowContext> {
    let path = checkpoint_path(config, workflow, run_id);
    if !path.exists() {
        return Err(WorkflowError::CheckpointMissing {
            run_id: run_id.to_string(),
        });
    }
    let contents = std::fs::read_to_string(&path)?;
    let snapshot: ContextSnapshot = serde_json::from_str(&contents)?;
    Ok(WorkflowContext::from_snapshot(snapshot))
}

pub fn has_checkpoint(config: &EngineConfig, workflow: &str, run_id: &str) -> bool {
    checkpoint_path(config, workflow, run_id).exists()
}

/// Remove a checkpoint once a run finishes, whether it succeeded or failed
/// terminally; a paused run keeps its checkpoint around for resume.
pub fn discard(config: &EngineConfig, workflow: &str, run_id: &str) -> WorkflowResult<()> {
    let path = checkpoint_path(config, workflow, run_id);
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn saves_and_restores_a_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.checkpoints_dir = tmp.path().join(".checkpoints");

        let mut context = WorkflowContext::new("demo", "run-1");
        context.set_variable("greeting", serde_json::json!("hi"));
        save(&config, &context).unwrap();

        assert!(has_checkpoint(&config, "demo", "run-1"));
        let restored = restore(&config, "demo", "run-1").unwrap();
        assert_eq!(
            restored.get("greeting"),
            Some(&serde_json::json!("hi"))
        );
    }

    #[test]
    fn restoring_a_missing_checkpoint_errors() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.checkpoints_dir = tmp.path().join(".checkpoints");
        assert!(restore(&config, "demo", "nope").is_err());
    }

    #[test]
    fn discard_removes_the_checkpoint_file() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.checkpoints_dir = tmp.path().join(".checkpoints");
        let context = WorkflowContext::new("demo", "run-1");
        save(&config, &context).unwrap();
        discard(&config, "demo", "run-1").unwrap();
        assert!(!has_checkpoint(&config, "demo", "run-1"));
    }
}

//! Engine configuration: where workflow/profile documents, checkpoints,
//! audit logs, and daemon state files live. Layered the way the teacher's
//! config loader is: compiled-in defaults, overridden by an optional
//! `workflow.toml` file, overridden by `WORKFLOW_*` environment variables.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub workflows_dir: PathBuf,
    pub permissions_dir: PathBuf,
    pub preferences_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub events_dir: PathBuf,
    pub agents_dir: PathBuf,
    pub frameworks_dir: PathBuf,
    pub daemon_pid_file: PathBuf,
    pub daemon_status_file: PathBuf,
    pub default_watch_poll_interval_ms: u64,
    pub default_cron_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let root = PathBuf::from("workflows");
        Self {
            workflows_dir: root.join("definitions"),
            permissions_dir: root.join("permissions"),
            preferences_dir: root.join("preferences"),
            logs_dir: root.join("logs"),
            checkpoints_dir: root.join(".checkpoints"),
            events_dir: root.join(".events"),
            agents_dir: root.join("agents"),
            frameworks_dir: root.join("frameworks"),
            daemon_pid_file: root.join(".daemon.pid"),
            daemon_status_file: root.join(".daemon.status"),
            default_watch_poll_interval_ms: 2_000,
            default_cron_poll_interval_ms: 60_000,
        }
    }
}

impl EngineConfig {
    /// Load compiled-in defaults, merge an optional `workflow.toml` at the
    /// given root, then apply `WORKFLOW_*` environment variable overrides.
    pub fn load(root: Option<&std::path::Path>) -> workflow_kernel::WorkflowResult<Self> {
        let mut config = Self::default();

        if let Some(root) = root {
            config.workflows_dir = root.join("definitions");
            config.permissions_dir = root.join("permissions");
            config.preferences_dir = root.join("preferences");
            config.logs_dir = root.join("logs");
            config.checkpoints_dir = root.join(".checkpoints");
            config.events_dir = root.join(".events");
            config.agents_dir = root.join("agents");
            config.frameworks_dir = root.join("frameworks");
            config.daemon_pid_file = root.join(".daemon.pid");
            config.daemon_status_file = root.join(".daemon.status");

            let file_path = root.join("workflow.toml");
            if file_path.exists() {
                let contents = std::fs::read_to_string(&file_path)?;
                let from_file: PartialEngineConfig = toml::from_str(&contents).map_err(|e| {
                    workflow_kernel::WorkflowError::Validation {
                        workflow: file_path.display().to_string(),
                        message: e.to_string(),
                    }
                })?;
                config.merge_partial(from_file);
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn merge_partial(&mut self, partial: PartialEngineConfig) {
        if let Some(v) = partial.logs_dir {
            self.logs_dir = v;
        }
        if let Some(v) = partial.checkpoints_dir {
            self.checkpoints_dir = v;
        }
        if let Some(v) = partial.default_watch_poll_interval_ms {
            self.default_watch_poll_interval_ms = v;
        }
        if let Some(v) = partial.default_cron_poll_interval_ms {
            self.default_cron_poll_interval_ms = v;
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WORKFLOW_LOGS_DIR") {
            self.logs_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WORKFLOW_CHECKPOINTS_DIR") {
            self.checkpoints_dir = PathBuf::from(v);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialEngineConfig {
    logs_dir: Option<PathBuf>,
    checkpoints_dir: Option<PathBuf>,
    default_watch_poll_interval_ms: Option<u64>,
    default_cron_poll_interval_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_workflows_tree() {
        let config = EngineConfig::default();
        assert_eq!(config.workflows_dir, PathBuf::from("workflows/definitions"));
    }

    #[test]
    fn load_without_root_falls_back_to_defaults() {
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}

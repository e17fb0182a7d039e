use tempfile::TempDir;
use workflow_core::triggers::TriggerManager;

use crate::fixtures::{test_config, write_workflow};

/// Loading a workflow whose `[trigger]` is `type = "cron"` registers it with
/// the scheduler, and loading one with no trigger (or an explicit `manual`)
/// does not — the daemon's status reflects exactly the triggered workflows.
#[test]
fn registering_all_workflows_only_schedules_cron_triggered_ones() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_workflow(
        &config,
        "nightly",
        r#"
name = "nightly"

[trigger]
type = "cron"
cron = "0 2 * * *"

[[steps]]
name = "run-it"
shell_command = "echo nightly"
"#,
    );
    write_workflow(
        &config,
        "manual-only",
        r#"
name = "manual-only"

[[steps]]
name = "run-it"
shell_command = "echo manual"
"#,
    );

    let manager = TriggerManager::new();
    manager.register_all_workflows(&config);

    let status = manager.status();
    assert_eq!(status.cron_jobs, 1);
    assert_eq!(status.file_watches, 0);
    assert_eq!(status.event_subscriptions, 0);
}

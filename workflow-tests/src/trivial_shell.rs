use std::collections::BTreeMap;
use tempfile::TempDir;
use workflow_core::audit::AuditLogger;
use workflow_core::executor::LocalShell;
use workflow_core::runner::{RunOptions, WorkflowRunner};
use workflow_kernel::model::{RunState, StepStatus};

use crate::fixtures::{test_config, write_workflow, StubLlm};

/// A one-step shell workflow runs to completion and leaves behind a
/// verifiable, hash-chained audit log — the baseline end-to-end path every
/// other scenario builds on.
#[test]
fn runs_to_completion_and_writes_a_verifiable_audit_log() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_workflow(
        &config,
        "hello",
        r#"
name = "hello"

[[steps]]
name = "say-hi"
shell_command = "echo hi"
store_as = "greeting"
"#,
    );

    let shell = LocalShell;
    let llm = StubLlm::default();
    let runner = WorkflowRunner::new(&config, &shell, &llm);
    let summary = runner.run("hello", BTreeMap::new(), RunOptions::default()).unwrap();

    assert_eq!(summary.state, RunState::Success);
    assert_eq!(summary.steps[0].status, StepStatus::Success);

    let logger = AuditLogger::load(&config, "hello", &summary.run_id, &[]).unwrap();
    assert!(logger.verify());
    let audit_summary = logger.get_summary();
    assert_eq!(audit_summary.steps_completed, 1);
    assert_eq!(audit_summary.steps_failed, 0);
}

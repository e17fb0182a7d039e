use std::collections::BTreeMap;
use tempfile::TempDir;
use workflow_core::audit::AuditLogger;
use workflow_core::executor::LocalShell;
use workflow_core::runner::{RunOptions, WorkflowRunner};

use crate::fixtures::{test_config, write_workflow, StubLlm};

/// Editing a stored entry's message after the fact breaks its recorded hash,
/// which `verify_chain` is built to catch — the whole point of chaining the
/// audit log.
#[test]
fn editing_an_entry_on_disk_breaks_chain_verification() {
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
"#,
    );

    let shell = LocalShell;
    let llm = StubLlm::default();
    let runner = WorkflowRunner::new(&config, &shell, &llm);
    let summary = runner.run("hello", BTreeMap::new(), RunOptions::default()).unwrap();

    let logger = AuditLogger::load(&config, "hello", &summary.run_id, &[]).unwrap();
    assert!(logger.verify());

    let log_path = config.logs_dir.join(format!("hello-{}.audit.json", summary.run_id));
    let contents = std::fs::read_to_string(&log_path).unwrap();
    let tampered = contents.replacen("workflow started", "workflow started (tampered)", 1);
    assert_ne!(contents, tampered);
    std::fs::write(&log_path, tampered).unwrap();

    let reloaded = AuditLogger::load(&config, "hello", &summary.run_id, &[]).unwrap();
    assert!(!reloaded.verify());
}

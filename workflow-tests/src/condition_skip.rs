use std::collections::BTreeMap;
use tempfile::TempDir;
use workflow_core::executor::LocalShell;
use workflow_core::runner::{RunOptions, WorkflowRunner};
use workflow_kernel::model::{RunState, StepStatus};
use workflow_kernel::value::Value;

use crate::fixtures::{test_config, write_workflow, StubLlm};

/// A step whose `condition` evaluates false is skipped rather than executed,
/// and the run still completes successfully.
#[test]
fn false_condition_skips_the_step_without_failing_the_run() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_workflow(
        &config,
        "conditional",
        r#"
name = "conditional"

[[variables]]
name = "go"
default = false

[[steps]]
name = "maybe"
shell_command = "echo should-not-run"
condition = "{{go}} == true"
"#,
    );

    let shell = LocalShell;
    let llm = StubLlm::default();
    let runner = WorkflowRunner::new(&config, &shell, &llm);

    let summary = runner.run("conditional", BTreeMap::new(), RunOptions::default()).unwrap();
    assert_eq!(summary.state, RunState::Success);
    assert_eq!(summary.steps[0].status, StepStatus::Skipped);

    let mut variables = BTreeMap::new();
    variables.insert("go".to_string(), Value::Bool(true));
    let summary = runner.run("conditional", variables, RunOptions::default()).unwrap();
    assert_eq!(summary.steps[0].status, StepStatus::Success);
}

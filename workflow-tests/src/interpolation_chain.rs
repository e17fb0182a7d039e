use std::collections::BTreeMap;
use tempfile::TempDir;
use workflow_core::executor::LocalShell;
use workflow_core::runner::{RunOptions, WorkflowRunner};
use workflow_kernel::model::RunState;
use workflow_kernel::value::Value;

use crate::fixtures::{test_config, write_workflow, StubLlm};

/// A later step's `{{step.field}}` interpolation sees the prior step's stored
/// result, and a caller-supplied variable threads through the whole chain.
#[test]
fn later_steps_interpolate_earlier_results_and_input_variables() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_workflow(
        &config,
        "chain",
        r#"
name = "chain"

[[variables]]
name = "target"
required = true

[[steps]]
name = "greet"
shell_command = "echo hello-{{target}}"
store_as = "greeting"

[[steps]]
name = "shout"
shell_command = "echo {{greeting.stdout}}!"
"#,
    );

    let shell = LocalShell;
    let llm = StubLlm::default();
    let runner = WorkflowRunner::new(&config, &shell, &llm);

    let mut variables = BTreeMap::new();
    variables.insert("target".to_string(), Value::String("world".to_string()));

    let summary = runner.run("chain", variables, RunOptions::default()).unwrap();

    assert_eq!(summary.state, RunState::Success);
    assert_eq!(summary.steps.len(), 2);
}

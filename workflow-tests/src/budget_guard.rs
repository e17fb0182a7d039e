use std::collections::BTreeMap;
use tempfile::TempDir;
use workflow_core::executor::LocalShell;
use workflow_core::runner::{RunOptions, WorkflowRunner};
use workflow_kernel::model::RunState;

use crate::fixtures::{test_config, write_workflow, StubLlm};

/// `max_cost` is enforced the same way `max_tokens` is: checked before each
/// step against cost already accumulated, not the step about to run.
#[test]
fn max_cost_guard_fails_the_run_before_the_second_prompt() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_workflow(
        &config,
        "pricey",
        r#"
name = "pricey"

[budget]
max_cost = 0.001

[[steps]]
name = "first"
llm_prompt = "draft something"

[[steps]]
name = "second"
llm_prompt = "draft something else"
"#,
    );

    let shell = LocalShell;
    // Default (non-haiku/opus) model costs $0.003 per million tokens; two
    // million tokens per call puts the first step's cost at $0.006, well
    // past the $0.001 cap checked ahead of the second step.
    let llm = StubLlm {
        tokens_per_call: 2_000_000,
        reply: "draft".to_string(),
    };
    let runner = WorkflowRunner::new(&config, &shell, &llm);

    let summary = runner.run("pricey", BTreeMap::new(), RunOptions::default()).unwrap();
    assert_eq!(summary.state, RunState::Failed);
    assert_eq!(summary.steps.len(), 1);
    assert!(summary.cost > 0.001);
}

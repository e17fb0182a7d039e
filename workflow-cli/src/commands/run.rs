use std::collections::BTreeMap;

use workflow_core::config::EngineConfig;
use workflow_core::executor::LocalShell;
use workflow_core::llm::CliLlm;
use workflow_core::runner::{RunOptions, WorkflowRunner};
use workflow_kernel::model::RunState;
use workflow_kernel::value::Value;

use super::{classify_step_error, EXIT_SUCCESS, EXIT_VALIDATION_ERROR, EXIT_WORKFLOW_FAILURE};

pub fn run(
    config: &EngineConfig,
    llm_command: &[String],
    name: &str,
    variables: BTreeMap<String, Value>,
    dry_run: bool,
    resume: Option<String>,
) -> i32 {
    let shell = LocalShell;
    let llm = CliLlm::new(llm_command.to_vec());
    let runner = WorkflowRunner::new(config, &shell, &llm);
    let options = RunOptions {
        dry_run,
        resume_from: resume,
    };

    match runner.run(name, variables, options) {
        Ok(summary) => {
            println!(
                "run {} ({}): {:?}, {} step(s), {} tokens, ${:.4}",
                summary.run_id,
                summary.workflow,
                summary.state,
                summary.steps.len(),
                summary.tokens_used,
                summary.cost
            );
            for step in &summary.steps {
                match &step.error {
                    Some(err) => println!("  {} [{:?}]: {err}", step.name, step.status),
                    None => println!("  {} [{:?}]", step.name, step.status),
                }
            }
            match summary.state {
                RunState::Success | RunState::Paused => EXIT_SUCCESS,
                RunState::Failed => summary
                    .steps
                    .last()
                    .and_then(|s| s.error.as_deref())
                    .map(classify_step_error)
                    .unwrap_or(EXIT_WORKFLOW_FAILURE),
                RunState::Pending | RunState::Running | RunState::Skipped => EXIT_SUCCESS,
            }
        }
        Err(e) => {
            tracing::error!("{e}");
            EXIT_VALIDATION_ERROR
        }
    }
}

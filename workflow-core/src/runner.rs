//! Orchestrates one complete workflow run: load the definition, resolve its
//! permissions profile, seed variables, then iterate steps in order with a
//! budget check and a permission check ahead of each one. Mirrors the
//! original engine's `WorkflowRunner.run()` control flow: Parser.load ->
//! Context.new -> for each step: PermissionEngine.check -> Executor.dispatch
//! -> Context.update + Audit.log + Context.checkpoint.

use crate::audit::AuditLogger;
use crate::config::EngineConfig;
use crate::context as checkpoint;
use crate::executor::StepExecutor;
use crate::parser;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use workflow_kernel::context::WorkflowContext;
use workflow_kernel::model::{
    PermissionsProfile, RunState, Step, StepStatus, StepSummary, WorkflowResult as RunSummary,
};
use workflow_kernel::permissions::{
    self, check_command, check_file_read, check_file_write, evaluate_tool_check, PermissionDecision,
    PermissionFacts,
};
use workflow_kernel::ports::{LlmCapability, ShellPort};
use workflow_kernel::value::Value;
use workflow_kernel::{WorkflowError, WorkflowResult};

/// Per-run options a CLI invocation or trigger fires with.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub resume_from: Option<String>,
}

/// Whether a step's target path is being read or written, so the right
/// `FileAccessPolicy` allowlist applies.
enum FileAccessKind {
    Read,
    Write,
}

/// Tool/path/command facts extracted from a step for a permission check.
/// Shell and script steps expose their command text; script and template
/// output steps additionally expose the path they read from or write to;
/// prompt-shaped steps carry neither and are checked on tool name alone.
fn step_facts(step: &Step) -> (Option<String>, Option<(String, FileAccessKind)>) {
    use workflow_kernel::model::StepKind::*;
    match &step.kind {
        ShellCommand { shell_command } => (Some(shell_command.clone()), None),
        ScriptPath { script_path } => (
            Some(script_path.clone()),
            Some((script_path.clone(), FileAccessKind::Read)),
        ),
        TemplateOutput { .. } => (
            None,
            step.output_path.clone().map(|p| (p, FileAccessKind::Write)),
        ),
        _ => (None, None),
    }
}

/// Holds the resolved profile (if any) plus the run-local `ask_once`
/// approval set. A workflow without a `permissions_profile` runs
/// unrestricted, matching a manually-authored, trusted workflow.
struct PermissionGate {
    profile: Option<PermissionsProfile>,
    approved: HashSet<String>,
}

impl PermissionGate {
    fn check(&mut self, step: &Step) -> Result<(), String> {
        let Some(profile) = &self.profile else {
            return Ok(());
        };
        let tool = step.kind.label();
        let (command, file_access) = step_facts(step);
        let target_path = file_access.as_ref().map(|(p, _)| p.as_str());
        let facts = PermissionFacts {
            profile,
            tool,
            target_path,
            command: command.as_deref(),
            previously_approved: self.approved.contains(tool),
        };
        match evaluate_tool_check(&facts) {
            PermissionDecision::Allow | PermissionDecision::AllowConstrained { .. } => {
                self.approved.insert(tool.to_string());
            }
            PermissionDecision::Ask => return Err(format!("tool `{tool}` awaits ask_once approval")),
            PermissionDecision::Deny { reason } => return Err(reason),
        }

        if let Some(command) = &command {
            if let PermissionDecision::Deny { reason } = check_command(&profile.command_access, command) {
                return Err(reason);
            }
        }

        if let Some((path, kind)) = &file_access {
            let decision = match kind {
                FileAccessKind::Read => check_file_read(&profile.file_access, path),
                FileAccessKind::Write => check_file_write(&profile.file_access, path),
            };
            if let PermissionDecision::Deny { reason } = decision {
                return Err(reason);
            }
        }

        Ok(())
    }

    /// Per-step resource accounting, checked once a step's actual usage
    /// (tokens spent, whether it wrote a file) is known.
    fn record_and_check_usage(&self, tokens: u64, api_calls: u32, files_modified: u32) -> Result<(), String> {
        let Some(profile) = &self.profile else {
            return Ok(());
        };
        let mut usage = permissions::ResourceUsage::default();
        permissions::update_usage(&mut usage, tokens, api_calls, files_modified);
        match permissions::check_resource_limits(&profile.resource_limits, &usage) {
            PermissionDecision::Deny { reason } => Err(reason),
            _ => Ok(()),
        }
    }
}

/// Drives a single run of a named workflow against an injected shell port
/// and LLM capability, the same ports `StepExecutor` dispatches onto.
pub struct WorkflowRunner<'a, L: LlmCapability> {
    config: &'a EngineConfig,
    shell: &'a dyn ShellPort<Error = std::io::Error>,
    llm: &'a L,
}

impl<'a, L: LlmCapability> WorkflowRunner<'a, L> {
    pub fn new(
        config: &'a EngineConfig,
        shell: &'a dyn ShellPort<Error = std::io::Error>,
        llm: &'a L,
    ) -> Self {
        Self { config, shell, llm }
    }

    pub fn list_available(&self) -> Vec<String> {
        parser::list_workflows(self.config)
    }

    pub fn run(
        &self,
        name: &str,
        variables: BTreeMap<String, Value>,
        options: RunOptions,
    ) -> WorkflowResult<RunSummary> {
        let workflow = parser::load_workflow(self.config, name)?;
        let permissions = match &workflow.permissions_profile {
            Some(profile_name) => Some(parser::load_permissions_profile(self.config, profile_name)?),
            None => None,
        };
        let dry_run = workflow.settings.dry_run || options.dry_run;
        let started_at = Utc::now();
        let never_log = permissions
            .as_ref()
            .map(|p| p.secrets.never_log.clone())
            .unwrap_or_default();

        let (mut context, mut audit) = match &options.resume_from {
            Some(run_id) => {
                let context = checkpoint::restore(self.config, name, run_id)?;
                let mut audit = AuditLogger::load(self.config, name, run_id, &never_log)?;
                audit.log_resumed()?;
                (context, audit)
            }
            None => {
                let run_id = uuid::Uuid::new_v4().to_string();
                let mut context = WorkflowContext::new(name, run_id.clone());
                seed_variables(&mut context, &workflow, &variables)?;
                let mut audit = AuditLogger::new(self.config, name, &run_id, &never_log);
                audit.log_start()?;
                (context, audit)
            }
        };

        let mut gate = PermissionGate {
            profile: permissions,
            approved: HashSet::new(),
        };

        let max_steps = workflow.settings.max_steps as usize;
        let mut summaries = Vec::new();
        let mut final_state = RunState::Success;
        let mut failure_reason: Option<String> = None;

        'outer: while context.next_step_index() < workflow.steps.len() {
            let index = context.next_step_index();
            if index >= max_steps {
                let reason = format!("max_steps ({max_steps}) exceeded");
                audit.log_budget_exceeded(&reason)?;
                final_state = RunState::Failed;
                failure_reason = Some(reason);
                break;
            }
            let step = &workflow.steps[index];

            if let Some(reason) = budget_violation(&workflow, &context) {
                audit.log_budget_exceeded(&reason)?;
                final_state = RunState::Failed;
                failure_reason = Some(reason);
                break;
            }

            if dry_run {
                audit.log_step_skipped(&step.name, "dry run")?;
                summaries.push(StepSummary {
                    name: step.name.clone(),
                    status: StepStatus::Skipped,
                    duration_ms: 0,
                    error: None,
                });
                context.advance();
                continue;
            }

            match gate.check(step) {
                Ok(()) => {
                    audit.log_permission_check(&step.name, step.kind.label(), "allow")?;
                }
                Err(reason) => {
                    audit.log_permission_check(&step.name, step.kind.label(), "deny")?;
                    audit.log_step_failed(&step.name, &reason)?;
                    summaries.push(StepSummary {
                        name: step.name.clone(),
                        status: StepStatus::Failed,
                        duration_ms: 0,
                        error: Some(reason.clone()),
                    });
                    final_state = RunState::Failed;
                    failure_reason = Some(reason);
                    break 'outer;
                }
            }

            audit.log_step_start(&step.name)?;
            let result = {
                let mut executor = StepExecutor::new(&mut context, self.config, self.shell, self.llm);
                match executor.execute(step) {
                    Ok(result) => result,
                    Err(err) => {
                        let reason = err.to_string();
                        audit.log_step_failed(&step.name, &reason)?;
                        summaries.push(StepSummary {
                            name: step.name.clone(),
                            status: StepStatus::Failed,
                            duration_ms: 0,
                            error: Some(reason.clone()),
                        });
                        final_state = RunState::Failed;
                        failure_reason = Some(reason);
                        break 'outer;
                    }
                }
            };

            summaries.push(StepSummary {
                name: step.name.clone(),
                status: result.status,
                duration_ms: result.duration_ms,
                error: result.error.clone(),
            });

            match result.status {
                StepStatus::Success => {
                    audit.log_step_complete(&step.name, Some(result.data.clone()))?;
                    let api_calls = u32::from(result.tokens_used > 0);
                    let files_modified = u32::from(matches!(
                        step.kind,
                        workflow_kernel::model::StepKind::TemplateOutput { .. }
                    ));
                    if let Err(reason) =
                        gate.record_and_check_usage(result.tokens_used, api_calls, files_modified)
                    {
                        audit.log_budget_exceeded(&reason)?;
                        final_state = RunState::Failed;
                        failure_reason = Some(reason);
                        break 'outer;
                    }
                    context.advance();
                    audit.log_budget_update(context.tokens_used(), context.cost())?;
                    checkpoint::save(self.config, &context)?;
                    audit.log_checkpoint_created()?;
                }
                StepStatus::Skipped => {
                    audit.log_step_skipped(
                        &step.name,
                        result.error.as_deref().unwrap_or("condition was not met"),
                    )?;
                    context.advance();
                    checkpoint::save(self.config, &context)?;
                }
                StepStatus::Failed => {
                    let reason = result.error.clone().unwrap_or_else(|| "step failed".to_string());
                    audit.log_step_failed(&step.name, &reason)?;
                    final_state = RunState::Failed;
                    failure_reason = Some(reason);
                    break 'outer;
                }
                StepStatus::Paused => {
                    audit.log_paused(result.error.as_deref().unwrap_or("awaiting manual review"))?;
                    checkpoint::save(self.config, &context)?;
                    final_state = RunState::Paused;
                    break 'outer;
                }
                StepStatus::Pending | StepStatus::Running => {
                    context.advance();
                }
            }
        }

        match final_state {
            RunState::Success => {
                audit.log_complete()?;
                checkpoint::discard(self.config, name, context.run_id())?;
            }
            RunState::Failed => {
                audit.log_failed(failure_reason.as_deref().unwrap_or("workflow failed"))?;
            }
            _ => {}
        }

        Ok(RunSummary {
            workflow: name.to_string(),
            run_id: context.run_id().to_string(),
            state: final_state,
            started_at,
            completed_at: Some(Utc::now()),
            steps: summaries,
            tokens_used: context.tokens_used(),
            cost: context.cost(),
            estimated: dry_run,
        })
    }
}

/// Applies variable declarations' defaults and required-ness, then layers
/// caller-supplied overrides (which may also introduce undeclared variables).
fn seed_variables(
    context: &mut WorkflowContext,
    workflow: &workflow_kernel::model::WorkflowDefinition,
    variables: &BTreeMap<String, Value>,
) -> WorkflowResult<()> {
    for decl in &workflow.variables {
        let value = variables.get(&decl.name).cloned().or_else(|| decl.default.clone());
        match value {
            Some(v) => context.set_variable(decl.name.clone(), v),
            None if decl.required => {
                return Err(WorkflowError::Validation {
                    workflow: workflow.name.clone(),
                    message: format!("missing required variable `{}`", decl.name),
                });
            }
            None => {}
        }
    }
    for (key, value) in variables {
        if !workflow.variables.iter().any(|decl| &decl.name == key) {
            context.set_variable(key.clone(), value.clone());
        }
    }
    Ok(())
}

fn budget_violation(
    workflow: &workflow_kernel::model::WorkflowDefinition,
    context: &WorkflowContext,
) -> Option<String> {
    let budget = workflow.budget.as_ref()?;
    if let Some(max_tokens) = budget.max_tokens {
        if context.tokens_used() > max_tokens {
            return Some(format!(
                "tokens {} exceeds max_tokens {max_tokens}",
                context.tokens_used()
            ));
        }
    }
    if let Some(max_cost) = budget.max_cost {
        if context.cost() > max_cost {
            return Some(format!("cost {:.4} exceeds max_cost {max_cost:.4}", context.cost()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalShell;
    use std::io::Write;
    use tempfile::TempDir;
    use workflow_kernel::ports::{EventSink, LlmRequest, LlmResponse};

    struct StubLlm {
        tokens_per_call: u64,
    }

    impl LlmCapability for StubLlm {
        type Error = std::convert::Infallible;
        fn complete(&self, request: LlmRequest, _events: &dyn EventSink) -> Result<LlmResponse, Self::Error> {
            Ok(LlmResponse {
                text: format!("echo: {}", request.prompt),
                tokens_used: self.tokens_per_call,
                confidence: Some(95),
            })
        }
    }

    fn write_workflow(config: &EngineConfig, name: &str, contents: &str) {
        std::fs::create_dir_all(&config.workflows_dir).unwrap();
        let mut f = std::fs::File::create(config.workflows_dir.join(format!("{name}.toml"))).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn test_config(tmp: &TempDir) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.workflows_dir = tmp.path().join("definitions");
        config.permissions_dir = tmp.path().join("permissions");
        config.preferences_dir = tmp.path().join("preferences");
        config.logs_dir = tmp.path().join("logs");
        config.checkpoints_dir = tmp.path().join(".checkpoints");
        config
    }

    #[test]
    fn trivial_shell_workflow_succeeds() {
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
        let llm = StubLlm { tokens_per_call: 0 };
        let runner = WorkflowRunner::new(&config, &shell, &llm);
        let summary = runner.run("hello", BTreeMap::new(), RunOptions::default()).unwrap();
        assert_eq!(summary.state, RunState::Success);
        assert_eq!(summary.steps.len(), 1);
        assert_eq!(summary.tokens_used, 0);
        assert!(!checkpoint::has_checkpoint(&config, "hello", &summary.run_id));
    }

    #[test]
    fn max_steps_guard_fails_before_the_extra_step() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        write_workflow(
            &config,
            "two-steps",
            r#"
name = "two-steps"
max_steps = 1

[[steps]]
name = "a"
shell_command = "echo a"

[[steps]]
name = "b"
shell_command = "echo b"
"#,
        );
        let shell = LocalShell;
        let llm = StubLlm { tokens_per_call: 0 };
        let runner = WorkflowRunner::new(&config, &shell, &llm);
        let summary = runner.run("two-steps", BTreeMap::new(), RunOptions::default()).unwrap();
        assert_eq!(summary.state, RunState::Failed);
        assert_eq!(summary.steps.len(), 1);
    }

    #[test]
    fn budget_guard_fails_when_tokens_exceed_max_tokens() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        write_workflow(
            &config,
            "budgeted",
            r#"
name = "budgeted"

[budget]
max_tokens = 5

[[steps]]
name = "ask-once"
llm_prompt = "hello"

[[steps]]
name = "ask-twice"
llm_prompt = "hello again"
"#,
        );
        let shell = LocalShell;
        let llm = StubLlm { tokens_per_call: 10 };
        let runner = WorkflowRunner::new(&config, &shell, &llm);
        let summary = runner.run("budgeted", BTreeMap::new(), RunOptions::default()).unwrap();
        assert_eq!(summary.state, RunState::Failed);
        assert_eq!(summary.steps.len(), 1);
        assert!(checkpoint::has_checkpoint(&config, "budgeted", &summary.run_id));
    }

    #[test]
    fn missing_required_variable_without_default_errors() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        write_workflow(
            &config,
            "needs-var",
            r#"
name = "needs-var"

[[variables]]
name = "target"
required = true

[[steps]]
name = "only"
shell_command = "echo {{target}}"
"#,
        );
        let shell = LocalShell;
        let llm = StubLlm { tokens_per_call: 0 };
        let runner = WorkflowRunner::new(&config, &shell, &llm);
        assert!(runner.run("needs-var", BTreeMap::new(), RunOptions::default()).is_err());
    }

    #[test]
    fn denied_tool_fails_the_run_without_executing_the_step() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        write_workflow(
            &config,
            "locked-down",
            r#"
name = "locked-down"
permissions_profile = "no-shell"

[[steps]]
name = "forbidden"
shell_command = "echo should-not-run"
store_as = "out"
"#,
        );
        std::fs::create_dir_all(&config.permissions_dir).unwrap();
        let mut f = std::fs::File::create(config.permissions_dir.join("no-shell.toml")).unwrap();
        f.write_all(b"name = \"no-shell\"\n").unwrap();

        let shell = LocalShell;
        let llm = StubLlm { tokens_per_call: 0 };
        let runner = WorkflowRunner::new(&config, &shell, &llm);
        let summary = runner.run("locked-down", BTreeMap::new(), RunOptions::default()).unwrap();
        assert_eq!(summary.state, RunState::Failed);
        assert_eq!(summary.steps[0].status, StepStatus::Failed);
    }

    #[test]
    fn template_output_outside_writable_paths_is_denied() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        write_workflow(
            &config,
            "writes-report",
            r#"
name = "writes-report"
permissions_profile = "read-only"

[[steps]]
name = "report"
template_output = "hello"
output_path = "/etc/report.txt"
"#,
        );
        std::fs::create_dir_all(&config.permissions_dir).unwrap();
        let mut f = std::fs::File::create(config.permissions_dir.join("read-only.toml")).unwrap();
        f.write_all(
            br#"name = "read-only"

[file_access]
writable = ["/workspace/**"]
"#,
        )
        .unwrap();

        let shell = LocalShell;
        let llm = StubLlm { tokens_per_call: 0 };
        let runner = WorkflowRunner::new(&config, &shell, &llm);
        let summary = runner.run("writes-report", BTreeMap::new(), RunOptions::default()).unwrap();
        assert_eq!(summary.state, RunState::Failed);
        assert_eq!(summary.steps[0].status, StepStatus::Failed);
    }

    #[test]
    fn per_step_token_limit_fails_the_run_after_the_step_completes() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        write_workflow(
            &config,
            "capped",
            r#"
name = "capped"
permissions_profile = "tight"

[[steps]]
name = "ask"
llm_prompt = "hello"
"#,
        );
        std::fs::create_dir_all(&config.permissions_dir).unwrap();
        let mut f = std::fs::File::create(config.permissions_dir.join("tight.toml")).unwrap();
        f.write_all(
            br#"name = "tight"

[resource_limits]
max_tokens_per_step = 5
"#,
        )
        .unwrap();

        let shell = LocalShell;
        let llm = StubLlm { tokens_per_call: 10 };
        let runner = WorkflowRunner::new(&config, &shell, &llm);
        let summary = runner.run("capped", BTreeMap::new(), RunOptions::default()).unwrap();
        assert_eq!(summary.state, RunState::Failed);
        assert_eq!(summary.steps[0].status, StepStatus::Success);
    }
}

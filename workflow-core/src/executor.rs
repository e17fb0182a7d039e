//! Step execution: model selection, condition/loop/branch control flow,
//! retry and confidence gating, and dispatch onto the shell/LLM capability
//! ports. Grounded closely on the original engine's `ModelSelector` and
//! `StepExecutor`.

use crate::config::EngineConfig;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use workflow_kernel::context::{LogType, WorkflowContext};
use workflow_kernel::interpolation::Interpolator;
use workflow_kernel::model::{
    Complexity, ModelChoice, OnError, OnLowConfidence, Step, StepKind, StepResult, StepStatus,
};
use workflow_kernel::ports::{
    EventSink, LlmCapability, LlmRequest, ShellPort, ShellRequest, ShellResponse,
};
use workflow_kernel::value::Value;
use workflow_kernel::{WorkflowError, WorkflowResult};

/// Step-type default complexity, upgraded to `high` when the step carries a
/// demanding confidence gate or branches.
pub struct ModelSelector;

impl ModelSelector {
    pub fn select(&self, step: &Step) -> &'static str {
        if !matches!(step.model, ModelChoice::Auto) {
            return match step.model {
                ModelChoice::Haiku => "haiku",
                ModelChoice::Sonnet => "sonnet",
                ModelChoice::Opus => "opus",
                ModelChoice::Auto => unreachable!(),
            };
        }

        if let Some(complexity) = step.complexity {
            return Self::complexity_to_model(complexity);
        }

        let mut complexity = step.kind.default_complexity();
        if step.confidence_gate.is_some_and(|g| g > 80) {
            complexity = Complexity::High;
        }
        if matches!(step.kind, StepKind::BranchBlock { .. }) {
            complexity = Complexity::High;
        }
        Self::complexity_to_model(complexity)
    }

    fn complexity_to_model(complexity: Complexity) -> &'static str {
        match complexity {
            Complexity::Low => "haiku",
            Complexity::Medium => "sonnet",
            Complexity::High => "opus",
        }
    }
}

/// Parses `<n>s`/`<n>m`/`<n>h` timeout/delay strings; a bare number is
/// treated as seconds.
pub fn parse_duration(raw: Option<&str>, default: Duration) -> Duration {
    let Some(raw) = raw else { return default };
    let raw = raw.trim();
    let (number, multiplier) = if let Some(n) = raw.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = raw.strip_suffix('h') {
        (n, 3600.0)
    } else {
        (raw, 1.0)
    };
    number
        .parse::<f64>()
        .map(|secs| Duration::from_secs_f64(secs * multiplier))
        .unwrap_or(default)
}

/// Runs a shell command via `sh -c`, matching the original engine's
/// `subprocess.run(..., shell=True)`.
pub struct LocalShell;

impl ShellPort for LocalShell {
    type Error = std::io::Error;

    fn run(&self, request: ShellRequest) -> Result<ShellResponse, Self::Error> {
        let started = Instant::now();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&request.command);
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn()?;

        if let Some(timeout_ms) = request.timeout_ms {
            let deadline = Duration::from_millis(timeout_ms);
            loop {
                if child.try_wait()?.is_some() {
                    break;
                }
                if started.elapsed() > deadline {
                    child.kill()?;
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("command timed out after {timeout_ms}ms"),
                    ));
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }

        let output = child.wait_with_output()?;
        Ok(ShellResponse {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration_ms: started.elapsed().as_millis(),
        })
    }
}

struct TracingSink;

impl EventSink for TracingSink {
    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }
    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }
    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }
}

/// Drives a single workflow run's step-by-step execution against an
/// injected shell port and LLM capability. `context` carries the variable
/// and step-result namespace that both the interpolator and the next
/// scheduled step read from.
pub struct StepExecutor<'a, L: LlmCapability> {
    pub context: &'a mut WorkflowContext,
    pub config: &'a EngineConfig,
    pub shell: &'a dyn ShellPort<Error = std::io::Error>,
    pub llm: &'a L,
    model_selector: ModelSelector,
    events: TracingSink,
}

impl<'a, L: LlmCapability> StepExecutor<'a, L> {
    pub fn new(
        context: &'a mut WorkflowContext,
        config: &'a EngineConfig,
        shell: &'a dyn ShellPort<Error = std::io::Error>,
        llm: &'a L,
    ) -> Self {
        Self {
            context,
            config,
            shell,
            llm,
            model_selector: ModelSelector,
            events: TracingSink,
        }
    }

    pub fn execute(&mut self, step: &Step) -> WorkflowResult<StepResult> {
        self.context.log(LogType::Info, format!("step `{}` started", step.name), Some(step.name.clone()));

        if let Some(condition) = &step.condition {
            let interpolator = Interpolator::new(self.context);
            let met = interpolator.evaluate(condition)?;
            if !met {
                self.context.log(LogType::Info, format!("condition not met: {condition}"), Some(step.name.clone()));
                return Ok(StepResult {
                    status: StepStatus::Skipped,
                    ..StepResult::pending()
                });
            }
        }

        if let Some(loop_expr) = &step.r#loop {
            return self.execute_loop(step, loop_expr);
        }

        if let StepKind::BranchBlock { branch_block } = &step.kind {
            return self.execute_branch(step, branch_block);
        }

        let model = self.model_selector.select(step).to_string();
        let result = self.execute_with_retry(step, &model)?;

        let result = if let Some(gate) = step.confidence_gate {
            if result.status == StepStatus::Success {
                self.check_confidence_gate(step, gate, result)
            } else {
                result
            }
        } else {
            result
        };

        if let Some(store_as) = &step.store_as {
            if result.status == StepStatus::Success {
                self.context.set_variable(store_as.clone(), result.data.clone());
                self.context.record_step_result(step.name.clone(), result.clone());
            }
        }

        Ok(result)
    }

    fn execute_with_retry(&mut self, step: &Step, model: &str) -> WorkflowResult<StepResult> {
        let max_retries = step.retry_count;
        let delay = parse_duration(step.retry_delay.as_deref(), Duration::ZERO);

        let mut attempt = 0;
        loop {
            let result = self.dispatch(step, model);
            if result.status == StepStatus::Success {
                return Ok(result);
            }
            if attempt < max_retries {
                self.context.log(
                    LogType::Warn,
                    format!("step `{}` failed, retrying ({}/{max_retries})", step.name, attempt + 1),
                    Some(step.name.clone()),
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
                continue;
            }
            return Ok(self.handle_error(step, result));
        }
    }

    fn handle_error(&mut self, step: &Step, mut result: StepResult) -> StepResult {
        match step.on_error {
            OnError::Skip => {
                result.status = StepStatus::Skipped;
                self.context.log(LogType::Info, format!("skipping failed step: {}", step.name), Some(step.name.clone()));
            }
            OnError::Continue => {
                self.context.log(LogType::Warn, format!("continuing after error: {}", step.name), Some(step.name.clone()));
            }
            OnError::Pause => {
                result.status = StepStatus::Paused;
            }
            OnError::Retry | OnError::Abort => {}
        }
        result
    }

    fn check_confidence_gate(&mut self, step: &Step, gate: u8, mut result: StepResult) -> StepResult {
        let Some(confidence) = result.confidence else {
            self.context.log(
                LogType::Warn,
                format!("no confidence score for gated step: {}", step.name),
                Some(step.name.clone()),
            );
            return result;
        };
        if confidence < gate {
            self.context.log(
                LogType::Warn,
                format!("confidence {confidence}% below gate {gate}% for step `{}`", step.name),
                Some(step.name.clone()),
            );
            match step.on_low_confidence {
                OnLowConfidence::Retry | OnLowConfidence::Abort => {
                    result.status = StepStatus::Failed;
                    result.error = Some(format!("confidence too low: {confidence}%"));
                }
                OnLowConfidence::ManualReview => {
                    result.status = StepStatus::Paused;
                    self.context.log(
                        LogType::Info,
                        format!("manual review required: confidence {confidence}%"),
                        Some(step.name.clone()),
                    );
                }
            }
        }
        result
    }

    /// Resolve a template string against the current context. Scoped to a
    /// single call so the borrow on `self.context` never outlives it,
    /// letting callers follow up with a `&mut self` dispatch.
    fn interpolate(&self, template: &str) -> Result<String, WorkflowError> {
        Interpolator::new(self.context).interpolate(template)
    }

    fn dispatch(&mut self, step: &Step, model: &str) -> StepResult {
        match &step.kind {
            StepKind::ShellCommand { shell_command } => {
                let command = match self.interpolate(shell_command) {
                    Ok(c) => c,
                    Err(e) => return failed(e.to_string()),
                };
                self.run_shell(&command, step.timeout.as_deref())
            }
            StepKind::ScriptPath { script_path } => {
                let path = match self.interpolate(script_path) {
                    Ok(p) => p,
                    Err(e) => return failed(e.to_string()),
                };
                self.run_script(&path, step.timeout.as_deref())
            }
            StepKind::SlashCommand { slash_command } => {
                let command = match self.interpolate(slash_command) {
                    Ok(c) => c,
                    Err(e) => return failed(e.to_string()),
                };
                let prompt = format!("Execute this command and return the result: {command}");
                self.run_llm(&prompt, model, step.timeout.as_deref())
            }
            StepKind::LlmPrompt { llm_prompt } => {
                let prompt = match self.interpolate(llm_prompt) {
                    Ok(p) => p,
                    Err(e) => return failed(e.to_string()),
                };
                self.run_llm(&prompt, model, step.timeout.as_deref())
            }
            StepKind::AgentInvocation { agent_invocation } => {
                self.run_named_prompt(self.config.agents_dir.clone(), agent_invocation, model, step)
            }
            StepKind::FrameworkInvocation { framework_invocation } => {
                self.run_named_prompt(self.config.frameworks_dir.clone(), framework_invocation, model, step)
            }
            StepKind::TemplateOutput { template_output } => self.run_output(template_output, step),
            StepKind::BranchBlock { .. } => failed("branch_block dispatched outside execute_branch".to_string()),
        }
    }

    fn run_shell(&mut self, command: &str, timeout: Option<&str>) -> StepResult {
        self.context.log(LogType::Info, format!("executing shell: {command}"), None);
        let timeout_ms = parse_duration(timeout, Duration::from_secs(120)).as_millis() as u64;
        match self.shell.run(ShellRequest {
            command: command.to_string(),
            working_dir: None,
            timeout_ms: Some(timeout_ms),
        }) {
            Ok(response) if response.exit_code == 0 => StepResult {
                status: StepStatus::Success,
                data: serde_json::json!({
                    "stdout": response.stdout,
                    "stderr": response.stderr,
                    "exit_code": response.exit_code,
                }),
                duration_ms: response.duration_ms as u64,
                ..StepResult::pending()
            },
            Ok(response) => StepResult {
                status: StepStatus::Failed,
                data: serde_json::json!({"stdout": response.stdout, "stderr": response.stderr}),
                error: Some(format!("exit code {}: {}", response.exit_code, response.stderr)),
                duration_ms: response.duration_ms as u64,
                ..StepResult::pending()
            },
            Err(e) => failed(e.to_string()),
        }
    }

    fn run_script(&mut self, path: &str, timeout: Option<&str>) -> StepResult {
        self.context.log(LogType::Info, format!("executing script: {path}"), None);
        let started = Instant::now();
        let mut cmd = Command::new(path);
        for (key, value) in self.context.get_all() {
            cmd.env(format!("WORKFLOW_{}", key.to_uppercase()), stringify_env(&value));
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let timeout_ms = parse_duration(timeout, Duration::from_secs(300)).as_millis() as u64;
        let output = match run_with_timeout(cmd, timeout_ms) {
            Ok(o) => o,
            Err(e) => return failed(e.to_string()),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return StepResult {
                status: StepStatus::Failed,
                data: serde_json::json!({"stdout": stdout, "stderr": stderr}),
                error: Some(format!("script failed: {stderr}")),
                duration_ms,
                ..StepResult::pending()
            };
        }
        StepResult {
            status: StepStatus::Success,
            data: Value::String(stdout),
            duration_ms,
            ..StepResult::pending()
        }
    }

    fn run_llm(&mut self, prompt: &str, model: &str, timeout: Option<&str>) -> StepResult {
        self.context.log(LogType::Info, format!("executing prompt with {model}"), None);
        let started = Instant::now();
        let timeout_ms = parse_duration(timeout, Duration::from_secs(300)).as_millis() as u64;
        match self.llm.complete(
            LlmRequest {
                prompt: prompt.to_string(),
                model: model.to_string(),
                timeout_ms: Some(timeout_ms),
            },
            &self.events,
        ) {
            Ok(response) => {
                self.context.add_tokens(response.tokens_used, model);
                StepResult {
                    status: StepStatus::Success,
                    data: Value::String(response.text.trim().to_string()),
                    confidence: response.confidence,
                    tokens_used: response.tokens_used,
                    duration_ms: started.elapsed().as_millis() as u64,
                    model_used: Some(model.to_string()),
                    ..StepResult::pending()
                }
            }
            Err(e) => failed(e.to_string()),
        }
    }

    fn run_named_prompt(
        &mut self,
        dir: std::path::PathBuf,
        name: &str,
        model: &str,
        step: &Step,
    ) -> StepResult {
        let descriptor_path = dir.join(format!("{name}.md"));
        let descriptor = match std::fs::read_to_string(&descriptor_path) {
            Ok(d) => d,
            Err(_) => return failed(format!("agent/framework descriptor not found: {name}")),
        };
        let body = match step.description.as_deref() {
            Some(d) => match self.interpolate(d) {
                Ok(b) => b,
                Err(e) => return failed(e.to_string()),
            },
            None => String::new(),
        };
        let prompt = format!("{descriptor}\n\n---\n\n{body}");
        self.run_llm(&prompt, model, step.timeout.as_deref())
    }

    fn run_output(&mut self, template: &str, step: &Step) -> StepResult {
        let Some(output_path) = &step.output_path else {
            return failed("template_output step missing output_path".to_string());
        };
        let resolved_path = match self.interpolate(output_path) {
            Ok(p) => p,
            Err(e) => return failed(e.to_string()),
        };
        let content = match self.interpolate(template) {
            Ok(c) => c,
            Err(e) => return failed(e.to_string()),
        };
        self.context.log(LogType::Info, format!("writing output: {resolved_path}"), None);
        let path = std::path::PathBuf::from(&resolved_path);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return failed(e.to_string());
            }
        }
        if let Err(e) = std::fs::write(&path, &content) {
            return failed(e.to_string());
        }
        StepResult {
            status: StepStatus::Success,
            data: serde_json::json!({"path": resolved_path, "size": content.len()}),
            ..StepResult::pending()
        }
    }

    fn execute_loop(&mut self, step: &Step, loop_expr: &str) -> WorkflowResult<StepResult> {
        let items = {
            let interpolator = Interpolator::new(self.context);
            interpolator.resolve(loop_expr)?
        };
        let Value::Array(items) = items else {
            return Err(WorkflowError::StepExecution {
                step: step.name.clone(),
                reason: format!("loop expression must resolve to a list: {loop_expr}"),
            });
        };

        let loop_var = step.loop_alias.clone().unwrap_or_else(|| "item".to_string());
        let mut results = Vec::new();

        for (index, item) in items.iter().enumerate() {
            self.context.log(
                LogType::Info,
                format!("loop iteration {}/{}", index + 1, items.len()),
                Some(step.name.clone()),
            );
            self.context.set_variable(loop_var.clone(), item.clone());
            self.context.set_variable("loop_index", serde_json::json!(index));

            let mut inner = step.clone();
            inner.name = format!("{}[{index}]", step.name);
            inner.r#loop = None;
            inner.store_as = None;

            let result = self.execute(&inner)?;
            let failed = result.status != StepStatus::Success;
            results.push(result.data);

            if failed && step.on_error == OnError::Abort {
                return Ok(StepResult {
                    status: StepStatus::Failed,
                    data: Value::Array(results),
                    error: Some(format!("loop failed at iteration {index}")),
                    ..StepResult::pending()
                });
            }
        }

        Ok(StepResult {
            status: StepStatus::Success,
            data: Value::Array(results),
            ..StepResult::pending()
        })
    }

    fn execute_branch(&mut self, step: &Step, arms: &[workflow_kernel::model::BranchArm]) -> WorkflowResult<StepResult> {
        for arm in arms {
            let matched = {
                let interpolator = Interpolator::new(self.context);
                interpolator
                    .evaluate(&arm.condition)
                    .map_err(|e| WorkflowError::ConditionEvaluation {
                        condition: arm.condition.clone(),
                        reason: e.to_string(),
                    })?
            };
            if !matched {
                continue;
            }
            self.context.log(LogType::Info, format!("branch matched: {}", arm.condition), Some(step.name.clone()));
            for branch_step in &arm.steps {
                let result = self.execute(branch_step)?;
                if result.status != StepStatus::Success && step.on_error == OnError::Abort {
                    return Ok(result);
                }
            }
            return Ok(StepResult {
                status: StepStatus::Success,
                data: serde_json::json!({"branch": arm.condition}),
                ..StepResult::pending()
            });
        }
        self.context.log(LogType::Info, "no branch condition matched".to_string(), Some(step.name.clone()));
        Ok(StepResult {
            status: StepStatus::Skipped,
            ..StepResult::pending()
        })
    }
}

fn failed(reason: String) -> StepResult {
    StepResult {
        status: StepStatus::Failed,
        error: Some(reason),
        ..StepResult::pending()
    }
}

fn stringify_env(value: &Value) -> String {
    workflow_kernel::value::stringify(value)
}

fn run_with_timeout(mut cmd: Command, timeout_ms: u64) -> std::io::Result<std::process::Output> {
    let started = Instant::now();
    let mut child = cmd.spawn()?;
    loop {
        if child.try_wait()?.is_some() {
            break;
        }
        if started.elapsed() > Duration::from_millis(timeout_ms) {
            child.kill()?;
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "script timed out"));
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    child.wait_with_output()
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_kernel::model::StepKind;
    use workflow_kernel::ports::LlmResponse;

    struct StubLlm;
    impl LlmCapability for StubLlm {
        type Error = std::convert::Infallible;
        fn complete(&self, request: LlmRequest, _events: &dyn EventSink) -> Result<LlmResponse, Self::Error> {
            Ok(LlmResponse {
                text: format!("echo: {}", request.prompt),
                tokens_used: 10,
                confidence: Some(90),
            })
        }
    }

    fn step(name: &str, kind: StepKind) -> Step {
        Step {
            name: name.to_string(),
            description: None,
            kind,
            condition: None,
            r#loop: None,
            loop_alias: None,
            depends_on: None,
            parallel: false,
            store_as: None,
            output_path: None,
            template: None,
            confidence_gate: None,
            on_low_confidence: OnLowConfidence::default(),
            model: ModelChoice::default(),
            complexity: None,
            on_error: OnError::default(),
            retry_count: 0,
            retry_delay: None,
            timeout: None,
        }
    }

    #[test]
    fn model_selector_upgrades_to_opus_on_high_confidence_gate() {
        let mut s = step("gated", StepKind::ShellCommand { shell_command: "echo hi".into() });
        s.confidence_gate = Some(95);
        assert_eq!(ModelSelector.select(&s), "opus");
    }

    #[test]
    fn model_selector_honors_explicit_model() {
        let mut s = step("explicit", StepKind::ShellCommand { shell_command: "echo hi".into() });
        s.model = ModelChoice::Haiku;
        s.confidence_gate = Some(95);
        assert_eq!(ModelSelector.select(&s), "haiku");
    }

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration(Some("30s"), Duration::ZERO), Duration::from_secs(30));
        assert_eq!(parse_duration(Some("2m"), Duration::ZERO), Duration::from_secs(120));
        assert_eq!(parse_duration(None, Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn shell_step_runs_and_stores_result() {
        let mut context = WorkflowContext::new("wf", "run-1");
        let config = EngineConfig::default();
        let shell = LocalShell;
        let llm = StubLlm;
        let mut executor = StepExecutor::new(&mut context, &config, &shell, &llm);
        let mut s = step("echo", StepKind::ShellCommand { shell_command: "echo hello".into() });
        s.store_as = Some("greeting".to_string());
        let result = executor.execute(&s).unwrap();
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.data["stdout"], serde_json::json!("hello"));
        assert_eq!(context.get("greeting").unwrap()["stdout"], serde_json::json!("hello"));
    }

    #[test]
    fn condition_false_skips_step() {
        let mut context = WorkflowContext::new("wf", "run-1");
        context.set_variable("go", serde_json::json!(false));
        let config = EngineConfig::default();
        let shell = LocalShell;
        let llm = StubLlm;
        let mut executor = StepExecutor::new(&mut context, &config, &shell, &llm);
        let mut s = step("maybe", StepKind::ShellCommand { shell_command: "echo hi".into() });
        s.condition = Some("{{go}} == true".to_string());
        let result = executor.execute(&s).unwrap();
        assert_eq!(result.status, StepStatus::Skipped);
    }

    #[test]
    fn low_confidence_retry_policy_fails_the_step() {
        let mut context = WorkflowContext::new("wf", "run-1");
        let config = EngineConfig::default();
        let shell = LocalShell;
        let llm = StubLlm;
        let mut executor = StepExecutor::new(&mut context, &config, &shell, &llm);
        let mut s = step("ask", StepKind::LlmPrompt { llm_prompt: "hi".into() });
        s.confidence_gate = Some(95);
        s.on_low_confidence = OnLowConfidence::Retry;
        let result = executor.execute(&s).unwrap();
        assert_eq!(result.status, StepStatus::Failed);
    }

    #[test]
    fn llm_step_with_store_as_counts_tokens_once() {
        let mut context = WorkflowContext::new("wf", "run-1");
        let config = EngineConfig::default();
        let shell = LocalShell;
        let llm = StubLlm;
        let mut executor = StepExecutor::new(&mut context, &config, &shell, &llm);
        let mut s = step("ask", StepKind::LlmPrompt { llm_prompt: "hi".into() });
        s.store_as = Some("answer".to_string());
        executor.execute(&s).unwrap();
        assert_eq!(context.tokens_used(), 10);
    }

    #[test]
    fn loop_runs_once_per_item() {
        let mut context = WorkflowContext::new("wf", "run-1");
        context.set_variable("items", serde_json::json!(["a", "b", "c"]));
        let config = EngineConfig::default();
        let shell = LocalShell;
        let llm = StubLlm;
        let mut executor = StepExecutor::new(&mut context, &config, &shell, &llm);
        let mut s = step("each", StepKind::ShellCommand { shell_command: "echo {{item}}".into() });
        s.r#loop = Some("items".to_string());
        let result = executor.execute(&s).unwrap();
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.data.as_array().unwrap().len(), 3);
    }
}

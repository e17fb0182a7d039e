//! Concrete `LlmCapability`: shells out to a configured CLI the same way the
//! teacher's agent invocation does, rather than calling an HTTP API directly.
//! The subprocess receives the prompt on stdin and its stdout is treated as
//! the full response text.

use regex::Regex;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use workflow_kernel::ports::{EventSink, LlmCapability, LlmRequest, LlmResponse};

fn confidence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[confidence:\s*(\d+)\]").expect("valid regex"))
}

/// Extract a `[confidence: NN]` marker from response text, case-insensitively.
pub fn extract_confidence(text: &str) -> Option<u8> {
    let lower = text.to_lowercase();
    confidence_pattern()
        .captures(&lower)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
}

/// No real token accounting is available from a plain subprocess's stdout, so
/// token usage is approximated from response length (roughly 4 chars/token,
/// the same rough ratio the original engine's fallback estimator used).
pub fn estimate_tokens(prompt: &str, response: &str) -> u64 {
    ((prompt.len() + response.len()) / 4) as u64
}

#[derive(Debug, thiserror::Error)]
pub enum CliLlmError {
    #[error("failed to spawn llm command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("llm command `{command}` exited with status {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("llm command timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Invokes `command` (e.g. `["claude", "-p"]`) as a subprocess for every
/// completion, piping the prompt in on stdin and reading the reply from
/// stdout. Mirrors the teacher's pattern of treating an external CLI as the
/// model boundary instead of linking against a provider SDK.
pub struct CliLlm {
    command: Vec<String>,
}

impl CliLlm {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl LlmCapability for CliLlm {
    type Error = CliLlmError;

    fn complete(&self, request: LlmRequest, events: &dyn EventSink) -> Result<LlmResponse, Self::Error> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(CliLlmError::Spawn {
                command: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty llm command"),
            });
        };

        events.info(&format!("invoking `{}` with model {}", program, request.model));
        let started = Instant::now();

        let mut child = Command::new(program)
            .args(args)
            .env("WORKFLOW_MODEL", &request.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CliLlmError::Spawn {
                command: program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(request.prompt.as_bytes());
        }

        if let Some(timeout_ms) = request.timeout_ms {
            let deadline = Duration::from_millis(timeout_ms);
            let start = Instant::now();
            loop {
                if let Ok(Some(_)) = child.try_wait() {
                    break;
                }
                if start.elapsed() > deadline {
                    let _ = child.kill();
                    return Err(CliLlmError::Timeout { timeout_ms });
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }

        let output = child.wait_with_output().map_err(|source| CliLlmError::Spawn {
            command: program.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            events.error(&stderr);
            return Err(CliLlmError::NonZeroExit {
                command: program.clone(),
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let duration_ms = started.elapsed().as_millis();
        events.info(&format!("llm call finished in {duration_ms}ms"));

        let confidence = extract_confidence(&stdout);
        let tokens_used = estimate_tokens(&request.prompt, &stdout);

        Ok(LlmResponse {
            text: stdout,
            tokens_used,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;
    impl EventSink for NullSink {
        fn info(&self, _message: &str) {}
        fn warn(&self, _message: &str) {}
        fn error(&self, _message: &str) {}
    }

    #[test]
    fn extracts_confidence_case_insensitively() {
        assert_eq!(extract_confidence("all good [Confidence: 92]"), Some(92));
        assert_eq!(extract_confidence("no marker here"), None);
    }

    #[test]
    fn estimates_tokens_from_combined_length() {
        assert_eq!(estimate_tokens("abcd", "abcd"), 2);
    }

    #[test]
    fn cat_echoes_prompt_back_as_response() {
        let llm = CliLlm::new(vec!["cat".to_string()]);
        let request = LlmRequest {
            prompt: "hello [confidence: 77]".to_string(),
            model: "claude-haiku".to_string(),
            timeout_ms: Some(5_000),
        };
        let response = llm.complete(request, &NullSink).unwrap();
        assert_eq!(response.text.trim(), "hello [confidence: 77]");
        assert_eq!(response.confidence, Some(77));
    }
}

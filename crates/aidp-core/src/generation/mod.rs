//! Generation-CLI executor: spawns the configured coding-agent CLI as a
//! subprocess, streams its JSONL output, and wraps the call in a
//! self-healing envelope.
//!
//! Grounded on `harness::claude_code::ClaudeCodeAdapter`'s subprocess /
//! JSONL-parsing mechanics, but collapsed from a `Harness` trait + registry
//! down to a single concrete executor: this pipeline only ever talks to one
//! generation-CLI backend, so the indirection the teacher needed to support
//! multiple backends (Claude Code, Codex, ...) has no job to do here.
//!
//! The outer envelope is an up-to-three-try [`retry::with_backoff`] loop
//! (2s, then 4s) rather than bespoke recursion: every kind of failure gets
//! the full retry schedule, but only a self-healable kind gets a
//! diagnose-and-fix call seeded into the next try's instructions.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use aidp_broker::models::AgentKind;

use crate::error::{classify, ErrorKind};
use crate::retry::{self, RetryPolicy};

/// Three total tries, with 2s then 4s between them, per the self-healing
/// envelope's specified schedule.
const GENERATION_RETRY_POLICY: RetryPolicy = RetryPolicy {
    max_retries: 2,
    base_delay: Duration::from_secs(2),
    max_delay: Duration::from_secs(4),
    exponential_base: 2.0,
};

/// One parsed line of generation-CLI stream-json output.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Message { role: String, content: String },
    ToolCall { tool: String, input: serde_json::Value },
    ToolResult { tool: String, output: serde_json::Value },
    Error { message: String },
}

/// Everything needed to invoke the generation CLI for one task.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub repo: String,
    pub issue: u64,
    pub agent_kind: AgentKind,
    pub instructions: String,
    pub working_dir: PathBuf,
    pub env_vars: HashMap<String, String>,
}

/// Outcome of a (possibly self-healed) generation run.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub events: Vec<GenerationEvent>,
    pub final_message: Option<String>,
    pub healed: bool,
}

fn parse_stream_json_line(line: &str) -> anyhow::Result<Vec<GenerationEvent>> {
    let v: serde_json::Value = serde_json::from_str(line)?;
    let mut events = Vec::new();
    let event_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match event_type {
        "assistant" => {
            if let Some(content_arr) = v
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
            {
                for block in content_arr {
                    match block.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                        "text" => {
                            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                events.push(GenerationEvent::Message {
                                    role: "assistant".to_owned(),
                                    content: text.to_owned(),
                                });
                            }
                        }
                        "tool_use" => {
                            let tool = block
                                .get("name")
                                .and_then(|n| n.as_str())
                                .unwrap_or("unknown")
                                .to_owned();
                            let input = block.get("input").cloned().unwrap_or(serde_json::Value::Null);
                            events.push(GenerationEvent::ToolCall { tool, input });
                        }
                        _ => {}
                    }
                }
            }
        }
        "tool_result" => {
            let tool = v
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("unknown")
                .to_owned();
            let output = v.get("output").cloned().unwrap_or(serde_json::Value::Null);
            events.push(GenerationEvent::ToolResult { tool, output });
        }
        "result" => {
            if let Some(text) = v.get("result").and_then(|r| r.as_str()) {
                events.push(GenerationEvent::Message {
                    role: "assistant".to_owned(),
                    content: text.to_owned(),
                });
            }
        }
        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .or_else(|| v.get("message").and_then(|m| m.as_str()))
                .unwrap_or("unknown error")
                .to_owned();
            events.push(GenerationEvent::Error { message });
        }
        _ => {}
    }

    Ok(events)
}

/// Invokes the configured generation-CLI binary and applies the
/// diagnose-and-retry self-healing envelope on failure.
#[derive(Clone)]
pub struct GenerationExecutor {
    binary_path: String,
    timeout: Duration,
    retry_policy: RetryPolicy,
}

impl GenerationExecutor {
    pub fn new(binary_path: impl Into<String>, timeout: Duration) -> Self {
        Self { binary_path: binary_path.into(), timeout, retry_policy: GENERATION_RETRY_POLICY }
    }

    /// Override the retry schedule. Only meant for tests that can't afford
    /// to sleep through the real 2s/4s backoff.
    #[cfg(test)]
    fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Run a generation request end to end under the self-healing envelope:
    /// up to `retry_policy.max_retries + 1` total generation-CLI
    /// invocations, every one of them retried on the same backoff schedule
    /// regardless of error kind, but with a diagnose-and-fix call seeded
    /// into the next try's instructions only when the failure is
    /// self-healable and a retry still remains -- a non-healable kind (auth,
    /// permission) still gets the full retry schedule, it just never gets a
    /// diagnosis call spent on it.
    pub async fn run(&self, request: &GenerationRequest) -> Result<GenerationOutcome, ErrorKind> {
        let attempt = Cell::new(0u32);
        let healed = Cell::new(false);
        let instructions = RefCell::new(request.instructions.clone());

        retry::with_backoff("generation", self.retry_policy, || async {
            let attempt_no = attempt.get();
            attempt.set(attempt_no + 1);
            let current_instructions = instructions.borrow().clone();

            let invoke = self.invoke_once(&current_instructions, request).await;
            let (events, error_message) = match invoke {
                Ok(events) => {
                    let failure = events.iter().find_map(|e| match e {
                        GenerationEvent::Error { message } => Some(message.clone()),
                        _ => None,
                    });
                    (events, failure)
                }
                Err(spawn_err) => (Vec::new(), Some(spawn_err)),
            };

            let Some(message) = error_message else {
                let final_message = events.iter().rev().find_map(|e| match e {
                    GenerationEvent::Message { content, .. } => Some(content.clone()),
                    _ => None,
                });
                return Ok(GenerationOutcome { events, final_message, healed: healed.get() });
            };

            let kind = classify(&message);
            let retry_remains = attempt_no < self.retry_policy.max_retries;

            if retry_remains && kind.may_self_heal() {
                info!(repo = %request.repo, issue = request.issue, error = %message, "attempting self-heal");
                let diagnosis = self.diagnose(request, &message).await;
                let healed_instructions = match diagnosis {
                    Ok(diagnosis) => format!(
                        "{current_instructions}\n\nA previous attempt failed with: {message}\n\nDiagnosis: {diagnosis}\n\nApply the fix and complete the task."
                    ),
                    Err(_) => format!(
                        "{current_instructions}\n\nA previous attempt failed with: {message}\n\nDiagnose the root cause yourself and apply a fix."
                    ),
                };
                *instructions.borrow_mut() = healed_instructions;
                healed.set(true);
            } else {
                warn!(repo = %request.repo, issue = request.issue, error = %message, "generation failed");
            }

            Err(kind)
        })
        .await
    }

    /// A second, bounded subprocess call asking the generation CLI to
    /// diagnose (not fix) the failure, used only to seed the retry prompt.
    /// Deliberately a separate process invocation rather than `send()` into
    /// the original one: the original process has already exited by the
    /// time its failure is observed.
    async fn diagnose(&self, request: &GenerationRequest, error_message: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "The following command failed:\n{error_message}\n\nIn one or two sentences, diagnose the root cause. Do not attempt a fix."
        );
        let events = self.invoke_once(&prompt, request).await.map_err(anyhow::Error::msg)?;
        events
            .into_iter()
            .find_map(|e| match e {
                GenerationEvent::Message { content, .. } => Some(content),
                _ => None,
            })
            .ok_or_else(|| anyhow::anyhow!("diagnosis produced no message"))
    }

    async fn invoke_once(
        &self,
        instructions: &str,
        request: &GenerationRequest,
    ) -> Result<Vec<GenerationEvent>, String> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--append-system-prompt")
            .arg(instructions)
            .current_dir(&request.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null());
        for (key, value) in &request.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| format!("failed to spawn generation CLI: {e}"))?;
        let stdout = child.stdout.take().ok_or_else(|| "no stdout on generation CLI child".to_owned())?;
        let mut lines = BufReader::new(stdout).lines();

        let mut events = Vec::new();
        let read_loop = async {
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_stream_json_line(trimmed) {
                    Ok(parsed) => events.extend(parsed),
                    Err(e) => warn!(line = trimmed, error = %e, "skipping malformed generation-CLI line"),
                }
            }
        };

        if tokio::time::timeout(self.timeout, read_loop).await.is_err() {
            let _ = child.kill().await;
            return Err(format!("generation CLI timed out after {:?}", self.timeout));
        }

        let _ = child.wait().await;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(working_dir: &std::path::Path) -> GenerationRequest {
        GenerationRequest {
            repo: "acme/widgets".to_owned(),
            issue: 42,
            agent_kind: AgentKind::Backend,
            instructions: "implement the feature".to_owned(),
            working_dir: working_dir.to_path_buf(),
            env_vars: HashMap::new(),
        }
    }

    fn executable_script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[test]
    fn parses_assistant_and_result_events() {
        let events = parse_stream_json_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}"#,
        )
        .unwrap();
        assert_eq!(
            events[0],
            GenerationEvent::Message { role: "assistant".into(), content: "hi".into() }
        );
    }

    #[tokio::test]
    async fn successful_run_returns_final_message_and_not_healed() {
        let tmp = tempfile::tempdir().unwrap();
        let script = executable_script(
            tmp.path(),
            "ok.sh",
            "#!/bin/sh\necho '{\"type\":\"result\",\"result\":\"done\"}'\n",
        );
        let executor = GenerationExecutor::new(script.to_str().unwrap(), Duration::from_secs(5));
        let outcome = executor.run(&request(tmp.path())).await.unwrap();
        assert_eq!(outcome.final_message.as_deref(), Some("done"));
        assert!(!outcome.healed);
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            exponential_base: 1.0,
        }
    }

    #[tokio::test]
    async fn auth_failure_still_retries_the_full_schedule_but_is_never_healed() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = tmp.path().join("calls");
        std::fs::write(&calls, "").unwrap();
        let script = executable_script(
            tmp.path(),
            "auth_fail.sh",
            &format!(
                "#!/bin/sh\nprintf x >> {}\necho '{{\"type\":\"error\",\"error\":{{\"message\":\"401 authentication failed\"}}}}'\n",
                calls.display()
            ),
        );
        let executor =
            GenerationExecutor::new(script.to_str().unwrap(), Duration::from_secs(5))
                .with_retry_policy(fast_policy());
        let result = executor.run(&request(tmp.path())).await;
        assert_eq!(result.unwrap_err(), ErrorKind::UpstreamAuthentication);
        // Full retry schedule (initial + 2 retries) still runs even though
        // this kind is never eligible for a diagnose-and-fix call.
        assert_eq!(std::fs::read_to_string(&calls).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_module_failure_heals_between_tries_then_still_fails() {
        let tmp = tempfile::tempdir().unwrap();
        // Every invocation fails the same way, so every healed retry also
        // fails -- this exercises the "heal on every eligible retry, then
        // surface" path, with the diagnose-and-fix CLI call reusing the same
        // script.
        let script = executable_script(
            tmp.path(),
            "always_fail.sh",
            "#!/bin/sh\necho '{\"type\":\"error\",\"error\":{\"message\":\"ModuleNotFoundError: no module named foo\"}}'\n",
        );
        let executor =
            GenerationExecutor::new(script.to_str().unwrap(), Duration::from_secs(5))
                .with_retry_policy(fast_policy());
        let result = executor.run(&request(tmp.path())).await;
        assert_eq!(result.unwrap_err(), ErrorKind::GenerationFailed);
    }

    #[tokio::test]
    async fn binary_not_found_is_generic_error_kind() {
        let executor = GenerationExecutor::new("/nonexistent/binary/path", Duration::from_secs(5))
            .with_retry_policy(fast_policy());
        let result = executor.run(&request(std::path::Path::new("/tmp"))).await;
        assert!(result.is_err());
    }
}

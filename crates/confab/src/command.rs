//! Runs executables as agent tools.
//!
//! Any executable can become a tool by honoring a small stdio protocol:
//! given input that does not parse as JSON it prints a JSON descriptor
//! `{name, description, schema}` on stdout and exits with code 2. Given a
//! JSON payload it does its work and prints a JSON result, exiting 0 on
//! success. Discovery happens once per executable at startup; after that
//! every tool call is one process run.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use indoc::indoc;
use kill_tree::{blocking::kill_tree_with_config, Config};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};
use crate::systems::System;

/// Probe input that asks a command for its descriptor. Any text that
/// reliably fails JSON parsing would do; this is the conventional one.
pub const HELP_SENTINEL: &str = "help";

/// Exit code a command must use when answering the probe. Distinct from 0
/// (success) and every other non-zero code (runtime failure); do not
/// conflate it with ordinary failures.
pub const HELP_EXIT_CODE: i32 = 2;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Appended to every tool description so the model knows in advance what
/// a failed call looks like.
const DESCRIPTION_TRAILER: &str = indoc! {"
    This tool only accepts JSON input and produces only JSON output.
    When the tool call fails, the following JSON will be returned:
      error: true
      returncode: exit code of call
      message: error message
"};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command: {executable} failed to start: {source}")]
    Spawn {
        executable: String,
        source: std::io::Error,
    },

    #[error("command: {executable} io error: {source}")]
    Io {
        executable: String,
        source: std::io::Error,
    },

    #[error("command: {executable} timed out after {} seconds", .timeout.as_secs())]
    Timeout {
        executable: String,
        timeout: Duration,
    },

    #[error("command: {executable} failed to display help: {stderr}")]
    Help { executable: String, stderr: String },

    #[error("command: {executable} help is not valid JSON: {source}")]
    InvalidHelp {
        executable: String,
        source: serde_json::Error,
    },

    #[error("command: {executable} should have {field} in help")]
    MissingHelpField {
        executable: String,
        field: &'static str,
    },

    #[error("command: {executable} has invalid tool name: {name}")]
    InvalidName { executable: String, name: String },
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl Output {
    /// True when the command exited zero.
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// The self-description a command prints when probed with the sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// The JSON a failing tool call produces in place of output. The model
/// sees this as the tool result; nothing about the failure is raised.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorPayload {
    pub error: bool,
    pub message: String,
    pub returncode: i32,
}

/// A configured executable the agent can run.
///
/// The executable string may reference environment variables; it is
/// expanded and then quoted as a single shell word, so a path containing
/// spaces is still one command. The string is trusted configuration, not
/// a sandboxing boundary.
#[derive(Debug, Clone)]
pub struct Command {
    executable: String,
    timeout: Duration,
    env: Option<HashMap<String, String>>,
}

impl Command {
    pub fn new<E: Into<String>>(executable: E) -> Self {
        Command {
            executable: executable.into(),
            timeout: DEFAULT_TIMEOUT,
            env: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the inherited environment with exactly `env`.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    fn shell_word(&self) -> String {
        shell_words::quote(&expand_env(&self.executable)).into_owned()
    }

    /// Run the command once: feed `input` on stdin, close the stream, and
    /// capture both output streams until exit. The whole interaction is
    /// bounded by the configured timeout; on expiry the process tree is
    /// killed and the call fails with a timeout error.
    pub async fn run(&self, input: &str) -> Result<Output, CommandError> {
        let word = self.shell_word();
        tracing::debug!("run: sh -c {}", word);

        let mut command = tokio::process::Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(&word)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = &self.env {
            command.env_clear().envs(env);
        }

        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            executable: self.executable.clone(),
            source,
        })?;
        let pid = child.id();

        let work = async {
            if let Some(mut stdin) = child.stdin.take() {
                let feed = async move {
                    match stdin.write_all(input.as_bytes()).await {
                        Ok(()) => {}
                        // The command may exit without draining its input.
                        Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                        Err(e) => return Err(e),
                    }
                    Ok(())
                };
                let (fed, waited) = tokio::join!(feed, child.wait_with_output());
                fed?;
                waited
            } else {
                child.wait_with_output().await
            }
        };

        // The child must survive an elapsed timeout: dropping the future
        // here would kill only the shell, leaving its children running.
        let mut work = std::pin::pin!(work);

        match tokio::time::timeout(self.timeout, work.as_mut()).await {
            Ok(Ok(output)) => Ok(Output {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: exit_code(output.status),
            }),
            Ok(Err(source)) => Err(CommandError::Io {
                executable: self.executable.clone(),
                source,
            }),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_tree(pid).await;
                }
                Err(CommandError::Timeout {
                    executable: self.executable.clone(),
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Probe the command with the sentinel and parse its descriptor.
    ///
    /// Exit code 2 is required; anything else means the executable is not
    /// set up as a tool, which is fatal at registration time.
    pub async fn describe(&self) -> Result<Descriptor, CommandError> {
        let output = self.run(HELP_SENTINEL).await?;
        if output.exit_code != HELP_EXIT_CODE {
            return Err(CommandError::Help {
                executable: self.executable.clone(),
                stderr: output.stderr,
            });
        }
        let help: Value =
            serde_json::from_str(&output.stdout).map_err(|source| CommandError::InvalidHelp {
                executable: self.executable.clone(),
                source,
            })?;

        let name = self.help_field(&help, "name")?;
        let description = self.help_field(&help, "description")?;
        let schema = help
            .get("schema")
            .cloned()
            .ok_or_else(|| self.missing_field("schema"))?;

        if !is_valid_tool_name(&name) {
            return Err(CommandError::InvalidName {
                executable: self.executable.clone(),
                name,
            });
        }

        Ok(Descriptor {
            name,
            description,
            schema,
        })
    }

    fn help_field(&self, help: &Value, field: &'static str) -> Result<String, CommandError> {
        help.get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.missing_field(field))
    }

    fn missing_field(&self, field: &'static str) -> CommandError {
        CommandError::MissingHelpField {
            executable: self.executable.clone(),
            field,
        }
    }
}

/// Expand `$VAR` style references from the process environment, leaving
/// undefined variables in place.
pub(crate) fn expand_env(text: &str) -> String {
    shellexpand::env_with_context_no_errors(text, |var| std::env::var(var).ok()).into_owned()
}

fn is_valid_tool_name(name: &str) -> bool {
    let re = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    re.is_match(name)
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// SIGKILL a process and all of its descendants. The shell in between
/// means the interesting processes are grandchildren, so killing the
/// direct child alone is not enough.
async fn kill_process_tree(pid: u32) {
    let result = tokio::task::spawn_blocking(move || {
        let config = Config {
            signal: "SIGKILL".to_string(),
            ..Default::default()
        };
        kill_tree_with_config(pid, &config)
    })
    .await;

    match result {
        Ok(Ok(outputs)) => {
            for output in outputs {
                if let kill_tree::Output::Killed { process_id, .. } = output {
                    tracing::debug!("killed process {}", process_id);
                }
            }
        }
        Ok(Err(e)) => tracing::warn!("failed to kill process tree of {}: {}", pid, e),
        Err(e) => tracing::warn!("kill of process tree {} did not finish: {}", pid, e),
    }
}

/// A single executable exposed to the agent as one tool.
pub struct CommandSystem {
    command: Command,
    name: String,
    description: String,
    tools: Vec<Tool>,
}

impl CommandSystem {
    /// Probe the command for its descriptor and wrap it as a callable
    /// tool. Happens once, at registration; a failure here is fatal for
    /// the executable.
    pub async fn discover(command: Command) -> Result<CommandSystem, CommandError> {
        let descriptor = command.describe().await?;
        tracing::info!(
            "command: {} provides tool {}",
            command.executable(),
            descriptor.name
        );
        let description = format!("{}\n\n{}", descriptor.description, DESCRIPTION_TRAILER);
        let tools = vec![Tool::new(
            descriptor.name.clone(),
            description.clone(),
            descriptor.schema,
        )];
        Ok(CommandSystem {
            command,
            name: descriptor.name,
            description,
            tools,
        })
    }
}

#[async_trait]
impl System for CommandSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<String> {
        tracing::info!(
            "call: command({}) with {}",
            self.command.executable(),
            tool_call.arguments
        );

        // The payload must be JSON before it ever reaches the command. A
        // non-JSON payload is a broken call from the model, not a tool
        // failure, so it raises instead of producing an error payload.
        if let Err(error) = serde_json::from_str::<Value>(&tool_call.arguments) {
            tracing::error!("call: {} payload is not valid JSON: {}", self.name, error);
            return Err(AgentError::InvalidParameters(format!(
                "tool {} takes a JSON payload: {}",
                self.name, error
            )));
        }

        let output = self.command.run(&tool_call.arguments).await?;
        if output.ok() {
            Ok(output.stdout)
        } else {
            tracing::error!(
                "call: {} exited {}: {}",
                self.name,
                output.exit_code,
                output.stderr
            );
            let payload = ErrorPayload {
                error: true,
                message: output.stderr,
                returncode: output.exit_code,
            };
            serde_json::to_string(&payload).map_err(|e| AgentError::Internal(e.to_string()))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const ECHO_SCRIPT: &str = indoc! {r#"
        #!/bin/sh
        input=$(cat)
        if [ "$input" = "help" ]; then
          printf '%s' '{"name":"echo","description":"Echoes JSON back.","schema":{"type":"object"}}'
          exit 2
        fi
        printf '%s' "$input"
    "#};

    const BOOM_SCRIPT: &str = indoc! {r#"
        #!/bin/sh
        input=$(cat)
        if [ "$input" = "help" ]; then
          printf '%s' '{"name":"boom","description":"Always fails.","schema":{"type":"object"}}'
          exit 2
        fi
        printf 'boom' >&2
        exit 1
    "#};

    fn script(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        let mut permissions = std::fs::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&path, permissions).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_defaults() {
        let command = Command::new("tool");
        assert_eq!(command.timeout, DEFAULT_TIMEOUT);
        assert!(command.env.is_none());
    }

    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let command = Command::new(script(&dir, "cat.sh", "#!/bin/sh\ncat\n"));

        let output = command.run("hello there").await.unwrap();
        assert!(output.ok());
        assert_eq!(output.stdout, "hello there");
        assert_eq!(output.stderr, "");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_run_reports_stderr_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let command = Command::new(script(
            &dir,
            "fail.sh",
            "#!/bin/sh\nprintf 'no luck' >&2\nexit 3\n",
        ));

        let output = command.run("").await.unwrap();
        assert!(!output.ok());
        assert_eq!(output.stderr, "no luck");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_run_inherits_environment_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("CONFAB_TEST_INHERITED", "from-parent");
        let command = Command::new(script(
            &dir,
            "env.sh",
            "#!/bin/sh\nprintf '%s' \"$CONFAB_TEST_INHERITED\"\n",
        ));

        let output = command.run("").await.unwrap();
        assert_eq!(output.stdout, "from-parent");
    }

    #[tokio::test]
    async fn test_run_with_env_replaces_environment() {
        let dir = tempfile::tempdir().unwrap();
        let command = Command::new(script(
            &dir,
            "env.sh",
            "#!/bin/sh\nprintf '%s %s' \"$MARKER\" \"${HOME:-cleared}\"\n",
        ))
        .with_env(HashMap::from([("MARKER".to_string(), "present".to_string())]));

        let output = command.run("").await.unwrap();
        assert_eq!(output.stdout, "present cleared");
    }

    #[tokio::test]
    async fn test_run_with_env_keeps_the_captured_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let command_path = script(
            &dir,
            "env.sh",
            "#!/bin/sh\nprintf '%s' \"$CONFAB_TEST_SNAPSHOT\"\n",
        );

        std::env::set_var("CONFAB_TEST_SNAPSHOT", "at-setup");
        let environment: HashMap<String, String> = std::env::vars().collect();
        let command = Command::new(command_path).with_env(environment);
        std::env::set_var("CONFAB_TEST_SNAPSHOT", "mutated-later");

        let output = command.run("").await.unwrap();
        assert_eq!(output.stdout, "at-setup");
    }

    #[tokio::test]
    async fn test_run_expands_and_quotes_the_executable() {
        let dir = tempfile::tempdir().unwrap();
        script(&dir, "my tool.sh", "#!/bin/sh\ncat\n");
        std::env::set_var("CONFAB_TEST_TOOL_DIR", dir.path());
        let command = Command::new("$CONFAB_TEST_TOOL_DIR/my tool.sh");

        let output = command.run("ping").await.unwrap();
        assert_eq!(output.stdout, "ping");
    }

    #[tokio::test]
    async fn test_run_tolerates_unread_input() {
        let dir = tempfile::tempdir().unwrap();
        let command = Command::new(script(&dir, "deaf.sh", "#!/bin/sh\nexit 7\n"));

        // Larger than the pipe buffer, so the write outlives the process.
        let input = "x".repeat(256 * 1024);
        let output = command.run(&input).await.unwrap();
        assert_eq!(output.exit_code, 7);
    }

    #[tokio::test]
    async fn test_run_times_out_and_kills_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let body = format!(
            "#!/bin/sh\nsleep 30 &\necho $! > {}\nwait\n",
            pid_file.display()
        );
        let command = Command::new(script(&dir, "slow.sh", &body))
            .with_timeout(Duration::from_millis(200));

        let err = command.run("").await.unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
        assert!(err.to_string().contains("timed out"));

        #[cfg(target_os = "linux")]
        {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
            assert!(!std::path::Path::new(&format!("/proc/{}", pid)).exists());
        }
    }

    #[tokio::test]
    async fn test_describe_returns_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let command = Command::new(script(&dir, "echo.sh", ECHO_SCRIPT));

        let descriptor = command.describe().await.unwrap();
        assert_eq!(descriptor.name, "echo");
        assert_eq!(descriptor.description, "Echoes JSON back.");
        assert_eq!(descriptor.schema, serde_json::json!({"type": "object"}));
    }

    #[tokio::test]
    async fn test_describe_rejects_wrong_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        // Exits 0 instead of the required 2.
        let command = Command::new(script(
            &dir,
            "wrong.sh",
            "#!/bin/sh\nprintf 'not a tool' >&2\nexit 0\n",
        ));

        let err = command.describe().await.unwrap_err();
        assert!(matches!(err, CommandError::Help { .. }));
        assert!(err.to_string().contains("failed to display help: not a tool"));
    }

    #[tokio::test]
    async fn test_describe_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let command = Command::new(script(
            &dir,
            "garbled.sh",
            "#!/bin/sh\nprintf 'not json'\nexit 2\n",
        ));

        let err = command.describe().await.unwrap_err();
        assert!(matches!(err, CommandError::InvalidHelp { .. }));
    }

    #[tokio::test]
    async fn test_describe_requires_each_field() {
        let dir = tempfile::tempdir().unwrap();
        let executable = script(
            &dir,
            "partial.sh",
            "#!/bin/sh\nprintf '%s' '{\"name\":\"x\",\"description\":\"y\"}'\nexit 2\n",
        );
        let command = Command::new(executable.clone());

        let err = command.describe().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("command: {} should have schema in help", executable)
        );
    }

    #[tokio::test]
    async fn test_describe_rejects_bad_tool_name() {
        let dir = tempfile::tempdir().unwrap();
        let command = Command::new(script(
            &dir,
            "odd.sh",
            "#!/bin/sh\nprintf '%s' '{\"name\":\"odd name!\",\"description\":\"d\",\"schema\":{}}'\nexit 2\n",
        ));

        let err = command.describe().await.unwrap_err();
        assert!(matches!(err, CommandError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn test_call_passes_payload_through() {
        let dir = tempfile::tempdir().unwrap();
        let system = CommandSystem::discover(Command::new(script(&dir, "echo.sh", ECHO_SCRIPT)))
            .await
            .unwrap();

        let payload = r#"{"text":"hello"}"#;
        let result = system
            .call(ToolCall::new("1", "echo", payload))
            .await
            .unwrap();
        assert_eq!(result, payload);
    }

    #[tokio::test]
    async fn test_call_preserves_payload_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let system = CommandSystem::discover(Command::new(script(&dir, "echo.sh", ECHO_SCRIPT)))
            .await
            .unwrap();

        // Key order and spacing are the model's, not ours to normalize.
        let payload = "{\"b\": 1,  \"a\": 2}";
        let result = system
            .call(ToolCall::new("1", "echo", payload))
            .await
            .unwrap();
        assert_eq!(result, payload);
    }

    #[tokio::test]
    async fn test_call_runs_quoted_help_normally() {
        let dir = tempfile::tempdir().unwrap();
        let system = CommandSystem::discover(Command::new(script(&dir, "echo.sh", ECHO_SCRIPT)))
            .await
            .unwrap();

        // The JSON string "help" is a valid payload, not the probe.
        let result = system
            .call(ToolCall::new("1", "echo", "\"help\""))
            .await
            .unwrap();
        assert_eq!(result, "\"help\"");
    }

    #[tokio::test]
    async fn test_call_wraps_failure_in_error_payload() {
        let dir = tempfile::tempdir().unwrap();
        let system = CommandSystem::discover(Command::new(script(&dir, "boom.sh", BOOM_SCRIPT)))
            .await
            .unwrap();

        let result = system.call(ToolCall::new("1", "boom", "{}")).await.unwrap();
        assert_eq!(result, r#"{"error":true,"message":"boom","returncode":1}"#);
    }

    #[tokio::test]
    async fn test_call_rejects_non_json_payload() {
        let dir = tempfile::tempdir().unwrap();
        let system = CommandSystem::discover(Command::new(script(&dir, "echo.sh", ECHO_SCRIPT)))
            .await
            .unwrap();

        let err = system
            .call(ToolCall::new("1", "echo", "not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_description_carries_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let system = CommandSystem::discover(Command::new(script(&dir, "echo.sh", ECHO_SCRIPT)))
            .await
            .unwrap();

        assert!(system.description().starts_with("Echoes JSON back.\n\n"));
        assert!(system
            .description()
            .contains("This tool only accepts JSON input and produces only JSON output."));
        assert!(system.description().contains("returncode: exit code of call"));
        assert_eq!(system.tools()[0].description, system.description());
    }
}

//! Lifecycle management for long-lived auxiliary servers.
//!
//! Unlike one-shot tool commands, these are processes that stay up for the
//! whole run and speak a richer protocol over their stdio. The registry
//! owns the acquire/release discipline: connect everything in registration
//! order, and no matter how the run ends, disconnect everything that
//! actually connected, in reverse order.

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::command::expand_env;

/// An auxiliary process the agent brings up for the duration of a run.
#[async_trait]
pub trait Server: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// How to launch one auxiliary server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSetting {
    pub command: String,
    pub args: Vec<String>,
}

/// Launch settings for a set of servers, keyed by name.
///
/// Parsed from a JSON object `{"name": {"command": ..., "args": [...]}}`.
/// Iteration order of the parsed object (name order) becomes registration
/// order, so startup is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub servers: Vec<(String, ServerSetting)>,
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Settings> {
        if text.trim().is_empty() {
            return Err(anyhow!("settings are required"));
        }
        let data: Value = serde_json::from_str(text).context("settings are not valid JSON")?;
        let entries = data
            .as_object()
            .ok_or_else(|| anyhow!("settings must be a JSON object"))?;

        let mut servers = Vec::new();
        for (name, entry) in entries {
            if !entry.is_object() {
                return Err(anyhow!("settings are required"));
            }
            let command = entry
                .get("command")
                .and_then(Value::as_str)
                .filter(|command| !command.is_empty())
                .ok_or_else(|| anyhow!("command is required"))?;
            // Missing args means no args; present args must be strings.
            let args = match entry.get("args") {
                None => Vec::new(),
                Some(args) => args
                    .as_array()
                    .ok_or_else(|| anyhow!("args is required as list[str]"))?
                    .iter()
                    .map(|arg| {
                        arg.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| anyhow!("args is required as list[str]"))
                    })
                    .collect::<Result<Vec<_>>>()?,
            };
            servers.push((
                name.clone(),
                ServerSetting {
                    command: command.to_string(),
                    args,
                },
            ));
        }
        Ok(Settings { servers })
    }
}

/// An auxiliary server run as a child process speaking over its stdio.
///
/// The command and arguments get environment-variable expansion but no
/// shell: the process is spawned directly from the argument vector.
pub struct StdioServer {
    name: String,
    setting: ServerSetting,
    child: Option<tokio::process::Child>,
}

impl StdioServer {
    pub fn new<N: Into<String>>(name: N, setting: ServerSetting) -> Self {
        StdioServer {
            name: name.into(),
            setting,
            child: None,
        }
    }
}

#[async_trait]
impl Server for StdioServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        let command = expand_env(&self.setting.command);
        let args: Vec<String> = self.setting.args.iter().map(|arg| expand_env(arg)).collect();
        let child = tokio::process::Command::new(&command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch server {}", self.name))?;
        self.child = Some(child);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            // The server may have exited on its own already.
            if let Err(e) = child.kill().await {
                if e.kind() != std::io::ErrorKind::InvalidInput {
                    return Err(e)
                        .with_context(|| format!("failed to stop server {}", self.name));
                }
            }
        }
        Ok(())
    }
}

/// Brings servers up in registration order and always tears them down in
/// reverse.
#[derive(Default)]
pub struct ServerRegistry {
    servers: Vec<Box<dyn Server>>,
    connected: usize,
}

impl ServerRegistry {
    pub fn new() -> Self {
        ServerRegistry::default()
    }

    pub fn from_settings(settings: Settings) -> Self {
        let mut registry = ServerRegistry::new();
        for (name, setting) in settings.servers {
            registry.register(Box::new(StdioServer::new(name, setting)));
        }
        registry
    }

    pub fn register(&mut self, server: Box<dyn Server>) {
        self.servers.push(server);
    }

    /// Connect every server in registration order. If one fails, the
    /// servers connected so far are torn down before the error returns,
    /// so a partial startup never leaks processes.
    pub async fn connect_all(&mut self) -> Result<()> {
        while self.connected < self.servers.len() {
            let server = &mut self.servers[self.connected];
            tracing::debug!("server: connect to {}", server.name());
            if let Err(e) = server.connect().await {
                let name = server.name().to_string();
                self.shutdown().await;
                return Err(e.context(format!("failed to connect server {}", name)));
            }
            self.connected += 1;
        }
        Ok(())
    }

    /// Disconnect in reverse connection order. A failing disconnect is
    /// logged and skipped; it never blocks the teardown of the rest.
    pub async fn shutdown(&mut self) {
        while self.connected > 0 {
            self.connected -= 1;
            let server = &mut self.servers[self.connected];
            tracing::debug!("server: cleanup {}", server.name());
            if let Err(e) = server.disconnect().await {
                tracing::warn!("server {} failed to disconnect: {:#}", server.name(), e);
            }
        }
    }
}

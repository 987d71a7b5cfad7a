use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::RuntimeConfig;

/// A running container as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub image: String,
}

impl ContainerHandle {
    /// Name when the engine reported one, otherwise the short id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            self.id.get(..12).unwrap_or(&self.id)
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("container engine command not found: {command}")]
    NotInstalled { command: String },

    #[error("failed to run container engine command `{command}`")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unexpected container listing line {line:?}")]
    InvalidListing {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_owned(), |c| format!("status {c}"))
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list_running(&self) -> Result<Vec<ContainerHandle>, EngineError>;

    async fn force_remove(&self, container: &ContainerHandle) -> Result<(), EngineError>;
}

/// Talks to the local engine through a docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    base_args: Vec<String>,
}

impl DockerCli {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self::new(cfg.engine_command.clone(), cfg.engine_args.clone())
    }

    async fn run(&self, args: &[&str]) -> Result<String, EngineError> {
        let command_line = self.describe(args);
        debug!(command = %command_line, "running container engine command");

        let output = Command::new(&self.program)
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| {
                if source.kind() == io::ErrorKind::NotFound {
                    EngineError::NotInstalled {
                        command: self.program.clone(),
                    }
                } else {
                    EngineError::Io {
                        command: command_line.clone(),
                        source,
                    }
                }
            })?;

        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                command: command_line,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn describe(&self, args: &[&str]) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.base_args.iter().map(String::as_str))
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn list_running(&self) -> Result<Vec<ContainerHandle>, EngineError> {
        let stdout = self
            .run(&["ps", "--no-trunc", "--format", "{{json .}}"])
            .await?;
        parse_listing(&stdout)
    }

    async fn force_remove(&self, container: &ContainerHandle) -> Result<(), EngineError> {
        self.run(&["rm", "--force", &container.id]).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct PsEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
}

fn parse_listing(stdout: &str) -> Result<Vec<ContainerHandle>, EngineError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let entry: PsEntry =
                serde_json::from_str(line).map_err(|source| EngineError::InvalidListing {
                    line: line.to_owned(),
                    source,
                })?;
            let name = entry
                .names
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_owned();
            Ok(ContainerHandle {
                id: entry.id,
                name,
                image: entry.image,
            })
        })
        .collect()
}

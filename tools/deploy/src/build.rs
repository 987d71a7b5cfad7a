use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::RuntimeConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// `None` when the build was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured stdout followed by captured stderr.
    pub output: Vec<u8>,
}

impl BuildOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

#[async_trait]
pub trait BuildTool: Send + Sync {
    async fn invoke(&self) -> Result<BuildOutput>;
}

#[derive(Debug, Clone)]
pub struct ProcessBuildTool {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl ProcessBuildTool {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
        }
    }

    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            program: cfg.build_command.clone(),
            args: cfg.build_args.clone(),
            cwd: Some(cfg.cwd.clone()),
        }
    }
}

#[async_trait]
impl BuildTool for ProcessBuildTool {
    async fn invoke(&self) -> Result<BuildOutput> {
        info!(program = %self.program, args = ?self.args, "invoking build tool");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let output = command.output().await.with_context(|| {
            format!(
                "failed to run build command: {} {}",
                self.program,
                self.args.join(" ")
            )
        })?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        let exit_code = output.status.code();
        debug!(?exit_code, output_bytes = combined.len(), "build tool finished");

        Ok(BuildOutput {
            exit_code,
            output: combined,
        })
    }
}

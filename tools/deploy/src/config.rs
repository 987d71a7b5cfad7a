use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::cli::Mode;

const DEFAULT_ENGINE_COMMAND: &str = "docker";
const DEFAULT_BUILD_COMMAND: &str = "poetry build";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub engine_command: String,
    pub engine_args: Vec<String>,
    pub build_command: String,
    pub build_args: Vec<String>,
    pub cwd: PathBuf,
}

impl RuntimeConfig {
    pub fn load_from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let (engine_command, engine_args) =
            command_line(&lookup, "DEPLOY_ENGINE_CMD", DEFAULT_ENGINE_COMMAND)?;
        let (build_command, build_args) =
            command_line(&lookup, "DEPLOY_BUILD_CMD", DEFAULT_BUILD_COMMAND)?;

        let cwd = std::env::current_dir().context("failed to resolve current working directory")?;

        Ok(Self {
            engine_command,
            engine_args,
            build_command,
            build_args,
            cwd,
        })
    }

    /// Checks that the collaborator the given mode talks to can be launched.
    pub fn preflight(&self, mode: Mode) -> Result<()> {
        let (command, var) = match mode {
            Mode::Dev => (&self.engine_command, "DEPLOY_ENGINE_CMD"),
            Mode::Prod => (&self.build_command, "DEPLOY_BUILD_CMD"),
        };

        if command.contains('/') {
            let candidate = PathBuf::from(command);
            if !candidate.exists() {
                bail!("command does not exist: {}", candidate.display());
            }
            return Ok(());
        }

        which::which(command)
            .with_context(|| format!("command not found on PATH: {command} (set {var} to override)"))?;

        Ok(())
    }
}

fn command_line(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: &str,
) -> Result<(String, Vec<String>)> {
    let line = lookup(var).unwrap_or_else(|| default.to_owned());
    let parts = shlex::split(&line).with_context(|| format!("could not parse {var}: {line}"))?;

    let Some((command, args)) = parts.split_first() else {
        bail!("{var} resolved to an empty command");
    };

    Ok((command.clone(), args.to_vec()))
}

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, ValueEnum)]
pub enum Mode {
    /// Remove every running container, then pause for inspection.
    #[default]
    Dev,
    /// Build the package and fail if the build fails.
    #[value(name = "prd")]
    Prod,
}

/// Refresh docker containers for development, or build the package for release.
#[derive(Debug, Parser)]
#[command(name = "deploy", version)]
pub struct Cli {
    /// Sets an environment mode.
    #[arg(short, long, value_enum, ignore_case = true, default_value_t = Mode::Dev)]
    pub env: Mode,
}

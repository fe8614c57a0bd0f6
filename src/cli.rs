//! Command-line arguments.

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};

use crate::pipeline::FailurePolicy;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "kiln",
    version,
    about = "Build the theme's stylesheets, scripts and images.",
    long_about = None
)]
pub struct CliArgs {
    /// Task to run.
    #[arg(value_name = "TASK", default_value = "build")]
    pub task: String,

    /// Path to the build configuration.
    #[arg(long, value_name = "PATH", default_value = "buildconfig.json")]
    pub config: Utf8PathBuf,

    /// What a file that fails to build means for the task. Overrides
    /// `onError` from the configuration.
    #[arg(long, value_enum, value_name = "POLICY")]
    pub on_error: Option<FailurePolicy>,

    /// Logging level. If omitted, `KILN_LOG` or `info` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Print the registered tasks and exit.
    #[arg(long)]
    pub list: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

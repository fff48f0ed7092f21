// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `ci-dispatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ci-dispatch",
    version,
    about = "Poll repositories for ref changes and dispatch dependency-aware builds.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the repository registry (TOML).
    ///
    /// Default: `Repositories.toml` in the current working directory.
    #[arg(long, global = true, value_name = "PATH", default_value = "Repositories.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CI_DISPATCH_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Poll every repository for changed refs and build what changed.
    Poll {
        /// Run a single pass, wait for the builds it started, and exit.
        #[arg(long)]
        once: bool,
    },

    /// Run one dispatch command (`build`, `builddeps`, `depbuild`, `job`).
    Dispatch {
        /// Print the scheduled operations instead of running them.
        #[arg(long)]
        plan: bool,

        /// Command name followed by its arguments.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Request a build of a repository by short or qualified name.
    Build {
        /// `name`, `org/name` or `host/org/name`.
        repository: String,

        /// Branch to build. Defaults to the repository's default branch.
        branch: Option<String>,

        /// Run this pipeline instead of the default build.
        #[arg(long, value_name = "NAME")]
        pipeline: Option<String>,

        /// Print the scheduled operations instead of running them.
        #[arg(long)]
        plan: bool,

        /// Extra arguments passed through to the pipeline.
        #[arg(last = true)]
        extra: Vec<String>,
    },

    /// Validate the registry, print it, and report configuration issues.
    Check,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

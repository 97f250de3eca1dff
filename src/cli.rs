use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Turn a captured stack trace into a reviewed fix
#[derive(Parser, Debug, Clone)]
#[command(name = "patchiq", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Path to config file (default: patchiq.toml when present)
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Run one remediation: clone, analyze, fix, push, and open a pull request
    Run(RunArgs),

    /// Resolve the file a trace points at inside a local checkout
    Locate {
        /// Repository checkout to search
        #[arg(long)]
        repo: PathBuf,

        /// Trace file to read (default: configured trace file)
        #[arg(long)]
        trace_file: Option<String>,

        /// Source file extension to look for (default: py)
        #[arg(long)]
        extension: Option<String>,
    },
}

/// Per-run overrides. Secrets (access token, model API key) are only read
/// from the environment or the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Repository URL to clone
    #[arg(long)]
    pub repo_url: Option<String>,

    /// Branch to clone and target pull requests at (default: main)
    #[arg(long)]
    pub base_branch: Option<String>,

    /// Trace file to read (default: errors.log)
    #[arg(long)]
    pub trace_file: Option<String>,

    /// Directory for per-run artifacts and the run ledger (default: run_logs)
    #[arg(long)]
    pub run_logs_dir: Option<String>,

    /// Attempts per model phase before giving up
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Conversation-step budget per phase
    #[arg(long)]
    pub step_budget: Option<u32>,

    /// Model provider (gemini, openai)
    #[arg(long)]
    pub llm_provider: Option<String>,

    /// Model identifier (default: gemini-2.5-flash, or gpt-4o-mini for openai)
    #[arg(long)]
    pub llm_model: Option<String>,

    /// Timeout in seconds for a single model attempt
    #[arg(long)]
    pub attempt_timeout: Option<u64>,

    /// Shell command that must succeed in the clone before the fix is committed
    #[arg(long)]
    pub verify_command: Option<String>,

    /// Directory with prompt template overrides
    #[arg(long)]
    pub prompts_dir: Option<String>,

    /// Commit locally but skip push, pull request, and ledger update
    #[arg(long)]
    pub dry_run: bool,
}

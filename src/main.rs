use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use patchiq::cli::{Cli, CliCommand, RunArgs};
use patchiq::config::{Config, ConfigFile, DEFAULT_EXTENSION, DEFAULT_TRACE_FILE};
use patchiq::error::Result;
use patchiq::llm::build_model;
use patchiq::locator::TraceLocator;
use patchiq::orchestrator::{Orchestrator, read_trace};
use patchiq::prompts::{PromptEngine, TEMPLATE_NAMES};
use patchiq::publisher::GitHubPublisher;
use patchiq::verify::AnyVerifier;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        CliCommand::Run(ref args) => run(cli.config.as_deref(), args).await,
        CliCommand::Locate {
            ref repo,
            ref trace_file,
            ref extension,
        } => locate(
            cli.config.as_deref(),
            repo,
            trace_file.clone(),
            extension.clone(),
        ),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(config_path: Option<&str>, args: &RunArgs) -> Result<()> {
    let config = Config::load(config_path, args)?;
    info!(?config, "config loaded");

    let prompt_engine = PromptEngine::new(config.prompts_dir.clone());
    for name in TEMPLATE_NAMES {
        prompt_engine.load_template(name)?;
    }

    let model = build_model(&config);
    let publisher =
        GitHubPublisher::from_repo_url(&config.repo_url, &config.github_token, HTTP_TIMEOUT)?;
    let verifier =
        AnyVerifier::from_command(config.verify_command.as_deref(), config.git_timeout());

    let orchestrator = Orchestrator::new(model, publisher, verifier, prompt_engine, config);
    let outcome = orchestrator.run_once().await?;

    match outcome.pr_url {
        Some(url) => println!("{url}"),
        None => println!("{} ({})", outcome.branch, outcome.commit),
    }
    Ok(())
}

/// Resolve the trace against a local checkout without touching the network.
fn locate(
    config_path: Option<&str>,
    repo: &Path,
    trace_file: Option<String>,
    extension: Option<String>,
) -> Result<()> {
    let settings = ConfigFile::load(config_path)?.overlay(ConfigFile::from_env(|key| {
        std::env::var(key).ok()
    })?);
    let trace_file = trace_file
        .or(settings.trace_file)
        .unwrap_or_else(|| DEFAULT_TRACE_FILE.to_string());
    let extension = extension
        .or(settings.source_extension)
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

    let trace = read_trace(Path::new(&trace_file))?;
    let path = TraceLocator::new(&extension)?.locate(repo, &trace)?;
    println!("{path}");
    Ok(())
}

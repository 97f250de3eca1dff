use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifacts::RunArtifacts;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::{RunLedger, RunRecord};
use crate::llm::ChatModel;
use crate::locator::TraceLocator;
use crate::phases::analysis::{self, AnalysisInput};
use crate::phases::{PhaseContext, RetryPolicy, fix};
use crate::prompts::PromptEngine;
use crate::publisher::{PullRequestPublisher, pull_request_body, pull_request_title};
use crate::repo::{CommitIdentity, WorkingClone, branch_name, commit_message};
use crate::runlock::RunLock;
use crate::schema::AnalysisResult;
use crate::verify::FixVerifier;

/// Pipeline position of a run. `Failed` is reachable from every
/// non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Start,
    Cloned,
    Analyzed,
    Fixed,
    Verified,
    Mutated,
    Published,
    Done,
    Failed(String),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Start => write!(f, "start"),
            RunState::Cloned => write!(f, "cloned"),
            RunState::Analyzed => write!(f, "analyzed"),
            RunState::Fixed => write!(f, "fixed"),
            RunState::Verified => write!(f, "verified"),
            RunState::Mutated => write!(f, "mutated"),
            RunState::Published => write!(f, "published"),
            RunState::Done => write!(f, "done"),
            RunState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub run_dir: PathBuf,
    pub file_path: String,
    pub analysis: AnalysisResult,
    pub branch: String,
    pub commit: String,
    pub pr_url: Option<String>,
    pub dry_run: bool,
}

pub struct Orchestrator<M, P, V> {
    model: M,
    publisher: P,
    verifier: V,
    prompt_engine: PromptEngine,
    config: Config,
}

impl<M: ChatModel, P: PullRequestPublisher, V: FixVerifier> Orchestrator<M, P, V> {
    pub fn new(
        model: M,
        publisher: P,
        verifier: V,
        prompt_engine: PromptEngine,
        config: Config,
    ) -> Self {
        Self {
            model,
            publisher,
            verifier,
            prompt_engine,
            config,
        }
    }

    /// Execute one remediation run end to end.
    pub async fn run_once(&self) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4();
        let mut state = RunState::Start;
        info!(run = %run_id, dry_run = self.config.dry_run, "starting run");

        match self.execute(run_id, &mut state).await {
            Ok(outcome) => {
                advance(&mut state, RunState::Done, run_id);
                info!(
                    run = %run_id,
                    branch = %outcome.branch,
                    pr = outcome.pr_url.as_deref().unwrap_or("-"),
                    "run complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(run = %run_id, at = %state, error = %e, "run failed");
                advance(&mut state, RunState::Failed(e.to_string()), run_id);
                Err(e)
            }
        }
    }

    async fn execute(&self, run_id: Uuid, state: &mut RunState) -> Result<RunOutcome> {
        let config = &self.config;
        let _lock = RunLock::acquire(&config.run_logs_dir)?;

        let trace = read_trace(&config.trace_file)?;
        let trace_path = absolute_display(&config.trace_file)?;
        let started = Local::now();
        let artifacts = RunArtifacts::create(&config.run_logs_dir, started)?;
        info!(run = %run_id, dir = %artifacts.dir().display(), "recording artifacts");

        let workspace = tempfile::Builder::new().prefix("patchiq-").tempdir()?;
        let clone = WorkingClone::clone(
            &config.repo_url,
            &config.github_token,
            &config.base_branch,
            &workspace.path().join("repo"),
            config.git_timeout(),
        )
        .await?;
        advance(state, RunState::Cloned, run_id);

        let locator = TraceLocator::new(&config.source_extension)?;
        let relpath = locator.locate(clone.path(), &trace)?;
        info!(run = %run_id, file = %relpath, "located failing file");

        let original = clone.read_file(&relpath)?;
        artifacts.write_original(&relpath, &original)?;

        let ctx = PhaseContext {
            model: &self.model,
            prompts: &self.prompt_engine,
            policy: RetryPolicy::from_config(config),
            step_budget: config.step_budget,
            run_id: run_id.to_string(),
            extension: config.source_extension.clone(),
        };

        let analysis = analysis::run(
            &ctx,
            &AnalysisInput {
                trace: &trace,
                relpath: &relpath,
                content: &original,
            },
            &artifacts,
        )
        .await?;
        advance(state, RunState::Analyzed, run_id);

        let outcome = fix::run(&ctx, &relpath, &original, &analysis, &artifacts).await?;
        advance(state, RunState::Fixed, run_id);

        clone.write_file(&relpath, &outcome.fix.fixed_code)?;
        if let Err(e) = self.verifier.verify(clone.path(), &relpath).await {
            if let Err(restore) = clone.restore_file(&relpath).await {
                warn!(error = %restore, "failed to restore working copy after rejected fix");
            }
            return Err(e);
        }
        advance(state, RunState::Verified, run_id);

        let branch = branch_name(&relpath, Local::now());
        clone.create_branch(&branch).await?;
        let identity = CommitIdentity {
            name: config.commit_author_name.clone(),
            email: config.commit_author_email.clone(),
        };
        let commit = clone
            .commit_file(&relpath, &commit_message(&analysis), &identity)
            .await?;

        if config.dry_run {
            info!(run = %run_id, branch = %branch, commit = %commit, "dry run: stopping before push");
            return Ok(RunOutcome {
                run_id,
                run_dir: artifacts.dir().to_path_buf(),
                file_path: relpath,
                analysis,
                branch,
                commit,
                pr_url: None,
                dry_run: true,
            });
        }

        clone.push(&branch).await?;
        advance(state, RunState::Mutated, run_id);

        let ledger = RunLedger::new(&config.run_logs_dir);
        ledger.append(RunRecord {
            timestamp: started.to_rfc3339(),
            error_file_path: trace_path,
            fixed_file_path: absolute_display(&outcome.fixed_path)?,
            diff_file_path: absolute_display(&outcome.diff_path)?,
            branch_name: branch.clone(),
            root_cause: analysis.root_cause.clone(),
            proposed_fix: analysis.proposed_fix_details.clone(),
            pr_url: None,
        })?;

        let submitted = self.publisher.submit(
            &branch,
            &config.base_branch,
            &pull_request_title(&analysis),
            &pull_request_body(&analysis),
        )?;
        advance(state, RunState::Published, run_id);

        ledger.attach_pr_url(&branch, &submitted.url)?;

        Ok(RunOutcome {
            run_id,
            run_dir: artifacts.dir().to_path_buf(),
            file_path: relpath,
            analysis,
            branch,
            commit,
            pr_url: Some(submitted.url),
            dry_run: false,
        })
    }
}

fn advance(state: &mut RunState, next: RunState, run_id: Uuid) {
    info!(run = %run_id, from = %state, to = %next, "state transition");
    *state = next;
}

/// Ledger paths are absolute so they stay valid from any working directory.
fn absolute_display(path: &Path) -> Result<String> {
    Ok(std::fs::canonicalize(path)?.display().to_string())
}

/// Read the trace file; absent or blank input aborts the run.
pub fn read_trace(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::InputMissing(format!(
            "trace file {} does not exist",
            path.display()
        )));
    }
    let raw = std::fs::read(path)?;
    let trace = String::from_utf8_lossy(&raw).trim().to_string();
    if trace.is_empty() {
        return Err(Error::InputMissing(format!(
            "trace file {} is empty",
            path.display()
        )));
    }
    Ok(trace)
}

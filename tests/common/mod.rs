#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use patchiq::config::{Config, ModelProvider};
use patchiq::error::{Error, Result};
use patchiq::llm::{ChatModel, Conversation};
use patchiq::publisher::{PullRequestPublisher, SubmitResult};

pub const CALC_PY: &str = "def average(total, days):\n    return total / days\n\n\ndef report(total, days):\n    print(average(total, days))\n";

pub const CALC_FIXED: &str = "def average(total, days):\n    if days == 0:\n        return 0.0\n    return total / days\n\n\ndef report(total, days):\n    print(average(total, days))\n";

pub const TRACE: &str = "Traceback (most recent call last):\n  File \"/srv/app/calc.py\", line 2, in average\n    return total / days\nZeroDivisionError: division by zero\n";

pub fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} in {} failed: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn git_stdout(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create a bare remote whose `main` holds `app/calc.py` and `app/main.py`.
/// Returns the bare remote and the working copy used to seed it.
pub fn setup_remote() -> (tempfile::TempDir, tempfile::TempDir) {
    let bare_dir = tempfile::TempDir::new().unwrap();
    run_git(bare_dir.path(), &["init", "--bare"]);

    let repo_dir = tempfile::TempDir::new().unwrap();
    run_git(repo_dir.path(), &["init"]);
    run_git(repo_dir.path(), &["config", "user.email", "test@test.com"]);
    run_git(repo_dir.path(), &["config", "user.name", "Test"]);
    std::fs::create_dir_all(repo_dir.path().join("app")).unwrap();
    std::fs::write(repo_dir.path().join("app/calc.py"), CALC_PY).unwrap();
    std::fs::write(
        repo_dir.path().join("app/main.py"),
        "from calc import report\nreport(10, 0)\n",
    )
    .unwrap();
    run_git(repo_dir.path(), &["add", "."]);
    run_git(repo_dir.path(), &["commit", "-m", "init"]);
    run_git(repo_dir.path(), &["branch", "-M", "main"]);
    run_git(
        repo_dir.path(),
        &["remote", "add", "origin", bare_dir.path().to_str().unwrap()],
    );
    run_git(repo_dir.path(), &["push", "-u", "origin", "main"]);

    (bare_dir, repo_dir)
}

/// Branch names present on the bare remote.
pub fn remote_branches(bare: &Path) -> Vec<String> {
    git_stdout(bare, &["for-each-ref", "--format=%(refname:short)", "refs/heads"])
        .lines()
        .map(|l| l.to_string())
        .collect()
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Sensible default `Config` for tests. Callers can override fields via struct update syntax.
pub fn default_test_config(remote: &Path, work: &Path) -> Config {
    let trace_file = work.join("errors.log");
    std::fs::write(&trace_file, TRACE).unwrap();
    Config {
        repo_url: file_url(remote),
        github_token: "ghp_testtoken".to_string(),
        base_branch: "main".to_string(),
        trace_file,
        run_logs_dir: work.join("run_logs"),
        max_retries: 3,
        step_budget: 15,
        llm_provider: ModelProvider::Gemini,
        llm_model: "gemini-2.5-flash".to_string(),
        llm_api_key: "test-key".to_string(),
        llm_base_url: None,
        attempt_timeout: 5,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        git_timeout: 60,
        source_extension: "py".to_string(),
        verify_command: None,
        commit_author_name: "patchiq".to_string(),
        commit_author_email: "patchiq@users.noreply.github.com".to_string(),
        prompts_dir: None,
        dry_run: false,
    }
}

pub fn analysis_reply(path: &str) -> String {
    serde_json::json!({
        "RootCause": "days can be zero, so average divides by zero",
        "ProposedFixDetails": "return 0.0 from average when days == 0",
        "GithubFilePathHavingError": path,
    })
    .to_string()
}

pub fn fix_reply(code: &str) -> String {
    format!("```json\n{}\n```", serde_json::json!({ "FixedCode": code }))
}

/// `ChatModel` returning scripted replies, recording each thread it saw.
#[derive(Clone, Default)]
pub struct MockModel {
    replies: Arc<Mutex<VecDeque<String>>>,
    pub threads: Arc<Mutex<Vec<Conversation>>>,
}

impl MockModel {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            threads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.threads.lock().unwrap().len()
    }

    pub fn thread_ids(&self) -> Vec<String> {
        self.threads
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }
}

impl ChatModel for MockModel {
    async fn complete(&self, conversation: &Conversation) -> Result<String> {
        self.threads.lock().unwrap().push(conversation.clone());
        let next = self.replies.lock().unwrap().pop_front();
        next.ok_or_else(|| Error::Model("no scripted reply left".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitCall {
    pub branch: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// `PullRequestPublisher` that records calls and answers with a fixed result.
#[derive(Clone)]
pub struct MockPublisher {
    pub calls: Arc<Mutex<Vec<SubmitCall>>>,
    fail_with: Option<String>,
}

impl MockPublisher {
    pub fn ok() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: Some(message.to_string()),
        }
    }
}

impl PullRequestPublisher for MockPublisher {
    fn submit(&self, branch: &str, base: &str, title: &str, body: &str) -> Result<SubmitResult> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(SubmitCall {
            branch: branch.to_string(),
            base: base.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        match &self.fail_with {
            Some(msg) => Err(Error::PullRequestCreationFailed(msg.clone())),
            None => Ok(SubmitResult {
                url: format!("https://github.com/acme/app/pull/{}", calls.len()),
            }),
        }
    }
}

/// The single run directory created under `run_logs`.
pub fn only_run_dir(run_logs: &Path) -> PathBuf {
    let dirs: Vec<PathBuf> = std::fs::read_dir(run_logs)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(dirs.len(), 1, "expected one run dir, got {dirs:?}");
    dirs.into_iter().next().unwrap()
}

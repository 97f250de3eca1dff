use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::process::{ProcessConfig, ProcessOutput, redact, spawn_and_stream};
use crate::schema::AnalysisResult;

pub const BRANCH_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Validate that a branch name is safe: matches `^[a-zA-Z0-9/_.-]+$` and does not start with `refs/`.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::RepositoryMutationFailed(
            "branch name must not be empty".to_string(),
        ));
    }
    if name.starts_with("refs/") || name.starts_with('-') || name.contains("..") {
        return Err(Error::RepositoryMutationFailed(format!(
            "invalid branch name: {name}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '_' || c == '.' || c == '-')
    {
        return Err(Error::RepositoryMutationFailed(format!(
            "branch name contains invalid characters (allowed: a-zA-Z0-9/_.-): {name}"
        )));
    }
    Ok(())
}

/// Keep `[A-Za-z0-9_.-]`, replace everything else with `_`.
pub fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '-').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// `fix/<stem>_<YYYYmmdd_HHMMSS>` for the file at `relpath`.
pub fn branch_name(relpath: &str, at: DateTime<Local>) -> String {
    let stem = Path::new(relpath)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("fix/{}_{}", sanitize_stem(&stem), at.format(BRANCH_TIME_FORMAT))
}

pub fn commit_message(analysis: &AnalysisResult) -> String {
    format!(
        "fix: {}\n\ndetails: {}",
        analysis.root_cause.trim(),
        analysis.proposed_fix_details.trim()
    )
}

/// Inject the access token as userinfo for http(s) URLs. Other schemes and
/// plain paths are returned unchanged.
pub fn authenticated_url(repo_url: &str, token: &str) -> Result<String> {
    let Ok(mut url) = url::Url::parse(repo_url) else {
        return Ok(repo_url.to_string());
    };
    if !matches!(url.scheme(), "http" | "https") || token.is_empty() {
        return Ok(repo_url.to_string());
    }
    url.set_username(token)
        .and_then(|_| url.set_password(None))
        .map_err(|_| {
            Error::RepositoryUnavailable(format!("cannot add credentials to {repo_url}"))
        })?;
    Ok(url.to_string())
}

/// Extract `(owner, repo)` from an https or scp-style remote URL.
pub fn parse_remote_url(repo_url: &str) -> Option<(String, String)> {
    let path = if let Some((_, rest)) = repo_url
        .strip_prefix("git@")
        .and_then(|r| r.split_once(':'))
    {
        rest.to_string()
    } else {
        let parsed = url::Url::parse(repo_url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https" | "ssh") {
            return None;
        }
        parsed.path().to_string()
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut parts = path.splitn(2, '/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty() && !s.contains('/'))?;
    Some((owner.to_string(), repo.to_string()))
}

/// Identity recorded on fix commits.
#[derive(Debug, Clone)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

/// Shallow working clone of the target repository.
pub struct WorkingClone {
    path: PathBuf,
    timeout: Duration,
    secrets: Vec<String>,
}

impl std::fmt::Debug for WorkingClone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingClone")
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .field("secrets", &"<redacted>")
            .finish()
    }
}

impl WorkingClone {
    /// `git clone --depth 1 --branch <branch>` into `dest`.
    pub async fn clone(
        repo_url: &str,
        token: &str,
        branch: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<Self> {
        let secrets = vec![token.to_string()];
        let url = authenticated_url(repo_url, token)?;
        let parent = dest
            .parent()
            .ok_or_else(|| Error::RepositoryUnavailable("clone target has no parent".into()))?;

        let args = vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "--single-branch".to_string(),
            "--branch".to_string(),
            branch.to_string(),
            url,
            dest.to_string_lossy().to_string(),
        ];
        let output = run_git(parent, args, timeout, &secrets)
            .await
            .map_err(|e| Error::RepositoryUnavailable(redact(&e.to_string(), &secrets)))?;
        if !output.success() {
            return Err(Error::RepositoryUnavailable(format!(
                "git clone of {} failed: {}",
                redact(repo_url, &secrets),
                output.tail(5)
            )));
        }

        info!(repo = %redact(repo_url, &secrets), branch, path = %dest.display(), "cloned repository");
        Ok(Self {
            path: dest.to_path_buf(),
            timeout,
            secrets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_file(&self, relpath: &str) -> Result<String> {
        Ok(std::fs::read_to_string(self.path.join(relpath))?)
    }

    /// Overwrite the working copy of `relpath`.
    pub fn write_file(&self, relpath: &str, content: &str) -> Result<()> {
        std::fs::write(self.path.join(relpath), content).map_err(|e| {
            Error::RepositoryMutationFailed(format!("failed to write {relpath}: {e}"))
        })
    }

    pub async fn create_branch(&self, branch: &str) -> Result<()> {
        validate_branch_name(branch)?;
        self.git(&["checkout", "-b", branch]).await?;
        debug!(branch, "created branch");
        Ok(())
    }

    /// Stage `relpath` and commit it with the given identity.
    pub async fn commit_file(
        &self,
        relpath: &str,
        message: &str,
        identity: &CommitIdentity,
    ) -> Result<String> {
        self.git(&["add", "--", relpath]).await?;
        let user_name = format!("user.name={}", identity.name);
        let user_email = format!("user.email={}", identity.email);
        self.git(&[
            "-c",
            &user_name,
            "-c",
            &user_email,
            "commit",
            "--no-verify",
            "-m",
            message,
        ])
        .await?;
        let sha = self.head_sha().await?;
        info!(file = relpath, commit = %sha, "committed fix");
        Ok(sha)
    }

    pub async fn push(&self, branch: &str) -> Result<()> {
        validate_branch_name(branch)?;
        self.git(&["push", "--set-upstream", "origin", branch]).await?;
        info!(branch, "pushed branch");
        Ok(())
    }

    /// Discard working-copy edits to `relpath`.
    pub async fn restore_file(&self, relpath: &str) -> Result<()> {
        self.git(&["checkout", "--", relpath]).await?;
        Ok(())
    }

    pub async fn head_sha(&self) -> Result<String> {
        let output = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(output
            .stdout_lines
            .first()
            .map(|s| s.trim().to_string())
            .unwrap_or_default())
    }

    pub async fn current_branch(&self) -> Result<String> {
        let output = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(output
            .stdout_lines
            .first()
            .map(|s| s.trim().to_string())
            .unwrap_or_default())
    }

    async fn git(&self, args: &[&str]) -> Result<ProcessOutput> {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let output = run_git(&self.path, owned, self.timeout, &self.secrets)
            .await
            .map_err(|e| Error::RepositoryMutationFailed(redact(&e.to_string(), &self.secrets)))?;
        if !output.success() {
            return Err(Error::RepositoryMutationFailed(format!(
                "git {} failed: {}",
                args.iter()
                    .find(|a| !a.starts_with('-') && !a.contains('='))
                    .copied()
                    .unwrap_or_default(),
                output.tail(5)
            )));
        }
        Ok(output)
    }
}

async fn run_git(
    dir: &Path,
    args: Vec<String>,
    timeout: Duration,
    secrets: &[String],
) -> Result<ProcessOutput> {
    spawn_and_stream(ProcessConfig {
        command: "git".to_string(),
        args,
        working_dir: dir.to_path_buf(),
        timeout: Some(timeout),
        log_prefix: "git".to_string(),
        env: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
        secrets: secrets.to_vec(),
    })
    .await
}

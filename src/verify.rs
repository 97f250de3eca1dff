use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};
use crate::process::{ProcessConfig, spawn_and_stream};

pub trait FixVerifier {
    /// Check the fix already written to `relpath` inside `repo_dir`.
    fn verify(
        &self,
        repo_dir: &Path,
        relpath: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Accepts every fix.
pub struct NoVerification;

impl FixVerifier for NoVerification {
    async fn verify(&self, _repo_dir: &Path, _relpath: &str) -> Result<()> {
        Ok(())
    }
}

/// Runs `sh -c <command>` in the clone; a non-zero exit rejects the fix.
/// `PATCHIQ_FILE` holds the repository-relative path of the fixed file.
pub struct CommandVerifier {
    command: String,
    timeout: Duration,
}

impl CommandVerifier {
    pub fn new(command: String, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl FixVerifier for CommandVerifier {
    async fn verify(&self, repo_dir: &Path, relpath: &str) -> Result<()> {
        info!(command = %self.command, file = relpath, "verifying fix");
        let output = spawn_and_stream(ProcessConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), self.command.clone()],
            working_dir: repo_dir.to_path_buf(),
            timeout: Some(self.timeout),
            log_prefix: "verify".to_string(),
            env: vec![("PATCHIQ_FILE".to_string(), relpath.to_string())],
            secrets: vec![],
        })
        .await
        .map_err(|e| Error::VerificationFailed(e.to_string()))?;

        if !output.success() {
            return Err(Error::VerificationFailed(format!(
                "`{}` exited with code {}: {}",
                self.command,
                output.exit_code,
                output.tail(10)
            )));
        }
        Ok(())
    }
}

/// Dispatch between the configured verifiers.
pub enum AnyVerifier {
    None(NoVerification),
    Command(CommandVerifier),
}

impl AnyVerifier {
    pub fn from_command(command: Option<&str>, timeout: Duration) -> Self {
        match command.map(str::trim).filter(|c| !c.is_empty()) {
            Some(cmd) => AnyVerifier::Command(CommandVerifier::new(cmd.to_string(), timeout)),
            None => AnyVerifier::None(NoVerification),
        }
    }
}

impl FixVerifier for AnyVerifier {
    async fn verify(&self, repo_dir: &Path, relpath: &str) -> Result<()> {
        match self {
            AnyVerifier::None(v) => v.verify(repo_dir, relpath).await,
            AnyVerifier::Command(v) => v.verify(repo_dir, relpath).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_passing_command() {
        let dir = TempDir::new().unwrap();
        let verifier = CommandVerifier::new("test -n \"$PATCHIQ_FILE\"".into(), Duration::from_secs(5));
        verifier.verify(dir.path(), "app/calc.py").await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_command_reports_output() {
        let dir = TempDir::new().unwrap();
        let verifier = CommandVerifier::new(
            "echo 'SyntaxError: invalid syntax' >&2; exit 3".into(),
            Duration::from_secs(5),
        );
        let err = verifier.verify(dir.path(), "app/calc.py").await.unwrap_err();
        assert!(matches!(err, Error::VerificationFailed(_)));
        let msg = err.to_string();
        assert!(msg.contains("code 3"));
        assert!(msg.contains("SyntaxError"));
    }

    #[tokio::test]
    async fn test_timeout_is_verification_failure() {
        let dir = TempDir::new().unwrap();
        let verifier = CommandVerifier::new("sleep 5".into(), Duration::from_millis(200));
        let err = verifier.verify(dir.path(), "x.py").await.unwrap_err();
        assert!(matches!(err, Error::VerificationFailed(_)));
    }

    #[test]
    fn test_from_command_blank_means_none() {
        assert!(matches!(
            AnyVerifier::from_command(Some("  "), Duration::from_secs(1)),
            AnyVerifier::None(_)
        ));
        assert!(matches!(
            AnyVerifier::from_command(Some("python -m py_compile \"$PATCHIQ_FILE\""), Duration::from_secs(1)),
            AnyVerifier::Command(_)
        ));
    }
}

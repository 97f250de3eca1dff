use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("input missing: {0}")]
    InputMissing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no source file reference found in trace (expected *.{0})")]
    NoFileReferenceFound(String),

    #[error("file referenced by trace not found in repository: {0}")]
    FileNotFound(String),

    #[error("unparsable model output: {0}")]
    UnparsableOutput(String),

    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("analysis phase failed after {attempts} attempt(s): {last_error}")]
    AnalysisFailed { attempts: u32, last_error: String },

    #[error("fix phase failed after {attempts} attempt(s): {last_error}")]
    FixFailed { attempts: u32, last_error: String },

    #[error("fix verification failed: {0}")]
    VerificationFailed(String),

    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("repository mutation failed: {0}")]
    RepositoryMutationFailed(String),

    #[error("pull request creation failed: {0}")]
    PullRequestCreationFailed(String),

    #[error("diff error: {0}")]
    Diff(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("another run is already in progress (lock held on {0})")]
    RunInProgress(PathBuf),
}

impl Error {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigNotFound(_)
            | Error::ConfigParse(_)
            | Error::ConfigValidation(_)
            | Error::InputMissing(_) => 2,
            Error::NoFileReferenceFound(_) | Error::FileNotFound(_) => 3,
            Error::AnalysisFailed { .. } => 4,
            Error::FixFailed { .. } => 5,
            Error::VerificationFailed(_) => 6,
            Error::RepositoryUnavailable(_) | Error::RepositoryMutationFailed(_) => 7,
            Error::PullRequestCreationFailed(_) => 8,
            Error::RunInProgress(_) => 9,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_distinguish_failure_classes() {
        assert_eq!(Error::InputMissing("trace".into()).exit_code(), 2);
        assert_eq!(Error::FileNotFound("a.py".into()).exit_code(), 3);
        assert_eq!(
            Error::AnalysisFailed {
                attempts: 3,
                last_error: "x".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            Error::FixFailed {
                attempts: 3,
                last_error: "x".into()
            }
            .exit_code(),
            5
        );
        assert_eq!(Error::RepositoryMutationFailed("push".into()).exit_code(), 7);
        assert_eq!(
            Error::PullRequestCreationFailed("422".into()).exit_code(),
            8
        );
        assert_eq!(Error::Ledger("corrupt".into()).exit_code(), 1);
    }

    #[test]
    fn test_phase_failure_message_includes_attempts() {
        let err = Error::FixFailed {
            attempts: 2,
            last_error: "no JSON object".into(),
        };
        assert_eq!(
            err.to_string(),
            "fix phase failed after 2 attempt(s): no JSON object"
        );
    }
}

use std::path::PathBuf;

use patchiq::cli::RunArgs;
use patchiq::config::{Config, ModelProvider};
use patchiq::error::Error;
use serial_test::serial;

const KEYS: &[&str] = &[
    "REPO_URL",
    "GITHUB_PAT",
    "BASE_BRANCH",
    "ERROR_LOG_PATH",
    "RUN_LOGS_DIR",
    "MAX_RETRIES",
    "STEP_BUDGET",
    "LLM_PROVIDER",
    "LLM_MODEL",
    "LLM_API_KEY",
    "LLM_BASE_URL",
    "ATTEMPT_TIMEOUT",
    "GOOGLE_API_KEY",
    "OPENAI_API_KEY",
];

/// Sets the given variables for the duration of the guard, clearing every
/// other key this crate reads.
struct EnvGuard;

impl EnvGuard {
    fn set(pairs: &[(&str, &str)]) -> Self {
        // SAFETY: tests touching the process environment are `#[serial]`.
        unsafe {
            for key in KEYS {
                std::env::remove_var(key);
            }
            for (key, value) in pairs {
                std::env::set_var(key, value);
            }
        }
        EnvGuard
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // SAFETY: see `EnvGuard::set`.
        unsafe {
            for key in KEYS {
                std::env::remove_var(key);
            }
        }
    }
}

#[test]
#[serial]
fn test_load_reads_process_environment() {
    let _env = EnvGuard::set(&[
        ("REPO_URL", "https://github.com/acme/app.git"),
        ("GITHUB_PAT", "ghp_env"),
        ("OPENAI_API_KEY", "sk-env"),
        ("LLM_PROVIDER", "openai"),
        ("LLM_MODEL", "gpt-4o-mini"),
        ("ERROR_LOG_PATH", "/var/log/app/errors.log"),
        ("MAX_RETRIES", "5"),
    ]);
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("patchiq.toml");
    std::fs::write(&path, "max_retries = 2\nbase_branch = \"develop\"\n").unwrap();

    let config = Config::load(Some(path.to_str().unwrap()), &RunArgs::default()).unwrap();
    assert_eq!(config.repo_url, "https://github.com/acme/app.git");
    assert_eq!(config.github_token, "ghp_env");
    assert_eq!(config.llm_provider, ModelProvider::OpenAi);
    assert_eq!(config.llm_api_key, "sk-env");
    assert_eq!(config.llm_model, "gpt-4o-mini");
    assert_eq!(config.trace_file, PathBuf::from("/var/log/app/errors.log"));
    // Environment beats the file; the file still fills unset keys.
    assert_eq!(config.max_retries, 5);
    assert_eq!(config.base_branch, "develop");
}

#[test]
#[serial]
fn test_cli_flags_beat_environment() {
    let _env = EnvGuard::set(&[
        ("REPO_URL", "https://github.com/acme/app.git"),
        ("GITHUB_PAT", "ghp_env"),
        ("GOOGLE_API_KEY", "g-env"),
        ("BASE_BRANCH", "develop"),
    ]);
    let args = RunArgs {
        base_branch: Some("release".to_string()),
        dry_run: true,
        ..Default::default()
    };
    let dir = tempfile::TempDir::new().unwrap();
    let empty_file = dir.path().join("patchiq.toml");
    std::fs::write(&empty_file, "").unwrap();

    let config = Config::load(Some(empty_file.to_str().unwrap()), &args).unwrap();
    assert_eq!(config.base_branch, "release");
    assert!(config.dry_run);
    assert_eq!(config.llm_api_key, "g-env");
}

#[test]
#[serial]
fn test_malformed_env_number_is_rejected() {
    let _env = EnvGuard::set(&[
        ("REPO_URL", "https://github.com/acme/app.git"),
        ("GITHUB_PAT", "ghp_env"),
        ("GOOGLE_API_KEY", "g-env"),
        ("ATTEMPT_TIMEOUT", "soon"),
    ]);
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("patchiq.toml");
    std::fs::write(&path, "").unwrap();

    let err = Config::load(Some(path.to_str().unwrap()), &RunArgs::default()).unwrap_err();
    assert!(matches!(err, Error::ConfigValidation(_)), "got {err:?}");
    assert!(err.to_string().contains("ATTEMPT_TIMEOUT"));
}

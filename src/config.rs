use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cli::RunArgs;
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "patchiq.toml";
pub const DEFAULT_TRACE_FILE: &str = "errors.log";
pub const DEFAULT_RUN_LOGS_DIR: &str = "run_logs";
pub const DEFAULT_BASE_BRANCH: &str = "main";
pub const DEFAULT_EXTENSION: &str = "py";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub repo_url: Option<String>,
    pub github_token: Option<String>,
    pub base_branch: Option<String>,
    pub trace_file: Option<String>,
    pub run_logs_dir: Option<String>,
    pub max_retries: Option<u32>,
    pub step_budget: Option<u32>,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub attempt_timeout: Option<u64>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub git_timeout: Option<u64>,
    pub source_extension: Option<String>,
    pub verify_command: Option<String>,
    pub commit_author_name: Option<String>,
    pub commit_author_email: Option<String>,
    pub prompts_dir: Option<String>,
    pub dry_run: Option<bool>,
}

impl ConfigFile {
    /// Load the config file. An explicit path must exist; the default
    /// `patchiq.toml` is optional.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => {
                let path = Path::new(p);
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.to_path_buf()));
                }
                parse_config(&std::fs::read_to_string(path)?)
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    parse_config(&std::fs::read_to_string(path)?)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Build a layer from environment variables. Empty values count as unset.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let layer = Self {
            repo_url: get("REPO_URL"),
            github_token: get("GITHUB_PAT"),
            base_branch: get("BASE_BRANCH"),
            trace_file: get("ERROR_LOG_PATH"),
            run_logs_dir: get("RUN_LOGS_DIR"),
            max_retries: parse_env_number(&get, "MAX_RETRIES")?,
            step_budget: parse_env_number(&get, "STEP_BUDGET")?,
            llm_provider: get("LLM_PROVIDER"),
            llm_model: get("LLM_MODEL"),
            llm_api_key: get("LLM_API_KEY"),
            llm_base_url: get("LLM_BASE_URL"),
            attempt_timeout: parse_env_number(&get, "ATTEMPT_TIMEOUT")?,
            ..Default::default()
        };
        validate(&layer)?;
        Ok(layer)
    }

    /// Overlay `higher` on top of `self`; values set in `higher` win.
    pub fn overlay(self, higher: ConfigFile) -> ConfigFile {
        ConfigFile {
            repo_url: higher.repo_url.or(self.repo_url),
            github_token: higher.github_token.or(self.github_token),
            base_branch: higher.base_branch.or(self.base_branch),
            trace_file: higher.trace_file.or(self.trace_file),
            run_logs_dir: higher.run_logs_dir.or(self.run_logs_dir),
            max_retries: higher.max_retries.or(self.max_retries),
            step_budget: higher.step_budget.or(self.step_budget),
            llm_provider: higher.llm_provider.or(self.llm_provider),
            llm_model: higher.llm_model.or(self.llm_model),
            llm_api_key: higher.llm_api_key.or(self.llm_api_key),
            llm_base_url: higher.llm_base_url.or(self.llm_base_url),
            attempt_timeout: higher.attempt_timeout.or(self.attempt_timeout),
            initial_backoff_ms: higher.initial_backoff_ms.or(self.initial_backoff_ms),
            max_backoff_ms: higher.max_backoff_ms.or(self.max_backoff_ms),
            git_timeout: higher.git_timeout.or(self.git_timeout),
            source_extension: higher.source_extension.or(self.source_extension),
            verify_command: higher.verify_command.or(self.verify_command),
            commit_author_name: higher.commit_author_name.or(self.commit_author_name),
            commit_author_email: higher.commit_author_email.or(self.commit_author_email),
            prompts_dir: higher.prompts_dir.or(self.prompts_dir),
            dry_run: higher.dry_run.or(self.dry_run),
        }
    }
}

impl From<&RunArgs> for ConfigFile {
    fn from(args: &RunArgs) -> Self {
        Self {
            repo_url: args.repo_url.clone(),
            base_branch: args.base_branch.clone(),
            trace_file: args.trace_file.clone(),
            run_logs_dir: args.run_logs_dir.clone(),
            max_retries: args.max_retries,
            step_budget: args.step_budget,
            llm_provider: args.llm_provider.clone(),
            llm_model: args.llm_model.clone(),
            attempt_timeout: args.attempt_timeout,
            verify_command: args.verify_command.clone(),
            prompts_dir: args.prompts_dir.clone(),
            dry_run: args.dry_run.then_some(true),
            ..Default::default()
        }
    }
}

fn parse_env_number<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match get(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            Error::ConfigValidation(format!("{key} must be a non-negative integer, got {raw:?}"))
        }),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    Gemini,
    OpenAi,
}

impl ModelProvider {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::ConfigValidation(format!(
                "unknown llm_provider: {other} (expected: gemini, openai)"
            ))),
        }
    }

    /// Model used when `llm_model` is not configured.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.5-flash",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    /// Provider-specific environment variable holding the API key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::Gemini => "GOOGLE_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct Config {
    pub repo_url: String,
    pub github_token: String,
    pub base_branch: String,
    pub trace_file: PathBuf,
    pub run_logs_dir: PathBuf,
    pub max_retries: u32,
    pub step_budget: u32,
    pub llm_provider: ModelProvider,
    pub llm_model: String,
    pub llm_api_key: String,
    pub llm_base_url: Option<String>,
    pub attempt_timeout: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub git_timeout: u64,
    pub source_extension: String,
    pub verify_command: Option<String>,
    pub commit_author_name: String,
    pub commit_author_email: String,
    pub prompts_dir: Option<String>,
    pub dry_run: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("repo_url", &self.repo_url)
            .field("github_token", &"<redacted>")
            .field("base_branch", &self.base_branch)
            .field("trace_file", &self.trace_file)
            .field("run_logs_dir", &self.run_logs_dir)
            .field("max_retries", &self.max_retries)
            .field("step_budget", &self.step_budget)
            .field("llm_provider", &self.llm_provider)
            .field("llm_model", &self.llm_model)
            .field("llm_api_key", &"<redacted>")
            .field("llm_base_url", &self.llm_base_url)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("git_timeout", &self.git_timeout)
            .field("source_extension", &self.source_extension)
            .field("verify_command", &self.verify_command)
            .field("commit_author_name", &self.commit_author_name)
            .field("commit_author_email", &self.commit_author_email)
            .field("prompts_dir", &self.prompts_dir)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl Config {
    /// Load config for a run: CLI flags > environment > config file > defaults.
    pub fn load(config_path: Option<&str>, args: &RunArgs) -> Result<Self> {
        let file = ConfigFile::load(config_path)?;
        Self::from_layers(file, |key| std::env::var(key).ok(), args)
    }

    pub fn from_layers(
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
        args: &RunArgs,
    ) -> Result<Self> {
        let cli_layer = ConfigFile::from(args);
        validate(&cli_layer)?;
        let env_layer = ConfigFile::from_env(&env)?;
        let merged = file.overlay(env_layer).overlay(cli_layer);
        validate(&merged)?;

        let llm_provider = ModelProvider::parse(merged.llm_provider.as_deref().unwrap_or("gemini"))?;
        let llm_api_key = merged
            .llm_api_key
            .or_else(|| env(llm_provider.api_key_env()).filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                Error::InputMissing(format!(
                    "model API key (set LLM_API_KEY or {})",
                    llm_provider.api_key_env()
                ))
            })?;

        let repo_url = merged
            .repo_url
            .ok_or_else(|| Error::InputMissing("repository URL (set REPO_URL)".to_string()))?;
        let github_token = merged
            .github_token
            .ok_or_else(|| Error::InputMissing("access token (set GITHUB_PAT)".to_string()))?;

        Ok(Config {
            repo_url,
            github_token,
            base_branch: merged
                .base_branch
                .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string()),
            trace_file: PathBuf::from(
                merged
                    .trace_file
                    .unwrap_or_else(|| DEFAULT_TRACE_FILE.to_string()),
            ),
            run_logs_dir: PathBuf::from(
                merged
                    .run_logs_dir
                    .unwrap_or_else(|| DEFAULT_RUN_LOGS_DIR.to_string()),
            ),
            max_retries: merged.max_retries.unwrap_or(3),
            step_budget: merged.step_budget.unwrap_or(15),
            llm_provider,
            llm_model: merged
                .llm_model
                .unwrap_or_else(|| llm_provider.default_model().to_string()),
            llm_api_key,
            llm_base_url: merged.llm_base_url,
            attempt_timeout: merged.attempt_timeout.unwrap_or(120),
            initial_backoff_ms: merged.initial_backoff_ms.unwrap_or(1000),
            max_backoff_ms: merged.max_backoff_ms.unwrap_or(30_000),
            git_timeout: merged.git_timeout.unwrap_or(300),
            source_extension: merged
                .source_extension
                .unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
            verify_command: merged.verify_command,
            commit_author_name: merged
                .commit_author_name
                .unwrap_or_else(|| "patchiq".to_string()),
            commit_author_email: merged
                .commit_author_email
                .unwrap_or_else(|| "patchiq@users.noreply.github.com".to_string()),
            prompts_dir: merged.prompts_dir,
            dry_run: merged.dry_run.unwrap_or(false),
        })
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout)
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(ref provider) = config.llm_provider {
        ModelProvider::parse(provider)?;
    }
    if config.max_retries == Some(0) {
        return Err(Error::ConfigValidation(
            "max_retries must be > 0".to_string(),
        ));
    }
    if config.step_budget == Some(0) {
        return Err(Error::ConfigValidation(
            "step_budget must be > 0".to_string(),
        ));
    }
    if config.attempt_timeout == Some(0) {
        return Err(Error::ConfigValidation(
            "attempt_timeout must be > 0".to_string(),
        ));
    }
    if config.git_timeout == Some(0) {
        return Err(Error::ConfigValidation(
            "git_timeout must be > 0".to_string(),
        ));
    }
    if let (Some(initial), Some(max)) = (config.initial_backoff_ms, config.max_backoff_ms)
        && initial > max
    {
        return Err(Error::ConfigValidation(
            "initial_backoff_ms must be <= max_backoff_ms".to_string(),
        ));
    }
    if let Some(ref ext) = config.source_extension
        && (ext.is_empty() || ext.starts_with('.') || !ext.chars().all(|c| c.is_ascii_alphanumeric()))
    {
        return Err(Error::ConfigValidation(format!(
            "source_extension must be alphanumeric without a leading dot, got {ext:?}"
        )));
    }
    Ok(())
}

pub mod analysis;
pub mod fix;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::extract_json_object;
use crate::llm::{ChatModel, Conversation, Role};
use crate::prompts::PromptEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Analysis,
    Fix,
}

impl Phase {
    fn expected_keys(self) -> &'static str {
        match self {
            Phase::Analysis => "RootCause, ProposedFixDetails, GithubFilePathHavingError",
            Phase::Fix => "FixedCode",
        }
    }

    fn exhausted(self, attempts: u32, last_error: String) -> Error {
        match self {
            Phase::Analysis => Error::AnalysisFailed {
                attempts,
                last_error,
            },
            Phase::Fix => Error::FixFailed {
                attempts,
                last_error,
            },
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Analysis => write!(f, "analysis"),
            Phase::Fix => write!(f, "fix"),
        }
    }
}

/// Attempt ceiling and pacing for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retries,
            attempt_timeout: config.attempt_timeout(),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay after the given failed attempt (1-based): doubled each time,
    /// capped at `max_backoff`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Everything a phase needs from the run: the model, prompts, limits and the
/// run id that scopes its conversation thread.
pub struct PhaseContext<'a, M> {
    pub model: &'a M,
    pub prompts: &'a PromptEngine,
    pub policy: RetryPolicy,
    pub step_budget: u32,
    pub run_id: String,
    pub extension: String,
}

impl<M: ChatModel> PhaseContext<'_, M> {
    fn thread(&self, phase: Phase, system: String) -> Conversation {
        Conversation::new(format!("{}:{phase}", self.run_id), system, self.step_budget)
    }

    /// Run the attempt loop on a fresh thread. `accept` decodes and
    /// validates the extracted object; any error it returns is retried.
    async fn drive<T>(
        &self,
        phase: Phase,
        system: String,
        request: String,
        accept: impl Fn(Value) -> Result<T>,
    ) -> Result<T> {
        let mut conversation = self.thread(phase, system);
        conversation.push_user(request);

        let max_attempts = self.policy.max_attempts;
        let mut attempts = 0;
        let mut last_error = String::from("no attempt made");

        while attempts < max_attempts {
            if let Err(e) = conversation.begin_step() {
                last_error = e.to_string();
                break;
            }
            attempts += 1;
            info!(%phase, attempt = attempts, max_attempts, thread = %conversation.id, "requesting model");

            match self.attempt(&mut conversation, &accept).await {
                Ok(value) => {
                    info!(%phase, attempt = attempts, "phase output accepted");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(%phase, attempt = attempts, error = %e, "attempt failed");
                    last_error = e.to_string();
                    if attempts >= max_attempts {
                        break;
                    }
                    // A failed call left no reply; resend the thread unchanged.
                    if conversation.messages.last().map(|m| m.role) == Some(Role::Assistant) {
                        conversation.push_user(self.corrective_turn(phase, &last_error)?);
                    }
                    let backoff = self.policy.backoff_after(attempts);
                    info!(%phase, backoff_ms = backoff.as_millis() as u64, "backing off before retry");
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Err(phase.exhausted(attempts, last_error))
    }

    async fn attempt<T>(
        &self,
        conversation: &mut Conversation,
        accept: &impl Fn(Value) -> Result<T>,
    ) -> Result<T> {
        let timeout = self.policy.attempt_timeout;
        let reply = match tokio::time::timeout(timeout, self.model.complete(conversation)).await {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(Error::Model(format!(
                    "model call timed out after {}s",
                    timeout.as_secs()
                )));
            }
        };
        conversation.push_assistant(reply.as_str());
        accept(extract_json_object(&reply)?)
    }

    fn corrective_turn(&self, phase: Phase, error: &str) -> Result<String> {
        let vars = HashMap::from([
            ("error", error.to_string()),
            ("expected_keys", phase.expected_keys().to_string()),
        ]);
        self.prompts.render("retry", &vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(max_ms),
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let p = policy(100, 350);
        assert_eq!(p.backoff_after(1), Duration::from_millis(100));
        assert_eq!(p.backoff_after(2), Duration::from_millis(200));
        assert_eq!(p.backoff_after(3), Duration::from_millis(350));
        assert_eq!(p.backoff_after(40), Duration::from_millis(350));
    }

    #[test]
    fn test_exhausted_maps_to_phase_error() {
        assert!(matches!(
            Phase::Analysis.exhausted(3, "x".into()),
            Error::AnalysisFailed { attempts: 3, .. }
        ));
        assert!(matches!(
            Phase::Fix.exhausted(1, "x".into()),
            Error::FixFailed { attempts: 1, .. }
        ));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Analysis.to_string(), "analysis");
        assert_eq!(Phase::Fix.to_string(), "fix");
    }
}

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::llm::{ChatModel, Conversation};
use crate::phases::{PhaseContext, RetryPolicy};
use crate::prompts::PromptEngine;

/// Scripted reply for one model call.
pub enum Reply {
    Text(String),
    Fail(String),
    Hang,
}

/// `ChatModel` that plays back canned replies and records every thread it
/// was asked to complete.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    pub seen: Mutex<Vec<Conversation>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Reply::Text(r.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl ChatModel for ScriptedModel {
    async fn complete(&self, conversation: &Conversation) -> Result<String> {
        self.seen.lock().unwrap().push(conversation.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(msg)) => Err(Error::Model(msg)),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::Model("unreachable".into()))
            }
            None => Err(Error::Model("script exhausted".into())),
        }
    }
}

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        attempt_timeout: Duration::from_millis(200),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

pub fn context<'a>(
    model: &'a ScriptedModel,
    prompts: &'a PromptEngine,
    max_attempts: u32,
) -> PhaseContext<'a, ScriptedModel> {
    PhaseContext {
        model,
        prompts,
        policy: fast_policy(max_attempts),
        step_budget: 15,
        run_id: "run-1".to_string(),
        extension: "py".to_string(),
    }
}

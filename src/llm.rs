use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{Config, ModelProvider};
use crate::error::{Error, Result};
use crate::process::redact;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// One phase's conversation thread: fixed system instruction, the turns so
/// far, and a cap on how many model calls the thread may make.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub system: String,
    pub messages: Vec<Message>,
    step_budget: u32,
    steps: u32,
}

impl Conversation {
    pub fn new(id: impl Into<String>, system: impl Into<String>, step_budget: u32) -> Self {
        Self {
            id: id.into(),
            system: system.into(),
            messages: Vec::new(),
            step_budget,
            steps: 0,
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    /// Reserve one model call against the step budget.
    pub fn begin_step(&mut self) -> Result<()> {
        if self.steps >= self.step_budget {
            return Err(Error::Model(format!(
                "step budget of {} exhausted on thread {}",
                self.step_budget, self.id
            )));
        }
        self.steps += 1;
        Ok(())
    }

}

pub trait ChatModel {
    /// Send the whole thread and return the assistant's reply text.
    fn complete(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

/// Google Gemini `generateContent` client.
pub struct GeminiModel {
    model: String,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiModel {
    pub fn new(model: String, api_key: String, base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            timeout,
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    pub fn request_body(conversation: &Conversation) -> Value {
        let contents: Vec<Value> = conversation
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        json!({
            "systemInstruction": {"parts": [{"text": conversation.system}]},
            "contents": contents,
            "generationConfig": {"temperature": 0},
        })
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

fn gemini_text(response: GeminiResponse) -> Result<String> {
    let text = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(Error::Model("Gemini returned no text content".to_string()));
    }
    Ok(text)
}

impl ChatModel for GeminiModel {
    async fn complete(&self, conversation: &Conversation) -> Result<String> {
        let body = Self::request_body(conversation);
        debug!(thread = %conversation.id, turns = conversation.messages.len(), "calling Gemini");
        let response: GeminiResponse = post_json(
            self.endpoint(),
            vec![("x-goog-api-key".to_string(), self.api_key.clone())],
            body,
            self.timeout,
            self.api_key.clone(),
        )
        .await?;
        gemini_text(response)
    }
}

/// OpenAI-compatible `chat/completions` client.
pub struct OpenAiModel {
    model: String,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiModel {
    pub fn new(model: String, api_key: String, base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            timeout,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn request_body(&self, conversation: &Conversation) -> Value {
        let mut messages = vec![json!({"role": "system", "content": conversation.system})];
        messages.extend(
            conversation
                .messages
                .iter()
                .map(|m| json!({"role": m.role.to_string(), "content": m.content})),
        );

        json!({
            "model": self.model,
            "temperature": 0,
            "messages": messages,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

fn openai_text(response: OpenAiResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::Model("chat completion returned no content".to_string()))
}

impl ChatModel for OpenAiModel {
    async fn complete(&self, conversation: &Conversation) -> Result<String> {
        let body = self.request_body(conversation);
        debug!(thread = %conversation.id, turns = conversation.messages.len(), "calling chat completions");
        let response: OpenAiResponse = post_json(
            self.endpoint(),
            vec![(
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            )],
            body,
            self.timeout,
            self.api_key.clone(),
        )
        .await?;
        openai_text(response)
    }
}

/// POST a JSON body on a blocking thread and decode the JSON reply.
async fn post_json<T>(
    url: String,
    headers: Vec<(String, String)>,
    body: Value,
    timeout: Duration,
    secret: String,
) -> Result<T>
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let mut request = agent.post(&url).set("Content-Type", "application/json");
        for (name, value) in &headers {
            request = request.set(name, value);
        }

        let secrets = [secret];
        match request.send_json(&body) {
            Ok(response) => response
                .into_json::<T>()
                .map_err(|e| Error::Model(format!("failed to decode model response: {e}"))),
            Err(ureq::Error::Status(code, response)) => {
                let text = response.into_string().unwrap_or_default();
                let text: String = redact(&text, &secrets)
                    .chars()
                    .take(ERROR_BODY_CHARS)
                    .collect();
                Err(Error::Model(format!("model API returned HTTP {code}: {text}")))
            }
            Err(e) => Err(Error::Model(format!(
                "model API request failed: {}",
                redact(&e.to_string(), &secrets)
            ))),
        }
    })
    .await
    .map_err(|e| Error::Model(format!("model request task failed: {e}")))?
}

/// Enum dispatching to the configured provider.
pub enum AnyModel {
    Gemini(GeminiModel),
    OpenAi(OpenAiModel),
}

impl ChatModel for AnyModel {
    async fn complete(&self, conversation: &Conversation) -> Result<String> {
        match self {
            AnyModel::Gemini(m) => m.complete(conversation).await,
            AnyModel::OpenAi(m) => m.complete(conversation).await,
        }
    }
}

/// Build the model client selected by `llm_provider`.
pub fn build_model(config: &Config) -> AnyModel {
    let model = config.llm_model.clone();
    let key = config.llm_api_key.clone();
    let base = config.llm_base_url.clone();
    let timeout = config.attempt_timeout();
    match config.llm_provider {
        ModelProvider::Gemini => AnyModel::Gemini(GeminiModel::new(model, key, base, timeout)),
        ModelProvider::OpenAi => AnyModel::OpenAi(OpenAiModel::new(model, key, base, timeout)),
    }
}

//! Language-model seam: provider trait, the Anthropic Messages client, and a
//! scripted mock used by tests and local runs.
//!
//! Both adapters (classifier and editorial generator) talk to the model only
//! through [`LlmClient`], so the orchestrator never depends on a concrete
//! provider.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::LlmSettings;

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One single-turn completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: &'static str,
    pub user: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// No credential configured. Treated as a run-level failure.
    #[error("missing API key ({0})")]
    MissingApiKey(&'static str),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },
}

impl LlmError {
    /// Whether retrying the next item is pointless because the whole run is misconfigured.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LlmError::MissingApiKey(_))
    }
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one request and return the raw text of the first content block.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynLlmClient = Arc<dyn LlmClient>;

// ------------------------------------------------------------
// Anthropic Messages API
// ------------------------------------------------------------

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicClient {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl AnthropicClient {
    /// The key may be absent; every call then fails with [`LlmError::MissingApiKey`].
    pub fn new(settings: &LlmSettings, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ledge-curator/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_url: settings.api_url.clone(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(LlmError::MissingApiKey(API_KEY_ENV));
        };

        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: request.system,
            messages: vec![Message {
                role: "user",
                content: &request.user,
            }],
        };

        let resp = self
            .http
            .post(&self.api_url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = resp.json().await?;
        Ok(parsed
            .content
            .into_iter()
            .next()
            .and_then(|b| b.text)
            .unwrap_or_default())
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

// ------------------------------------------------------------
// Mock
// ------------------------------------------------------------

type Responder = dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync;

/// Deterministic client for tests/local runs. Records every request it sees.
pub struct MockLlm {
    responder: Box<Responder>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl MockLlm {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same text.
    pub fn fixed(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| Ok(reply.clone()))
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.lock().push(request.clone());
        (self.responder)(request)
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Reply cleanup
// ------------------------------------------------------------

/// Strip Markdown code fences (```json ... ```) that models like to wrap JSON in.
pub fn strip_code_fences(reply: &str) -> String {
    reply
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

//! Provider clients
//!
//! A [`ProviderClient`] performs one completion call against one provider.
//! The coordinator only sees this trait; [`OpenAiCompatibleClient`] is the
//! HTTP implementation every built-in backend is reached through, and tests
//! substitute scripted clients.

pub mod openai_compat;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::CouncilConfig;
use crate::registry::{ProviderCatalog, ProviderProfile};
use crate::state::types::{ProviderId, Subtask, TaskType};

pub use openai_compat::OpenAiCompatibleClient;

/// Errors from a single provider call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Transient errors are retried once; rejections never are
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::Network(_)
                | ProviderError::RateLimited
                | ProviderError::Server { .. }
        )
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => ProviderError::Authentication(format!("HTTP {status}")),
            429 => ProviderError::RateLimited,
            500..=599 => ProviderError::Server { status },
            _ => ProviderError::Rejected {
                status,
                message: body.chars().take(200).collect(),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Network(_) => "network",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::Server { .. } => "server",
            ProviderError::Rejected { .. } => "rejected",
            ProviderError::Authentication(_) => "authentication",
            ProviderError::Malformed(_) => "malformed",
        }
    }
}

/// One chat-completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub provider: ProviderId,
    /// Model name sent to the API
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn for_subtask(subtask: &Subtask, profile: &ProviderProfile, max_tokens: u32) -> Self {
        Self {
            provider: profile.name.clone(),
            model: profile.model.clone(),
            system: system_prompt(subtask.task_type).to_string(),
            prompt: subtask.content.clone(),
            max_tokens,
            temperature: temperature_for(subtask.task_type),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    /// Tokens reported by the provider, when it reports usage
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    /// Self-reported confidence in [0, 1]
    pub confidence: Option<f32>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.input_tokens = Some(input_tokens);
        self.output_tokens = Some(output_tokens);
        self
    }
}

const CONFIDENCE_INSTRUCTION: &str = "At the end of your response, indicate your confidence level \
     (0.0-1.0) in brackets like [confidence: 0.85].";

fn system_prompt(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Reasoning => "You are a careful analyst. Reason step by step and explain clearly.",
        TaskType::Research => "You are a research assistant. Summarize what is known, name sources where possible, and flag uncertainty.",
        TaskType::CodeGeneration => "You are an expert programmer. Produce correct, idiomatic code with brief explanation.",
        TaskType::Debugging => "You are a debugging expert. Identify the root cause before proposing a fix.",
        TaskType::CreativeOutput => "You are a creative writer. Be vivid, original and concise.",
        TaskType::ImageGeneration => "Describe the requested image precisely enough for an image model to render it.",
        TaskType::FactChecking => "You are a fact checker. State for each claim whether it is supported, refuted or unverifiable.",
        TaskType::Verification => "You are a reviewer. Check the work for errors and state what you verified.",
    }
}

/// Full system prompt sent with a request, including the confidence tag request
pub fn framed_system_prompt(request: &CompletionRequest) -> String {
    format!("{}\n\n{}", request.system, CONFIDENCE_INSTRUCTION)
}

fn temperature_for(task_type: TaskType) -> f32 {
    match task_type {
        TaskType::CreativeOutput | TaskType::ImageGeneration => 0.8,
        TaskType::FactChecking | TaskType::Verification | TaskType::Debugging => 0.1,
        _ => 0.3,
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;
}

pub type SharedProviderClient = Arc<dyn ProviderClient>;

/// Provider id to client
#[derive(Clone, Default)]
pub struct ProviderPool {
    clients: HashMap<ProviderId, SharedProviderClient>,
}

impl std::fmt::Debug for ProviderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.clients.keys().collect();
        names.sort();
        f.debug_struct("ProviderPool").field("clients", &names).finish()
    }
}

impl ProviderPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP clients for every catalog entry whose backend can authenticate
    pub fn from_config(
        config: &CouncilConfig,
        catalog: &ProviderCatalog,
    ) -> Result<Self, ProviderError> {
        let http = openai_compat::http_client()?;
        let mut pool = Self::new();
        for profile in catalog.providers() {
            if !config.has_credentials(profile.backend) {
                debug!(provider = %profile.name, backend = %profile.backend, "No credentials, skipping");
                continue;
            }
            let endpoint = config.endpoint(profile.backend);
            pool.insert(Arc::new(OpenAiCompatibleClient::new(
                profile.name.clone(),
                endpoint,
                http.clone(),
            )));
        }
        Ok(pool)
    }

    pub fn insert(&mut self, client: SharedProviderClient) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn with_client(mut self, client: SharedProviderClient) -> Self {
        self.insert(client);
        self
    }

    pub fn get(&self, provider: &str) -> Option<SharedProviderClient> {
        self.clients.get(provider).cloned()
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.clients.contains_key(provider)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

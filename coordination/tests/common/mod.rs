//! Shared fixtures: scripted providers and a fixed decomposition

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use council_coordination::analyzer::{
    AnalysisError, Complexity, Intent, QueryAnalysis, QueryAnalyzer,
};
use council_coordination::{
    Backend, CompletionRequest, CompletionResponse, CouncilConfig, ModeProfile, ProgressEvent,
    ProgressStream, ProviderClient, ProviderError, ProviderProfile, Subtask, TaskType,
};

type Responder =
    Box<dyn Fn(&CompletionRequest) -> Result<CompletionResponse, ProviderError> + Send + Sync>;

/// In-process provider with a fixed answer policy
pub struct ScriptedClient {
    name: String,
    responder: Responder,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(
        name: &str,
        responder: impl Fn(&CompletionRequest) -> Result<CompletionResponse, ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            responder: Box::new(responder),
            delay: Duration::from_millis(5),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers every prompt with the given self-reported confidence
    pub fn answering(name: &str, confidence: f32) -> Self {
        let owner = name.to_string();
        Self::new(name, move |request| {
            Ok(
                CompletionResponse::text(format!("{owner} on {}", request.prompt))
                    .with_confidence(confidence),
            )
        })
    }

    /// Rejects every call (not retried)
    pub fn failing(name: &str) -> Self {
        Self::new(name, |_| {
            Err(ProviderError::Rejected {
                status: 400,
                message: "model overloaded".to_string(),
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        (self.responder)(request)
    }
}

/// Decomposes every query into the same subtasks
pub struct FixedAnalyzer {
    parts: Vec<(String, TaskType)>,
}

impl FixedAnalyzer {
    pub fn new(parts: &[(&str, TaskType)]) -> Arc<Self> {
        Arc::new(Self {
            parts: parts
                .iter()
                .map(|(text, task_type)| (text.to_string(), *task_type))
                .collect(),
        })
    }
}

impl QueryAnalyzer for FixedAnalyzer {
    fn analyze(&self, text: &str, _profile: &ModeProfile) -> Result<QueryAnalysis, AnalysisError> {
        if text.trim().is_empty() {
            return Err(AnalysisError::EmptyQuery);
        }
        let mut task_types: Vec<TaskType> = Vec::new();
        for (_, task_type) in &self.parts {
            if !task_types.contains(task_type) {
                task_types.push(*task_type);
            }
        }
        Ok(QueryAnalysis {
            intent: Intent::Question,
            complexity: Complexity::Moderate,
            task_types,
            subtasks: self
                .parts
                .iter()
                .enumerate()
                .map(|(i, (content, task_type))| Subtask::new(i, content.clone(), *task_type))
                .collect(),
        })
    }
}

/// Cloud provider serving `capabilities`
pub fn provider(name: &str, capabilities: &[TaskType], price: f64) -> ProviderProfile {
    ProviderProfile::new(name, Backend::Groq, "test-model")
        .with_capabilities(capabilities)
        .with_pricing(price, price)
        .with_latency(0.5)
        .with_reliability(0.8)
}

pub fn config(providers: Vec<ProviderProfile>) -> CouncilConfig {
    CouncilConfig {
        providers,
        ..CouncilConfig::default()
    }
}

/// Every event up to and including the terminal one
pub async fn drain(mut stream: ProgressStream) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

/// Route library logs to the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

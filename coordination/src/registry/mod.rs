//! Provider catalog: identity, capabilities and pricing of inference providers
//!
//! The catalog is static metadata. Live health lives in
//! [`ProviderHealthRegistry`](crate::router::ProviderHealthRegistry) so the
//! catalog can be shared read-only across requests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::state::types::{ProviderId, TaskType};

/// API family a provider is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Groq,
    Together,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "huggingface")]
    HuggingFace,
    Ollama,
}

impl Backend {
    pub fn all() -> &'static [Backend] {
        &[
            Backend::Groq,
            Backend::Together,
            Backend::OpenRouter,
            Backend::HuggingFace,
            Backend::Ollama,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Groq => "groq",
            Backend::Together => "together",
            Backend::OpenRouter => "openrouter",
            Backend::HuggingFace => "huggingface",
            Backend::Ollama => "ollama",
        }
    }

    /// OpenAI-compatible base URL (without `/chat/completions`)
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Backend::Groq => "https://api.groq.com/openai/v1",
            Backend::Together => "https://api.together.xyz/v1",
            Backend::OpenRouter => "https://openrouter.ai/api/v1",
            Backend::HuggingFace => "https://router.huggingface.co/v1",
            Backend::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Environment variable holding the API key, if the backend needs one
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Backend::Groq => Some("GROQ_API_KEY"),
            Backend::Together => Some("TOGETHER_API_KEY"),
            Backend::OpenRouter => Some("OPENROUTER_API_KEY"),
            Backend::HuggingFace => Some("HUGGINGFACE_API_KEY"),
            Backend::Ollama => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Backend::Ollama)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which providers a deployment may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Hosted APIs only
    #[default]
    Cloud,
    /// Locally served models only
    Local,
    /// Both
    Hybrid,
}

impl DeploymentMode {
    pub fn admits(&self, profile: &ProviderProfile) -> bool {
        match self {
            DeploymentMode::Cloud => !profile.local,
            DeploymentMode::Local => profile.local,
            DeploymentMode::Hybrid => true,
        }
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloud" => Ok(DeploymentMode::Cloud),
            "local" => Ok(DeploymentMode::Local),
            "hybrid" => Ok(DeploymentMode::Hybrid),
            other => Err(format!("unknown deployment mode '{other}'")),
        }
    }
}

/// Static description of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Provider id used everywhere else, e.g. `groq-llama3-70b`
    pub name: ProviderId,
    pub backend: Backend,
    /// Model name sent in API requests
    pub model: String,
    pub capabilities: Vec<TaskType>,
    /// USD per input token
    pub cost_per_input_token: f64,
    /// USD per output token
    pub cost_per_output_token: f64,
    /// Typical wall-clock seconds per call
    pub average_latency_secs: f64,
    pub max_context: u32,
    /// Historical answer quality in [0, 1]; used as confidence when the
    /// provider reports none
    pub reliability: f32,
    #[serde(default)]
    pub local: bool,
}

impl ProviderProfile {
    pub fn new(name: impl Into<String>, backend: Backend, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend,
            model: model.into(),
            capabilities: vec![TaskType::Reasoning],
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            average_latency_secs: 1.0,
            max_context: 8_192,
            reliability: 0.8,
            local: backend.is_local(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[TaskType]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    pub fn with_pricing(mut self, per_input_token: f64, per_output_token: f64) -> Self {
        self.cost_per_input_token = per_input_token;
        self.cost_per_output_token = per_output_token;
        self
    }

    pub fn with_latency(mut self, secs: f64) -> Self {
        self.average_latency_secs = secs;
        self
    }

    pub fn with_context(mut self, max_context: u32) -> Self {
        self.max_context = max_context;
        self
    }

    pub fn with_reliability(mut self, reliability: f32) -> Self {
        self.reliability = reliability.clamp(0.0, 1.0);
        self
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.capabilities.contains(&task_type)
    }

    /// USD cost of a call with the given token counts
    pub fn cost_for(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        input_tokens as f64 * self.cost_per_input_token
            + output_tokens as f64 * self.cost_per_output_token
    }
}

/// Ordered, read-only set of provider profiles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCatalog {
    providers: BTreeMap<ProviderId, ProviderProfile>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = ProviderProfile>) -> Self {
        let mut catalog = Self::new();
        catalog.merge(profiles);
        catalog
    }

    /// Built-in hosted and local providers
    pub fn builtin() -> Self {
        use TaskType::*;
        Self::from_profiles([
            ProviderProfile::new("groq-llama3-70b", Backend::Groq, "llama3-70b-8192")
                .with_capabilities(&[
                    Reasoning,
                    Research,
                    CodeGeneration,
                    Debugging,
                    FactChecking,
                    Verification,
                ])
                .with_pricing(0.59e-6, 0.79e-6)
                .with_latency(0.5)
                .with_context(8_192)
                .with_reliability(0.95),
            ProviderProfile::new("groq-mixtral-8x7b", Backend::Groq, "mixtral-8x7b-32768")
                .with_capabilities(&[Reasoning, Research, CodeGeneration, CreativeOutput])
                .with_pricing(0.24e-6, 0.24e-6)
                .with_latency(0.3)
                .with_context(32_768)
                .with_reliability(0.92),
            ProviderProfile::new(
                "together-llama2-70b",
                Backend::Together,
                "meta-llama/Llama-2-70b-chat-hf",
            )
            .with_capabilities(&[Reasoning, Research, CreativeOutput, FactChecking])
            .with_pricing(0.9e-6, 0.9e-6)
            .with_latency(1.5)
            .with_context(4_096)
            .with_reliability(0.90),
            ProviderProfile::new(
                "together-mixtral-8x7b",
                Backend::Together,
                "mistralai/Mixtral-8x7B-Instruct-v0.1",
            )
            .with_capabilities(&[Reasoning, Research, CodeGeneration, CreativeOutput])
            .with_pricing(0.6e-6, 0.6e-6)
            .with_latency(1.0)
            .with_context(32_768)
            .with_reliability(0.91),
            ProviderProfile::new(
                "together-codellama-34b",
                Backend::Together,
                "codellama/CodeLlama-34b-Instruct-hf",
            )
            .with_capabilities(&[CodeGeneration, Debugging])
            .with_pricing(0.776e-6, 0.776e-6)
            .with_latency(1.2)
            .with_context(16_384)
            .with_reliability(0.88),
            ProviderProfile::new(
                "openrouter-claude-3-sonnet",
                Backend::OpenRouter,
                "anthropic/claude-3-sonnet",
            )
            .with_capabilities(&[
                Reasoning,
                Research,
                CodeGeneration,
                Debugging,
                CreativeOutput,
                FactChecking,
                Verification,
            ])
            .with_pricing(3e-6, 15e-6)
            .with_latency(2.0)
            .with_context(200_000)
            .with_reliability(0.98),
            ProviderProfile::new("openrouter-gpt4-turbo", Backend::OpenRouter, "openai/gpt-4-turbo")
                .with_capabilities(&[
                    Reasoning,
                    Research,
                    CodeGeneration,
                    Debugging,
                    CreativeOutput,
                    FactChecking,
                    Verification,
                ])
                .with_pricing(10e-6, 30e-6)
                .with_latency(2.5)
                .with_context(128_000)
                .with_reliability(0.97),
            ProviderProfile::new(
                "huggingface-mistral-7b",
                Backend::HuggingFace,
                "mistralai/Mistral-7B-Instruct-v0.2",
            )
            .with_capabilities(&[Reasoning, CreativeOutput])
            .with_pricing(0.1e-6, 0.1e-6)
            .with_latency(1.8)
            .with_context(8_192)
            .with_reliability(0.80),
            ProviderProfile::new("ollama-llama3-8b", Backend::Ollama, "llama3:8b")
                .with_capabilities(&[Reasoning, Research, CodeGeneration, CreativeOutput])
                .with_latency(2.5)
                .with_context(8_192)
                .with_reliability(0.82),
            ProviderProfile::new("ollama-codellama-7b", Backend::Ollama, "codellama:7b")
                .with_capabilities(&[CodeGeneration, Debugging])
                .with_latency(2.0)
                .with_context(16_384)
                .with_reliability(0.78),
        ])
    }

    /// Insert profiles, replacing any with the same name
    pub fn merge(&mut self, profiles: impl IntoIterator<Item = ProviderProfile>) {
        for profile in profiles {
            self.providers.insert(profile.name.clone(), profile);
        }
    }

    /// Keep only providers the deployment mode admits
    pub fn for_deployment(mut self, mode: DeploymentMode) -> Self {
        self.providers.retain(|_, p| mode.admits(p));
        self
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&ProviderProfile) -> bool) {
        self.providers.retain(|_, p| keep(p));
    }

    pub fn get(&self, name: &str) -> Option<&ProviderProfile> {
        self.providers.get(name)
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderProfile> {
        self.providers.values()
    }

    pub fn names(&self) -> Vec<ProviderId> {
        self.providers.keys().cloned().collect()
    }

    /// Providers whose capabilities include `task_type`, in name order
    pub fn capable_of(&self, task_type: TaskType) -> Vec<&ProviderProfile> {
        self.providers
            .values()
            .filter(|p| p.supports(task_type))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

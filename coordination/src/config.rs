//! Council configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables. Every field has a default, so `CouncilConfig::default()` is a
//! working cloud configuration.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::registry::{Backend, DeploymentMode, ProviderCatalog, ProviderProfile};
use crate::state::types::{ExecutionMode, ProviderId};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    Env { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Circuit-breaker thresholds for one provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before allowing a probe
    pub cooldown_secs: u64,
    /// Upper bound for the cooldown after repeated failed probes
    pub max_cooldown_secs: u64,
    /// Half-open successes needed to close
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
            max_cooldown_secs: 300,
            success_threshold: 1,
        }
    }
}

impl BreakerSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_secs(self.max_cooldown_secs.max(self.cooldown_secs))
    }
}

/// Execution policy for one mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeProfile {
    /// Concurrent provider calls allowed for one request
    pub max_parallel: usize,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Retry once on timeout/network errors
    pub retry_transient: bool,
    pub enable_arbitration: bool,
    /// Results below this confidence are flagged during arbitration
    pub confidence_floor: f32,
    /// Soft USD budget for a request; routing turns cheapest-first past it
    pub cost_limit: Option<f64>,
    pub max_subtasks: usize,
    /// Output tokens assumed per call when estimating
    pub output_tokens: u32,
    /// Tie-break order among equally ranked providers
    pub preferred_providers: Vec<ProviderId>,
}

impl ModeProfile {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn fast() -> Self {
        Self {
            max_parallel: 3,
            timeout_secs: 30,
            retry_transient: true,
            enable_arbitration: false,
            confidence_floor: 0.7,
            cost_limit: Some(1.0),
            max_subtasks: 3,
            output_tokens: 300,
            preferred_providers: vec![
                "groq-mixtral-8x7b".into(),
                "huggingface-mistral-7b".into(),
                "together-mixtral-8x7b".into(),
            ],
        }
    }

    pub fn balanced() -> Self {
        Self {
            max_parallel: 5,
            timeout_secs: 60,
            retry_transient: true,
            enable_arbitration: true,
            confidence_floor: 0.8,
            cost_limit: Some(5.0),
            max_subtasks: 5,
            output_tokens: 500,
            preferred_providers: vec![
                "groq-llama3-70b".into(),
                "together-mixtral-8x7b".into(),
                "groq-mixtral-8x7b".into(),
                "together-llama2-70b".into(),
            ],
        }
    }

    pub fn best_quality() -> Self {
        Self {
            max_parallel: 8,
            timeout_secs: 120,
            retry_transient: true,
            enable_arbitration: true,
            confidence_floor: 0.9,
            cost_limit: None,
            max_subtasks: 8,
            output_tokens: 800,
            preferred_providers: vec![
                "openrouter-claude-3-sonnet".into(),
                "openrouter-gpt4-turbo".into(),
                "groq-llama3-70b".into(),
                "together-llama2-70b".into(),
            ],
        }
    }

    /// Position in the preferred list, `usize::MAX` when absent
    pub fn preference_rank(&self, provider: &str) -> usize {
        self.preferred_providers
            .iter()
            .position(|p| p == provider)
            .unwrap_or(usize::MAX)
    }
}

/// A `[modes.*]` section; absent fields keep that mode's defaults
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ModeProfilePatch {
    max_parallel: Option<usize>,
    timeout_secs: Option<u64>,
    retry_transient: Option<bool>,
    enable_arbitration: Option<bool>,
    confidence_floor: Option<f32>,
    cost_limit: Option<f64>,
    max_subtasks: Option<usize>,
    output_tokens: Option<u32>,
    preferred_providers: Option<Vec<ProviderId>>,
}

impl ModeProfilePatch {
    fn apply(self, mut base: ModeProfile) -> ModeProfile {
        if let Some(v) = self.max_parallel {
            base.max_parallel = v;
        }
        if let Some(v) = self.timeout_secs {
            base.timeout_secs = v;
        }
        if let Some(v) = self.retry_transient {
            base.retry_transient = v;
        }
        if let Some(v) = self.enable_arbitration {
            base.enable_arbitration = v;
        }
        if let Some(v) = self.confidence_floor {
            base.confidence_floor = v;
        }
        if let Some(v) = self.cost_limit {
            base.cost_limit = Some(v);
        }
        if let Some(v) = self.max_subtasks {
            base.max_subtasks = v;
        }
        if let Some(v) = self.output_tokens {
            base.output_tokens = v;
        }
        if let Some(v) = self.preferred_providers {
            base.preferred_providers = v;
        }
        base
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ModeTablePatch {
    fast: ModeProfilePatch,
    balanced: ModeProfilePatch,
    best_quality: ModeProfilePatch,
}

/// Profiles for all three modes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeTable {
    pub fast: ModeProfile,
    pub balanced: ModeProfile,
    pub best_quality: ModeProfile,
}

impl Default for ModeTable {
    fn default() -> Self {
        Self {
            fast: ModeProfile::fast(),
            balanced: ModeProfile::balanced(),
            best_quality: ModeProfile::best_quality(),
        }
    }
}

impl<'de> Deserialize<'de> for ModeTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let patch = ModeTablePatch::deserialize(deserializer)?;
        Ok(Self {
            fast: patch.fast.apply(ModeProfile::fast()),
            balanced: patch.balanced.apply(ModeProfile::balanced()),
            best_quality: patch.best_quality.apply(ModeProfile::best_quality()),
        })
    }
}

impl ModeTable {
    pub fn get(&self, mode: ExecutionMode) -> &ModeProfile {
        match mode {
            ExecutionMode::Fast => &self.fast,
            ExecutionMode::Balanced => &self.balanced,
            ExecutionMode::BestQuality => &self.best_quality,
        }
    }

    pub fn get_mut(&mut self, mode: ExecutionMode) -> &mut ModeProfile {
        match mode {
            ExecutionMode::Fast => &mut self.fast,
            ExecutionMode::Balanced => &mut self.balanced,
            ExecutionMode::BestQuality => &mut self.best_quality,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationSettings {
    /// Keyword similarity at which two same-type subtasks count as overlapping
    pub overlap_threshold: f32,
}

impl Default for ArbitrationSettings {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.6,
        }
    }
}

/// Base URL / credential override for one backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

/// Resolved endpoint for a backend
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Top-level council configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    pub deployment: DeploymentMode,
    pub breaker: BreakerSettings,
    /// Per-provider breaker thresholds
    pub breaker_overrides: HashMap<ProviderId, BreakerSettings>,
    /// Global cap on concurrent provider calls across all requests
    pub max_in_flight: usize,
    pub arbitration: ArbitrationSettings,
    pub modes: ModeTable,
    /// Extra providers, or replacements for built-in ones with the same name
    pub providers: Vec<ProviderProfile>,
    /// Keyed by backend name (`groq`, `together`, `openrouter`, `huggingface`, `ollama`)
    pub endpoints: HashMap<String, EndpointSettings>,
    /// Directory for JSON records; in-memory when unset
    pub store_dir: Option<PathBuf>,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            deployment: DeploymentMode::Cloud,
            breaker: BreakerSettings::default(),
            breaker_overrides: HashMap::new(),
            max_in_flight: 16,
            arbitration: ArbitrationSettings::default(),
            modes: ModeTable::default(),
            providers: Vec::new(),
            endpoints: HashMap::new(),
            store_dir: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

impl CouncilConfig {
    /// Parse a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (if given), apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AI_DEPLOYMENT_MODE`, `COUNCIL_*`, `OLLAMA_BASE_URL` and API key variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("AI_DEPLOYMENT_MODE") {
            self.deployment = value.parse().map_err(|_| ConfigError::Env {
                key: "AI_DEPLOYMENT_MODE".to_string(),
                value,
            })?;
        }
        if let Some(n) = env_parse("COUNCIL_MAX_IN_FLIGHT")? {
            self.max_in_flight = n;
        }
        if let Some(n) = env_parse("COUNCIL_BREAKER_THRESHOLD")? {
            self.breaker.failure_threshold = n;
        }
        if let Some(secs) = env_parse("COUNCIL_BREAKER_COOLDOWN_SECS")? {
            self.breaker.cooldown_secs = secs;
        }
        if let Ok(dir) = std::env::var("COUNCIL_STORE_DIR") {
            self.store_dir = Some(PathBuf::from(dir));
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            let base = format!("{}/v1", url.trim_end_matches('/').trim_end_matches("/v1"));
            self.endpoints
                .entry(Backend::Ollama.as_str().to_string())
                .or_default()
                .base_url = Some(base);
        }
        for backend in Backend::all() {
            let Some(var) = backend.api_key_env() else {
                continue;
            };
            if let Ok(key) = std::env::var(var) {
                if key.trim().is_empty() {
                    continue;
                }
                let entry = self
                    .endpoints
                    .entry(backend.as_str().to_string())
                    .or_default();
                if entry.api_key.is_none() {
                    entry.api_key = Some(key);
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let check_breaker = |name: &str, b: &BreakerSettings| -> Result<(), ConfigError> {
            if b.failure_threshold == 0 || b.success_threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}: breaker thresholds must be at least 1"
                )));
            }
            if b.cooldown_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}: cooldown_secs must be positive"
                )));
            }
            Ok(())
        };
        check_breaker("breaker", &self.breaker)?;
        for (provider, settings) in &self.breaker_overrides {
            check_breaker(provider, settings)?;
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max_in_flight must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.arbitration.overlap_threshold) {
            return Err(ConfigError::Invalid(
                "arbitration.overlap_threshold must be within [0, 1]".into(),
            ));
        }
        for mode in ExecutionMode::all() {
            let profile = self.modes.get(*mode);
            if profile.max_parallel == 0 || profile.max_subtasks == 0 {
                return Err(ConfigError::Invalid(format!(
                    "modes.{mode}: max_parallel and max_subtasks must be at least 1"
                )));
            }
            if profile.timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "modes.{mode}: timeout_secs must be positive"
                )));
            }
            if !(0.0..=1.0).contains(&profile.confidence_floor) {
                return Err(ConfigError::Invalid(format!(
                    "modes.{mode}: confidence_floor must be within [0, 1]"
                )));
            }
        }
        Ok(())
    }

    pub fn endpoint(&self, backend: Backend) -> Endpoint {
        let settings = self.endpoints.get(backend.as_str());
        Endpoint {
            base_url: settings
                .and_then(|s| s.base_url.clone())
                .unwrap_or_else(|| backend.default_base_url().to_string()),
            api_key: settings.and_then(|s| s.api_key.clone()),
        }
    }

    /// Whether calls to `backend` can be authenticated
    pub fn has_credentials(&self, backend: Backend) -> bool {
        backend.api_key_env().is_none() || self.endpoint(backend).api_key.is_some()
    }

    /// Built-in catalog merged with configured providers, filtered by deployment
    pub fn catalog(&self) -> ProviderCatalog {
        let mut catalog = ProviderCatalog::builtin();
        catalog.merge(self.providers.iter().cloned());
        catalog.for_deployment(self.deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CouncilConfig::default();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown(), Duration::from_secs(30));
        assert_eq!(config.modes.fast.max_parallel, 3);
        assert!(!config.modes.fast.enable_arbitration);
        assert_eq!(config.modes.best_quality.cost_limit, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CouncilConfig::from_toml_str(
            r#"
            deployment = "hybrid"
            max_in_flight = 4

            [breaker]
            failure_threshold = 3

            [breaker_overrides.groq-llama3-70b]
            failure_threshold = 2
            cooldown_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.deployment, DeploymentMode::Hybrid);
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cooldown_secs, 30);
        assert_eq!(config.breaker_overrides["groq-llama3-70b"].failure_threshold, 2);
        assert_eq!(config.breaker_overrides["groq-llama3-70b"].cooldown_secs, 10);
        assert_eq!(config.modes.balanced.max_parallel, 5);
    }

    #[test]
    fn test_partial_mode_section_keeps_mode_defaults() {
        let config = CouncilConfig::from_toml_str(
            r#"
            [modes.fast]
            max_parallel = 2

            [modes.best_quality]
            cost_limit = 20.0
            preferred_providers = ["groq-llama3-70b"]
            "#,
        )
        .unwrap();
        let fast = &config.modes.fast;
        assert_eq!(fast.max_parallel, 2);
        assert_eq!(fast.timeout_secs, ModeProfile::fast().timeout_secs);
        assert_eq!(fast.max_subtasks, 3);
        assert!(!fast.enable_arbitration);

        let best = &config.modes.best_quality;
        assert_eq!(best.cost_limit, Some(20.0));
        assert_eq!(best.preferred_providers, vec!["groq-llama3-70b".to_string()]);
        assert_eq!(best.max_parallel, 8);
        assert_eq!(best.timeout_secs, 120);

        assert_eq!(config.modes.balanced, ModeProfile::balanced());
    }

    #[test]
    fn test_unknown_mode_key_is_rejected() {
        let err = CouncilConfig::from_toml_str("[modes.fast]
max_paralel = 2
").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_custom_provider_in_toml() {
        let config = CouncilConfig::from_toml_str(
            r#"
            [[providers]]
            name = "groq-llama31-8b"
            backend = "groq"
            model = "llama-3.1-8b-instant"
            capabilities = ["reasoning", "research"]
            cost_per_input_token = 0.00000005
            cost_per_output_token = 0.00000008
            average_latency_secs = 0.2
            max_context = 131072
            reliability = 0.85
            "#,
        )
        .unwrap();
        let catalog = config.catalog();
        let added = catalog.get("groq-llama31-8b").unwrap();
        assert_eq!(added.backend, Backend::Groq);
        assert!(!added.local);
    }

    #[test]
    fn test_validation_rejects_zero_threshold() {
        let err = CouncilConfig::from_toml_str("[breaker]\nfailure_threshold = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_endpoint_resolution() {
        let mut config = CouncilConfig::default();
        assert_eq!(
            config.endpoint(Backend::Groq).base_url,
            "https://api.groq.com/openai/v1"
        );
        assert!(config.has_credentials(Backend::Ollama));

        config.endpoints.insert(
            "groq".into(),
            EndpointSettings {
                base_url: Some("http://proxy:8080/v1".into()),
                api_key: Some("secret".into()),
            },
        );
        let endpoint = config.endpoint(Backend::Groq);
        assert_eq!(endpoint.base_url, "http://proxy:8080/v1");
        assert!(config.has_credentials(Backend::Groq));
    }

    #[test]
    fn test_preference_rank() {
        let fast = ModeProfile::fast();
        assert_eq!(fast.preference_rank("groq-mixtral-8x7b"), 0);
        assert_eq!(fast.preference_rank("openrouter-gpt4-turbo"), usize::MAX);
    }
}

//! Active backend health checks
//!
//! Breaker state only moves when real calls run. [`HealthChecker`] asks each
//! backend directly (`GET {base_url}/models`), classifies the answer and
//! folds in the breaker state of every provider served by that backend.
//!
//! ```text
//! provider ──► backend ──► cached check (TTL) │ BackendChecker
//!          ──► breaker state: open → down, half_open → at least degraded
//!          ──► ProviderHealthReport
//! ```
//!
//! Backend results are cached per backend; the breaker blend is applied on
//! every read so a freshly tripped circuit shows up immediately.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitState, SharedHealthRegistry};
use crate::config::{CouncilConfig, Endpoint};
use crate::providers::ProviderError;
use crate::registry::{Backend, ProviderProfile};
use crate::state::types::ProviderId;

/// Per-request timeout for a backend check
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a backend check is reused
pub const CHECK_TTL: Duration = Duration::from_secs(60);

/// Reachability of a backend or provider, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Answering, but not with a plain success
    Degraded,
    Down,
}

impl HealthStatus {
    /// 200 is healthy, any other answer below 500 is degraded
    pub fn from_http_status(status: u16) -> Self {
        match status {
            200 => HealthStatus::Healthy,
            201..=499 => HealthStatus::Degraded,
            _ => HealthStatus::Down,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Down => write!(f, "down"),
        }
    }
}

/// Outcome of checking one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendCheck {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

impl BackendCheck {
    pub fn down(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Down,
            checked_at: Utc::now(),
            response_time_ms: None,
            error: Some(error.into()),
        }
    }

    fn from_http(status: u16, response_time: Duration) -> Self {
        let health = HealthStatus::from_http_status(status);
        Self {
            status: health,
            checked_at: Utc::now(),
            response_time_ms: Some(response_time.as_millis() as u64),
            error: (health != HealthStatus::Healthy).then(|| format!("HTTP {status}")),
        }
    }
}

/// Checks whether a backend answers
///
/// Implementations never fail: an unreachable backend is a [`HealthStatus::Down`] check.
#[async_trait]
pub trait BackendChecker: Send + Sync {
    async fn check(&self, backend: Backend, endpoint: &Endpoint) -> BackendCheck;
}

/// `GET {base_url}/models` over HTTP
pub struct HttpBackendChecker {
    http: reqwest::Client,
}

impl HttpBackendChecker {
    pub fn new() -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(CHECK_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self { http })
    }

    /// Use a preconfigured client; it should carry its own timeout
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn url(endpoint: &Endpoint) -> String {
        format!("{}/models", endpoint.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl BackendChecker for HttpBackendChecker {
    async fn check(&self, backend: Backend, endpoint: &Endpoint) -> BackendCheck {
        let started = Instant::now();
        let mut builder = self.http.get(Self::url(endpoint));
        if let Some(key) = &endpoint.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        match builder.send().await {
            Ok(response) => BackendCheck::from_http(response.status().as_u16(), started.elapsed()),
            Err(e) => {
                let mut check = if e.is_timeout() {
                    BackendCheck::down("request timed out")
                } else {
                    BackendCheck::down(e.to_string())
                };
                check.response_time_ms = Some(started.elapsed().as_millis() as u64);
                debug!(%backend, error = %e, "Backend check failed");
                check
            }
        }
    }
}

/// Health of one provider: its backend's check blended with its breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealthReport {
    pub provider: ProviderId,
    pub backend: Backend,
    pub status: HealthStatus,
    pub circuit_state: CircuitState,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

impl ProviderHealthReport {
    fn blend(provider: &ProviderProfile, check: &BackendCheck, circuit_state: CircuitState) -> Self {
        let mut status = check.status;
        let mut error = check.error.clone();
        match circuit_state {
            CircuitState::Open => {
                status = HealthStatus::Down;
                error.get_or_insert_with(|| "circuit breaker open".to_string());
            }
            CircuitState::HalfOpen => status = status.max(HealthStatus::Degraded),
            CircuitState::Closed => {}
        }
        Self {
            provider: provider.name.clone(),
            backend: provider.backend,
            status,
            circuit_state,
            checked_at: check.checked_at,
            response_time_ms: check.response_time_ms,
            error,
        }
    }
}

/// Checks backends on demand and caches the results
pub struct HealthChecker {
    backends: Arc<dyn BackendChecker>,
    health: SharedHealthRegistry,
    endpoints: HashMap<Backend, Endpoint>,
    ttl: Duration,
    cache: RwLock<HashMap<Backend, (Instant, BackendCheck)>>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl HealthChecker {
    pub fn new(
        backends: Arc<dyn BackendChecker>,
        health: SharedHealthRegistry,
        endpoints: HashMap<Backend, Endpoint>,
    ) -> Self {
        Self {
            backends,
            health,
            endpoints,
            ttl: CHECK_TTL,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Endpoints of every built-in backend, resolved from configuration
    pub fn from_config(
        config: &CouncilConfig,
        backends: Arc<dyn BackendChecker>,
        health: SharedHealthRegistry,
    ) -> Self {
        let endpoints = Backend::all()
            .iter()
            .map(|&backend| (backend, config.endpoint(backend)))
            .collect();
        Self::new(backends, health, endpoints)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Check every provider, probing each distinct backend at most once
    pub async fn check<'a>(
        &self,
        providers: impl IntoIterator<Item = &'a ProviderProfile>,
    ) -> Vec<ProviderHealthReport> {
        let providers: Vec<&ProviderProfile> = providers.into_iter().collect();
        let backends: BTreeSet<Backend> = providers.iter().map(|p| p.backend).collect();
        let checks: HashMap<Backend, BackendCheck> =
            join_all(backends.into_iter().map(|backend| async move {
                (backend, self.backend_check(backend).await)
            }))
            .await
            .into_iter()
            .collect();

        providers
            .into_iter()
            .filter_map(|profile| {
                let check = checks.get(&profile.backend)?;
                let state = self.health.state(&profile.name);
                Some(ProviderHealthReport::blend(profile, check, state))
            })
            .collect()
    }

    /// Cached check of one backend, probing when the entry is stale
    pub async fn backend_check(&self, backend: Backend) -> BackendCheck {
        if let Some((at, check)) = self.cache.read().await.get(&backend) {
            if at.elapsed() < self.ttl {
                debug!(%backend, status = %check.status, "Backend check cached");
                return check.clone();
            }
        }

        let check = match self.endpoints.get(&backend) {
            Some(endpoint) => self.backends.check(backend, endpoint).await,
            None => BackendCheck::down(format!("no endpoint configured for {backend}")),
        };
        if check.status == HealthStatus::Down {
            warn!(%backend, error = ?check.error, "Backend is down");
        } else {
            debug!(%backend, status = %check.status, "Backend checked");
        }
        self.cache
            .write()
            .await
            .insert(backend, (Instant::now(), check.clone()));
        check
    }

    /// Drop all cached checks
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerSettings;
    use crate::router::ProviderHealthRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers every backend with a fixed status and counts calls
    struct Fixed {
        statuses: HashMap<Backend, u16>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(statuses: &[(Backend, u16)]) -> Arc<Self> {
            Arc::new(Self {
                statuses: statuses.iter().copied().collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BackendChecker for Fixed {
        async fn check(&self, backend: Backend, _endpoint: &Endpoint) -> BackendCheck {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.statuses.get(&backend) {
                Some(&status) => BackendCheck::from_http(status, Duration::from_millis(12)),
                None => BackendCheck::down("connection refused"),
            }
        }
    }

    fn registry() -> SharedHealthRegistry {
        ProviderHealthRegistry::new(BreakerSettings {
            failure_threshold: 2,
            ..BreakerSettings::default()
        })
        .shared()
    }

    fn checker(fixed: Arc<Fixed>, health: SharedHealthRegistry) -> HealthChecker {
        HealthChecker::from_config(&CouncilConfig::default(), fixed, health)
    }

    fn profiles() -> Vec<ProviderProfile> {
        vec![
            ProviderProfile::new("groq-a", Backend::Groq, "a"),
            ProviderProfile::new("groq-b", Backend::Groq, "b"),
            ProviderProfile::new("together-c", Backend::Together, "c"),
        ]
    }

    #[test]
    fn test_status_from_http_code() {
        assert_eq!(HealthStatus::from_http_status(200), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_http_status(401), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_http_status(429), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_http_status(500), HealthStatus::Down);
        assert_eq!(HealthStatus::from_http_status(503), HealthStatus::Down);
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_reports_every_provider_from_one_check_per_backend() {
        let fixed = Fixed::new(&[(Backend::Groq, 200), (Backend::Together, 401)]);
        let checker = checker(fixed.clone(), registry());
        let profiles = profiles();

        let reports = checker.check(&profiles).await;
        assert_eq!(fixed.calls(), 2);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].provider, "groq-a");
        assert_eq!(reports[0].status, HealthStatus::Healthy);
        assert_eq!(reports[0].error, None);
        assert_eq!(reports[2].status, HealthStatus::Degraded);
        assert_eq!(reports[2].error.as_deref(), Some("HTTP 401"));
    }

    #[tokio::test]
    async fn test_breaker_state_overrides_backend_status() {
        let fixed = Fixed::new(&[(Backend::Groq, 200)]);
        let health = registry();
        health.record_outcome("groq-a", false);
        health.record_outcome("groq-a", false);
        let checker = checker(fixed, health.clone());
        let profiles = profiles();

        let reports = checker.check(&profiles[..2]).await;
        assert_eq!(reports[0].circuit_state, CircuitState::Open);
        assert_eq!(reports[0].status, HealthStatus::Down);
        assert_eq!(reports[0].error.as_deref(), Some("circuit breaker open"));
        assert_eq!(reports[1].circuit_state, CircuitState::Closed);
        assert_eq!(reports[1].status, HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_provider_is_degraded() {
        let fixed = Fixed::new(&[(Backend::Groq, 200)]);
        let health = registry();
        health.record_outcome("groq-a", false);
        health.record_outcome("groq-a", false);
        tokio::time::advance(Duration::from_secs(31)).await;
        let checker = checker(fixed, health);
        let profiles = profiles();

        let reports = checker.check(&profiles[..1]).await;
        assert_eq!(reports[0].circuit_state, CircuitState::HalfOpen);
        assert_eq!(reports[0].status, HealthStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_checks_cached_until_ttl() {
        let fixed = Fixed::new(&[(Backend::Groq, 200), (Backend::Together, 200)]);
        let health = registry();
        let checker = checker(fixed.clone(), health.clone());
        let profiles = profiles();

        checker.check(&profiles).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        checker.check(&profiles).await;
        assert_eq!(fixed.calls(), 2);

        // Breaker changes apply to cached checks
        health.record_outcome("together-c", false);
        health.record_outcome("together-c", false);
        let reports = checker.check(&profiles).await;
        assert_eq!(reports[2].status, HealthStatus::Down);
        assert_eq!(fixed.calls(), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        checker.check(&profiles).await;
        assert_eq!(fixed.calls(), 4);

        checker.invalidate().await;
        checker.check(&profiles[..1]).await;
        assert_eq!(fixed.calls(), 5);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_down() {
        let fixed = Fixed::new(&[]);
        let checker = checker(fixed, registry());
        let check = checker.backend_check(Backend::Ollama).await;
        assert_eq!(check.status, HealthStatus::Down);
        assert_eq!(check.error.as_deref(), Some("connection refused"));
    }

    /// Serve one HTTP response with `status`, returning the request head
    async fn serve_once(status: u16) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status} Status\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}"
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });
        (format!("http://{addr}/v1"), handle)
    }

    fn local_checker() -> HttpBackendChecker {
        HttpBackendChecker::with_client(
            reqwest::Client::builder()
                .no_proxy()
                .timeout(CHECK_TIMEOUT)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_http_check_queries_models_endpoint() {
        let (base_url, server) = serve_once(200).await;
        let endpoint = Endpoint {
            base_url: format!("{base_url}/"),
            api_key: Some("secret".into()),
        };
        let check = local_checker().check(Backend::Groq, &endpoint).await;
        assert_eq!(check.status, HealthStatus::Healthy);
        assert!(check.response_time_ms.is_some());

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /v1/models HTTP/1.1"), "{head}");
        assert!(head.to_ascii_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn test_http_check_classifies_error_responses() {
        let (base_url, server) = serve_once(503).await;
        let endpoint = Endpoint {
            base_url,
            api_key: None,
        };
        let check = local_checker().check(Backend::Ollama, &endpoint).await;
        assert_eq!(check.status, HealthStatus::Down);
        assert_eq!(check.error.as_deref(), Some("HTTP 503"));
        let head = server.await.unwrap();
        assert!(!head.to_ascii_lowercase().contains("authorization"));
    }
}

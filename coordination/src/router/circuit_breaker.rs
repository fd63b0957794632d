//! Provider health registry: one circuit breaker per provider.
//!
//! A breaker counts consecutive failures. When they reach the provider's
//! threshold the circuit *opens* and the provider is skipped at routing
//! time. After the cooldown the circuit turns *half-open* and admits a
//! single probe; a successful probe closes it, a failed probe reopens it
//! with the cooldown doubled (capped at `max_cooldown`).
//!
//! The registry is shared by every request. Each provider's state sits
//! behind its own mutex so outcomes for one provider are serialized while
//! different providers update independently.
//!
//! The [`FallbackLadder`] walks an ordered candidate list and claims the
//! first provider whose breaker admits work.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{BreakerSettings, CouncilConfig};
use crate::state::types::ProviderId;

/// Circuit breaker state for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy, requests allowed.
    Closed,
    /// Tripped, requests blocked until cooldown expires.
    Open,
    /// Cooldown expired, one probe request allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Call statistics for a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub success_count: u64,
    pub error_count: u64,
    /// Running mean over successful calls
    pub avg_latency_ms: u64,
}

impl UsageStats {
    /// Success rate (0.0 - 1.0); 1.0 before any call
    pub fn success_rate(&self) -> f32 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f32 / total as f32
        }
    }

    fn record_success(&mut self, latency_ms: u64) {
        self.avg_latency_ms =
            (self.avg_latency_ms * self.success_count + latency_ms) / (self.success_count + 1);
        self.success_count += 1;
    }

    fn record_failure(&mut self) {
        self.error_count += 1;
    }
}

/// Read-only monitoring view of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealthSnapshot {
    pub provider: ProviderId,
    pub health: CircuitState,
    pub consecutive_failures: u32,
    /// Milliseconds until an open circuit admits a probe
    pub cooldown_remaining_ms: Option<u64>,
    pub probe_in_flight: bool,
    pub usage: UsageStats,
}

#[derive(Debug)]
struct BreakerEntry {
    settings: BreakerSettings,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    probe_in_flight: bool,
    success_count_in_half_open: u32,
    usage: UsageStats,
}

impl BreakerEntry {
    fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown: settings.cooldown(),
            probe_in_flight: false,
            success_count_in_half_open: 0,
            usage: UsageStats::default(),
        }
    }

    /// Apply the time-based Open -> HalfOpen transition
    fn refresh(&mut self, now: Instant) -> Option<(CircuitState, CircuitState)> {
        if self.state != CircuitState::Open {
            return None;
        }
        let opened_at = self.opened_at?;
        if now.saturating_duration_since(opened_at) >= self.cooldown {
            self.state = CircuitState::HalfOpen;
            self.probe_in_flight = false;
            self.success_count_in_half_open = 0;
            return Some((CircuitState::Open, CircuitState::HalfOpen));
        }
        None
    }

    fn admits_work(&self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !self.probe_in_flight,
            CircuitState::Open => false,
        }
    }

    fn try_acquire(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen if !self.probe_in_flight => {
                self.probe_in_flight = true;
                true
            }
            _ => false,
        }
    }

    fn open(&mut self, now: Instant, cooldown: Duration) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.cooldown = cooldown;
        self.probe_in_flight = false;
        self.success_count_in_half_open = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.cooldown = self.settings.cooldown();
        self.probe_in_flight = false;
        self.success_count_in_half_open = 0;
    }

    fn record(
        &mut self,
        success: bool,
        latency: Option<Duration>,
        now: Instant,
    ) -> Option<(CircuitState, CircuitState)> {
        let before = self.state;
        if success {
            self.usage
                .record_success(latency.map(|d| d.as_millis() as u64).unwrap_or(0));
        } else {
            self.usage.record_failure();
        }

        match (self.state, success) {
            (CircuitState::Closed, true) => self.consecutive_failures = 0,
            (CircuitState::Closed, false) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.settings.failure_threshold {
                    self.open(now, self.settings.cooldown());
                }
            }
            (CircuitState::HalfOpen, true) => {
                self.success_count_in_half_open += 1;
                if self.success_count_in_half_open >= self.settings.success_threshold {
                    self.close();
                } else {
                    self.probe_in_flight = false;
                }
            }
            (CircuitState::HalfOpen, false) => {
                self.consecutive_failures += 1;
                let next = self
                    .cooldown
                    .saturating_mul(2)
                    .min(self.settings.max_cooldown());
                self.open(now, next);
            }
            // Calls dispatched before the circuit opened still report; the
            // cooldown is not restarted by them.
            (CircuitState::Open, true) => {}
            (CircuitState::Open, false) => self.consecutive_failures += 1,
        }

        (before != self.state).then_some((before, self.state))
    }

    fn snapshot(&self, provider: &str, now: Instant) -> ProviderHealthSnapshot {
        let cooldown_remaining_ms = match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.cooldown
                    .saturating_sub(now.saturating_duration_since(opened_at))
                    .as_millis() as u64,
            ),
            _ => None,
        };
        ProviderHealthSnapshot {
            provider: provider.to_string(),
            health: self.state,
            consecutive_failures: self.consecutive_failures,
            cooldown_remaining_ms,
            probe_in_flight: self.probe_in_flight,
            usage: self.usage,
        }
    }
}

/// Shared reference to the health registry
pub type SharedHealthRegistry = Arc<ProviderHealthRegistry>;

/// Cross-request provider health, the single source of truth for
/// availability decisions.
#[derive(Debug)]
pub struct ProviderHealthRegistry {
    defaults: BreakerSettings,
    overrides: HashMap<ProviderId, BreakerSettings>,
    entries: RwLock<HashMap<ProviderId, Arc<Mutex<BreakerEntry>>>>,
}

fn lock(entry: &Mutex<BreakerEntry>) -> MutexGuard<'_, BreakerEntry> {
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn log_transition(provider: &str, transition: Option<(CircuitState, CircuitState)>, failures: u32) {
    match transition {
        Some((from, CircuitState::Open)) => {
            warn!(provider, %from, consecutive_failures = failures, "Circuit opened")
        }
        Some((from, to)) => info!(provider, %from, %to, "Circuit state changed"),
        None => {}
    }
}

impl ProviderHealthRegistry {
    /// Registry where every provider uses `defaults`
    pub fn new(defaults: BreakerSettings) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registry honouring the configured defaults and per-provider overrides
    pub fn from_config(config: &CouncilConfig) -> Self {
        let mut registry = Self::new(config.breaker);
        registry.overrides = config.breaker_overrides.clone();
        registry
    }

    /// Override thresholds for one provider
    pub fn with_override(
        mut self,
        provider: impl Into<ProviderId>,
        settings: BreakerSettings,
    ) -> Self {
        self.overrides.insert(provider.into(), settings);
        self
    }

    pub fn shared(self) -> SharedHealthRegistry {
        Arc::new(self)
    }

    pub fn settings_for(&self, provider: &str) -> BreakerSettings {
        self.overrides.get(provider).copied().unwrap_or(self.defaults)
    }

    fn entry(&self, provider: &str) -> Arc<Mutex<BreakerEntry>> {
        {
            let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
            if let Some(entry) = entries.get(provider) {
                return Arc::clone(entry);
            }
        }
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let settings = self.settings_for(provider);
        Arc::clone(
            entries
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(BreakerEntry::new(settings)))),
        )
    }

    /// Run `f` on the provider's entry after applying time-based transitions
    fn with_entry<R>(&self, provider: &str, f: impl FnOnce(&mut BreakerEntry, Instant) -> R) -> R {
        let entry = self.entry(provider);
        let mut guard = lock(&entry);
        let now = Instant::now();
        let transition = guard.refresh(now);
        log_transition(provider, transition, guard.consecutive_failures);
        f(&mut *guard, now)
    }

    /// Current circuit state
    pub fn state(&self, provider: &str) -> CircuitState {
        self.with_entry(provider, |e, _| e.state)
    }

    /// True when closed, or half-open with the probe slot free
    pub fn is_available(&self, provider: &str) -> bool {
        self.with_entry(provider, |e, _| e.admits_work())
    }

    /// Claim permission to call `provider`.
    ///
    /// In half-open state this takes the single probe slot; the slot is
    /// returned by [`record_outcome`](Self::record_outcome) or
    /// [`release_probe`](Self::release_probe).
    pub fn try_acquire(&self, provider: &str) -> bool {
        self.with_entry(provider, |e, _| e.try_acquire())
    }

    /// Give back a probe slot claimed by [`try_acquire`](Self::try_acquire)
    /// when no call was made.
    pub fn release_probe(&self, provider: &str) {
        self.with_entry(provider, |e, _| {
            if e.state == CircuitState::HalfOpen {
                e.probe_in_flight = false;
            }
        })
    }

    /// Record the final outcome of one call
    pub fn record_outcome(&self, provider: &str, success: bool) {
        self.record_call(provider, success, None);
    }

    /// Record the final outcome of one call with its latency
    pub fn record_call(&self, provider: &str, success: bool, latency: Option<Duration>) {
        self.with_entry(provider, |e, now| {
            let transition = e.record(success, latency, now);
            log_transition(provider, transition, e.consecutive_failures);
        })
    }

    /// Force a provider's circuit closed
    pub fn reset(&self, provider: &str) {
        self.with_entry(provider, |e, _| {
            let was = e.state;
            e.close();
            if was != CircuitState::Closed {
                info!(provider, from = %was, "Circuit reset");
            }
        })
    }

    /// Consecutive failures recorded for `provider`
    pub fn failure_count(&self, provider: &str) -> u32 {
        self.with_entry(provider, |e, _| e.consecutive_failures)
    }

    pub fn provider_snapshot(&self, provider: &str) -> ProviderHealthSnapshot {
        self.with_entry(provider, |e, now| e.snapshot(provider, now))
    }

    /// Snapshot of every provider in `providers`, in the given order
    pub fn snapshot_of<'a>(
        &self,
        providers: impl IntoIterator<Item = &'a str>,
    ) -> Vec<ProviderHealthSnapshot> {
        providers
            .into_iter()
            .map(|p| self.provider_snapshot(p))
            .collect()
    }

    /// Snapshot of every provider seen so far, sorted by name
    pub fn snapshot(&self) -> Vec<ProviderHealthSnapshot> {
        let mut names: Vec<ProviderId> = self
            .entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        self.snapshot_of(names.iter().map(String::as_str))
    }
}

impl Default for ProviderHealthRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

/// Ordered fallback ladder of providers.
#[derive(Debug, Clone, Default)]
pub struct FallbackLadder {
    providers: Vec<ProviderId>,
}

impl FallbackLadder {
    /// Create a ladder from an ordered list of providers.
    pub fn new(providers: Vec<ProviderId>) -> Self {
        Self { providers }
    }

    /// First provider whose circuit admits work, without claiming it.
    pub fn next_available(&self, health: &ProviderHealthRegistry) -> Option<&str> {
        self.providers
            .iter()
            .map(String::as_str)
            .find(|p| health.is_available(p))
    }

    /// Claim the first provider whose circuit admits work.
    pub fn acquire_next(&self, health: &ProviderHealthRegistry) -> Option<&str> {
        self.providers
            .iter()
            .map(String::as_str)
            .find(|p| health.try_acquire(p))
    }

    /// The ordered list of providers.
    pub fn providers(&self) -> &[ProviderId] {
        &self.providers
    }
}

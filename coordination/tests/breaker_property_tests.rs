//! Circuit breaker property tests over varied thresholds and cooldowns.
//!
//! Tests verify:
//! - `failure_threshold` consecutive failures make a provider unavailable
//!   until the cooldown elapses
//! - Exactly one half-open probe is admitted; its success closes the circuit
//! - Successes interleaved below the threshold never open the circuit
//! - Providers trip independently under concurrent updates

use std::sync::Arc;
use std::time::Duration;

use council_coordination::config::BreakerSettings;
use council_coordination::{CircuitState, ProviderHealthRegistry};

fn registry(failure_threshold: u32, cooldown_secs: u64) -> ProviderHealthRegistry {
    ProviderHealthRegistry::new(BreakerSettings {
        failure_threshold,
        cooldown_secs,
        ..BreakerSettings::default()
    })
}

/// Small deterministic generator for outcome sequences
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

// ── Property: threshold failures open until cooldown ───────────────

#[tokio::test(start_paused = true)]
async fn prop_threshold_opens_until_cooldown_then_single_probe() {
    for threshold in 1..=6 {
        for cooldown in [1, 5, 30] {
            let health = registry(threshold, cooldown);
            let provider = format!("p-{threshold}-{cooldown}");

            for _ in 1..threshold {
                health.record_outcome(&provider, false);
            }
            assert!(
                health.is_available(&provider),
                "threshold={threshold}: open one failure early"
            );

            health.record_outcome(&provider, false);
            assert!(!health.is_available(&provider), "threshold={threshold}: not open");
            assert_eq!(health.state(&provider), CircuitState::Open);

            tokio::time::advance(Duration::from_secs(cooldown) - Duration::from_millis(1)).await;
            assert!(
                !health.is_available(&provider),
                "cooldown={cooldown}: admitted before cooldown elapsed"
            );

            tokio::time::advance(Duration::from_millis(1)).await;
            assert!(health.is_available(&provider));
            assert_eq!(health.state(&provider), CircuitState::HalfOpen);

            assert!(health.try_acquire(&provider), "first probe admitted");
            assert!(!health.try_acquire(&provider), "second probe admitted");
            assert!(!health.is_available(&provider));

            health.record_outcome(&provider, true);
            assert_eq!(health.state(&provider), CircuitState::Closed);
            assert_eq!(health.failure_count(&provider), 0);
        }
    }
}

// ── Property: failed probe reopens with a longer cooldown ──────────

#[tokio::test(start_paused = true)]
async fn prop_failed_probe_backs_off() {
    for cooldown in [1, 2, 10] {
        let health = registry(1, cooldown);
        let provider = format!("backoff-{cooldown}");
        health.record_outcome(&provider, false);

        tokio::time::advance(Duration::from_secs(cooldown)).await;
        assert!(health.try_acquire(&provider));
        health.record_outcome(&provider, false);
        assert_eq!(health.state(&provider), CircuitState::Open);

        // The original cooldown is no longer enough
        tokio::time::advance(Duration::from_secs(cooldown)).await;
        assert_eq!(health.state(&provider), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(cooldown)).await;
        assert_eq!(health.state(&provider), CircuitState::HalfOpen);
    }
}

// ── Property: interleaved successes reset the tally ────────────────

#[test]
fn prop_state_matches_consecutive_failure_model() {
    let mut rng = Lcg(7);
    for threshold in 2..=5 {
        for run in 0..50 {
            let health = registry(threshold, 30);
            let provider = format!("model-{threshold}-{run}");
            let mut streak = 0;

            for step in 0..40 {
                let success = rng.next() % 3 == 0;
                health.record_outcome(&provider, success);
                streak = if success { 0 } else { streak + 1 };

                if streak >= threshold {
                    assert_eq!(
                        health.state(&provider),
                        CircuitState::Open,
                        "threshold={threshold} run={run} step={step}"
                    );
                    break;
                }
                assert_eq!(health.state(&provider), CircuitState::Closed);
                assert_eq!(health.failure_count(&provider), streak);
            }
        }
    }
}

// ── Property: providers are independent under concurrency ──────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prop_concurrent_updates_are_serialized_per_provider() {
    let health = Arc::new(registry(1000, 30));
    let mut handles = Vec::new();
    for worker in 0..8 {
        let health = health.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..100 {
                health.record_outcome("shared", false);
                health.record_outcome(&format!("own-{worker}"), i % 2 == 0);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(health.failure_count("shared"), 800);
    assert_eq!(health.provider_snapshot("shared").usage.error_count, 800);
    for worker in 0..8 {
        let snapshot = health.provider_snapshot(&format!("own-{worker}"));
        assert_eq!(snapshot.health, CircuitState::Closed);
        assert_eq!(snapshot.usage.success_count, 50);
        assert_eq!(snapshot.usage.error_count, 50);
    }
}

//! Per-provider circuit breaker.
//!
//! Tracks consecutive transient failures per provider and temporarily takes a
//! provider out of the cascade when it keeps failing:
//!
//! - **Closed**: Normal operation, calls go through.
//! - **Open**: Provider is failing or rate limited, calls are skipped.
//! - **HalfOpen**: Cool-down elapsed, probing whether the provider recovered.
//!
//! A rate-limit response opens the circuit until the provider's own reset time
//! instead of the generic recovery timeout. State is in-memory only.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;

/// Consecutive failures before the circuit opens.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Time an opened circuit waits before probing again.
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Successful probes needed to close a HalfOpen circuit.
const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 2;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    /// When an Open circuit may move to HalfOpen.
    reopens_at: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            reopens_at: None,
        }
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.half_open_successes = 0;
        self.reopens_at = None;
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            half_open_success_threshold: HALF_OPEN_SUCCESS_THRESHOLD,
        }
    }
}

/// Thread-safe per-provider circuit breaker.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Lock the circuits mutex, recovering from poison if necessary.
    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Whether a call to `provider` may go through right now.
    ///
    /// Moves an Open circuit to HalfOpen once its reopen time has passed.
    pub fn is_allowed(&self, provider: &str) -> bool {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match circuit.reopens_at {
                Some(at) if Instant::now() >= at => {
                    info!(
                        "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                        provider
                    );
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_open_successes = 0;
                    true
                }
                _ => false,
            },
        }
    }

    pub fn record_success(&self, provider: &str) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed => circuit.failure_count = 0,
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                if circuit.half_open_successes >= self.config.half_open_success_threshold {
                    info!(
                        "Circuit breaker: closing circuit for '{}' after {} successes",
                        provider, circuit.half_open_successes
                    );
                    circuit.close();
                }
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: late success for '{}' while Open, ignoring",
                    provider
                );
            }
        }
    }

    /// Record a transient failure. Opens the circuit at the threshold, or immediately
    /// when probing from HalfOpen.
    pub fn record_failure(&self, provider: &str) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        circuit.failure_count += 1;

        let should_open = match circuit.state {
            CircuitState::Closed => circuit.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if should_open {
            info!(
                "Circuit breaker: opening circuit for '{}' after {} failures",
                provider, circuit.failure_count
            );
            circuit.state = CircuitState::Open;
            circuit.half_open_successes = 0;
            circuit.reopens_at = Some(Instant::now() + self.config.recovery_timeout);
        } else {
            debug!(
                "Circuit breaker: failure for '{}' ({}/{})",
                provider, circuit.failure_count, self.config.failure_threshold
            );
        }
    }

    /// Open the circuit for `provider` for `cooldown`, regardless of its failure count.
    ///
    /// Used when a provider reports its own rate-limit window.
    pub fn open_for(&self, provider: &str, cooldown: Duration) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        info!(
            "Circuit breaker: holding '{}' open for {:?}",
            provider, cooldown
        );
        circuit.state = CircuitState::Open;
        circuit.half_open_successes = 0;
        circuit.reopens_at = Some(Instant::now() + cooldown);
    }

    pub fn state(&self, provider: &str) -> CircuitState {
        self.lock_circuits()
            .get(provider)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn failure_count(&self, provider: &str) -> u32 {
        self.lock_circuits()
            .get(provider)
            .map(|c| c.failure_count)
            .unwrap_or(0)
    }

    pub fn reset(&self, provider: &str) {
        if let Some(circuit) = self.lock_circuits().get_mut(provider) {
            circuit.close();
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(10),
            half_open_success_threshold: 2,
        }
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::with_config(fast_config());

        breaker.record_failure("FINNHUB");
        breaker.record_failure("FINNHUB");
        assert!(breaker.is_allowed("FINNHUB"));

        breaker.record_failure("FINNHUB");
        assert_eq!(breaker.state("FINNHUB"), CircuitState::Open);
        assert!(!breaker.is_allowed("FINNHUB"));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::with_config(fast_config());

        breaker.record_failure("POLYGON");
        breaker.record_failure("POLYGON");
        breaker.record_success("POLYGON");
        assert_eq!(breaker.failure_count("POLYGON"), 0);

        breaker.record_failure("POLYGON");
        assert_eq!(breaker.state("POLYGON"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_recovery_then_closes() {
        let breaker = CircuitBreaker::with_config(fast_config());
        for _ in 0..3 {
            breaker.record_failure("COINGECKO");
        }
        assert!(!breaker.is_allowed("COINGECKO"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.is_allowed("COINGECKO"));
        assert_eq!(breaker.state("COINGECKO"), CircuitState::HalfOpen);

        breaker.record_success("COINGECKO");
        breaker.record_success("COINGECKO");
        assert_eq!(breaker.state("COINGECKO"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::with_config(fast_config());
        for _ in 0..3 {
            breaker.record_failure("FINNHUB");
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.is_allowed("FINNHUB"));

        breaker.record_failure("FINNHUB");
        assert_eq!(breaker.state("FINNHUB"), CircuitState::Open);
        assert!(!breaker.is_allowed("FINNHUB"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_for_uses_given_cooldown() {
        let breaker = CircuitBreaker::with_config(fast_config());
        breaker.open_for("FINNHUB", Duration::from_secs(60));
        assert!(!breaker.is_allowed("FINNHUB"));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!breaker.is_allowed("FINNHUB"));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(breaker.is_allowed("FINNHUB"));
    }

    #[tokio::test]
    async fn test_providers_are_isolated() {
        let breaker = CircuitBreaker::with_config(fast_config());
        for _ in 0..3 {
            breaker.record_failure("FINNHUB");
        }
        assert!(!breaker.is_allowed("FINNHUB"));
        assert!(breaker.is_allowed("POLYGON"));

        breaker.reset("FINNHUB");
        assert!(breaker.is_allowed("FINNHUB"));
    }
}

//! Resilience primitives for the SSH transport.
//!
//! Two independent state machines composed by wrapping: the circuit
//! breaker gates each session open, and the retry policy paces repeated
//! attempts of the breaker-wrapped unit of work.
//!
//! ## Circuit breaker states
//!
//! ```text
//! ┌─────────┐  consecutive failures ≥ threshold  ┌────────┐
//! │ CLOSED  │ ─────────────────────────────────> │  OPEN  │
//! └─────────┘                                    └────────┘
//!      ^                                              │
//!      │                                              │ open timeout
//!      │      successes            ┌─────────────┐    v
//!      └────────────────────────── │  HALF-OPEN  │ <──┘
//!                                  └─────────────┘
//!                                        │ failure, or probe budget spent
//!                                        └──────────────> OPEN
//! ```

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected immediately, without socket activity.
    Open,
    /// A bounded number of probes test whether the peer recovered.
    HalfOpen,
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures at which the circuit opens
    /// (6 realizes the "more than 5 consecutive failures" trip rule).
    pub trip_threshold: u32,
    /// How long to stay open before admitting probes.
    pub open_timeout: Duration,
    /// Probe budget while half-open.
    pub half_open_max_probes: u32,
    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,
    /// Closed-state failure counts reset after this much quiet time.
    pub sampling_interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            trip_threshold: 6,
            open_timeout: Duration::from_secs(30),
            half_open_max_probes: 5,
            success_threshold: 2,
            sampling_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_probes: u32,
    opened_at: Option<Instant>,
    window_started: Instant,
}

/// Thread-safe circuit breaker.
///
/// Callers ask `try_acquire` before the unit of work and report the
/// outcome with `record_success`/`record_failure`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_probes: 0,
                opened_at: None,
                window_started: Instant::now(),
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Ask to run one unit of work.
    ///
    /// `false` means fail fast: the circuit is open (or the half-open
    /// probe budget is spent) and the socket must not be touched.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        match inner.state {
            CircuitState::Closed => {
                if inner.window_started.elapsed() >= self.config.sampling_interval {
                    inner.consecutive_failures = 0;
                    inner.window_started = Instant::now();
                }
                true
            }
            CircuitState::Open => {
                let elapsed_open = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.open_timeout)
                    .unwrap_or(true);
                if elapsed_open {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_probes = 1;
                    info!(breaker = %self.name, "Circuit breaker HALF-OPEN (testing recovery)");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probes < self.config.half_open_max_probes {
                    inner.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful unit of work.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    inner.window_started = Instant::now();
                    info!(breaker = %self.name, "Circuit breaker CLOSED (recovered)");
                }
            }
            CircuitState::Open => {
                // Stale success from before the trip; ignore.
            }
        }
    }

    /// Record a failed unit of work.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.trip_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker OPENED"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(breaker = %self.name, "Circuit breaker re-OPENED (probe failed)");
            }
            CircuitState::Open => {}
        }
    }
}

/// Exponential backoff with jitter for retrying a unit of work.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Jitter fraction: 0.5 means the delay lands in ±50% of nominal.
    pub jitter: f64,
    /// Attempt budget; the job deadline bounds the envelope further.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(5),
            multiplier: 1.5,
            jitter: 0.5,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1` (attempt is 0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let nominal = self.initial.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = nominal.min(self.max.as_millis() as f64);

        let factor = 1.0 + self.jitter * (2.0 * pseudo_unit() - 1.0);
        Duration::from_millis((capped * factor).max(0.0) as u64)
    }

    /// Upper bound of the delay for a given attempt, jitter included.
    pub fn max_delay_for_attempt(&self, attempt: u32) -> Duration {
        let nominal = self.initial.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = nominal.min(self.max.as_millis() as f64);
        Duration::from_millis((capped * (1.0 + self.jitter)) as u64)
    }
}

/// Clock-derived pseudo-random value in [0, 1).
fn pseudo_unit() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::SystemTime;

    let mut hasher = DefaultHasher::new();
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    (hasher.finish() % 10_000) as f64 / 10_000.0
}

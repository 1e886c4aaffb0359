//! Circuit breaker for the quote source and the shared cache backend.
//!
//! While a dependency keeps failing, callers skip it instead of paying its
//! timeout on every request: a dead quote API turns candidates straight into
//! fallback entries, a dead Redis turns reads into misses.
//!
//! ```text
//! CLOSED ── failure_threshold consecutive failures ──▶ OPEN
//!   ▲                                                   │ reset_timeout
//!   └──── success_threshold successes ── HALF_OPEN ◀────┘
//!                                          │ any failure
//!                                          └──────────▶ OPEN
//! ```

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Current state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are skipped
    Open,
    /// Trial calls allowed
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// How long to stay open before allowing trial calls
    pub reset_timeout: Duration,
    /// Successes in half-open needed to close again
    pub success_threshold: u32,
    /// Name for logging purposes
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            name: "default".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    total_rejections: u64,
}

/// Thread-safe circuit breaker. Every transition happens under one mutex,
/// so concurrent callers observe a consistent state.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                total_rejections: 0,
            }),
        }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self::new(CircuitBreakerConfig::with_name(name))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> CircuitState {
        self.with_state(|s| s.state)
    }

    /// Whether a call may go through. Counts a rejection when it may not.
    pub fn can_execute(&self) -> bool {
        self.with_state(|s| {
            if s.state == CircuitState::Open {
                s.total_rejections += 1;
                false
            } else {
                true
            }
        })
    }

    pub fn record_success(&self) {
        let closed = self.with_state(|s| match s.state {
            CircuitState::Closed => {
                s.failure_count = 0;
                false
            }
            CircuitState::HalfOpen => {
                s.success_count += 1;
                if s.success_count >= self.config.success_threshold {
                    Self::close(s);
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => false,
        });

        if closed {
            tracing::info!(circuit = %self.config.name, "Circuit breaker CLOSED");
        }
    }

    pub fn record_failure(&self) {
        let opened = self.with_state(|s| match s.state {
            CircuitState::Closed => {
                s.failure_count += 1;
                if s.failure_count >= self.config.failure_threshold {
                    Self::open(s);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                Self::open(s);
                true
            }
            CircuitState::Open => false,
        });

        if opened {
            tracing::warn!(
                circuit = %self.config.name,
                reset_timeout_secs = self.config.reset_timeout.as_secs(),
                "Circuit breaker OPENED"
            );
        } else {
            tracing::trace!(circuit = %self.config.name, "Circuit breaker recorded failure");
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        self.with_state(|s| CircuitBreakerStats {
            name: self.config.name.clone(),
            state: s.state,
            failure_count: s.failure_count,
            success_count: s.success_count,
            total_rejections: s.total_rejections,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
        })
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        self.with_state(Self::close);
        tracing::info!(circuit = %self.config.name, "Circuit breaker manually reset");
    }

    // ========================================================================
    // Private Methods
    // ========================================================================

    /// Run `f` on the state after applying the open → half-open timeout.
    fn with_state<R>(&self, f: impl FnOnce(&mut BreakerState) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if guard.state == CircuitState::Open
            && guard
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.reset_timeout)
        {
            guard.state = CircuitState::HalfOpen;
            guard.success_count = 0;
            tracing::info!(circuit = %self.config.name, "Circuit breaker transitioning to HALF_OPEN");
        }

        f(&mut guard)
    }

    fn open(s: &mut BreakerState) {
        s.state = CircuitState::Open;
        s.success_count = 0;
        s.opened_at = Some(Instant::now());
    }

    fn close(s: &mut BreakerState) {
        s.state = CircuitState::Closed;
        s.failure_count = 0;
        s.success_count = 0;
        s.opened_at = None;
    }
}

/// Snapshot of a breaker's counters
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Calls skipped while open
    pub total_rejections: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_starts_closed() {
        let breaker = CircuitBreaker::with_name("test");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_circuit_opens_after_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::with_name("test").failure_threshold(3));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
        assert_eq!(breaker.stats().total_rejections, 1);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::with_name("test").failure_threshold(3));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.stats().failure_count, 2);

        breaker.record_success();
        assert_eq!(breaker.stats().failure_count, 0);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::with_name("test")
                .failure_threshold(1)
                .reset_timeout(Duration::ZERO)
                .success_threshold(2),
        );

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.can_execute());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::with_name("test")
                .failure_threshold(1)
                .reset_timeout(Duration::from_millis(20)),
        );

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_manual_reset() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::with_name("test").failure_threshold(2));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_config_builder_floors_thresholds() {
        let config = CircuitBreakerConfig::with_name("quotes")
            .failure_threshold(0)
            .success_threshold(0)
            .reset_timeout(Duration::from_secs(60));

        assert_eq!(config.name, "quotes");
        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.success_threshold, 1);
        assert_eq!(config.reset_timeout, Duration::from_secs(60));
    }
}

//! Per-provider circuit breaker: a sliding-window failure counter gating
//! transitions between CLOSED, OPEN, and HALF_OPEN.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: Vec<Instant>,
    opened_at: Option<Instant>,
}

/// Single-provider breaker. `failure_threshold`/`window`/`recovery` default
/// to 3 / 60s / 120s, matching the reference implementation's defaults.
pub struct CircuitBreaker {
    failure_threshold: u32,
    window: Duration,
    recovery: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, window: Duration, recovery: Duration) -> Self {
        Self {
            failure_threshold,
            window,
            recovery,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: Vec::new(),
                opened_at: None,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(3, Duration::from_secs(60), Duration::from_secs(120))
    }

    /// Current state, lazily advancing OPEN -> HALF_OPEN once the recovery
    /// window has elapsed. Call this before deciding whether to admit a call.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.recovery {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
        inner.state
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.failures.clear();
            }
            BreakerState::Closed => {
                let window = self.window;
                inner.failures.retain(|t| now.duration_since(*t) <= window);
                inner.failures.push(now);
                if inner.failures.len() as u32 >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.failures.clear();
                }
            }
            BreakerState::Open => {
                // Already open; nothing changes.
            }
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
    }
}

/// Registry of one breaker per provider name, created lazily on first use.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, provider: &str) -> std::sync::Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::with_defaults()))
            .clone()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60), Duration::from_secs(120));
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn recovers_to_half_open_then_closed() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_millis(10));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn reset_is_idempotent() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_secs(120));
        breaker.record_failure();
        breaker.reset();
        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}

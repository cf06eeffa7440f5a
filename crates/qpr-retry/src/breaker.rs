// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-agent, per-capability circuit breaker (spec §4.4.1).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Sliding window size (default N=20).
    pub window_size: usize,
    /// Failure rate threshold to trip the breaker (default F=0.5).
    pub failure_rate_threshold: f64,
    /// Minimum absolute failure count to trip the breaker (default M=5).
    pub min_failures: u32,
    /// Initial cooldown once OPEN (default 30s).
    pub base_cooldown: Duration,
    /// Ceiling the doubling cooldown never exceeds (default 10 minutes).
    pub cooldown_ceiling: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            failure_rate_threshold: 0.5,
            min_failures: 5,
            base_cooldown: Duration::from_secs(30),
            cooldown_ceiling: Duration::from_secs(600),
        }
    }
}

/// The breaker's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; invocations pass through.
    Closed,
    /// Rejecting immediately without invoking the capability.
    Open,
    /// Allowing exactly one probe through.
    HalfOpen,
}

struct BreakerState {
    circuit: CircuitState,
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    current_cooldown: Duration,
    /// Set once a probe has been handed out in `HalfOpen`, so concurrent
    /// callers don't all receive a probe slot.
    probe_in_flight: bool,
}

/// A single circuit breaker instance, shared across concurrent callers for
/// one `(agent, capability)` pair.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

/// Decision returned by [`CircuitBreaker::allow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowDecision {
    /// Proceed with the invocation normally.
    Proceed,
    /// Proceed as the single half-open probe.
    Probe,
    /// Reject immediately; do not invoke the capability.
    Reject,
}

impl CircuitBreaker {
    /// Construct a breaker starting in the CLOSED state.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                window: VecDeque::with_capacity(config.window_size),
                opened_at: None,
                current_cooldown: config.base_cooldown,
                probe_in_flight: false,
            }),
            config,
        }
    }

    /// Current state, performing the OPEN → HALF_OPEN transition if the
    /// cooldown has elapsed.
    pub async fn state(&self) -> CircuitState {
        let mut guard = self.state.lock().await;
        self.maybe_transition_to_half_open(&mut guard);
        guard.circuit
    }

    fn maybe_transition_to_half_open(&self, guard: &mut BreakerState) {
        if guard.circuit == CircuitState::Open {
            if let Some(opened_at) = guard.opened_at {
                if opened_at.elapsed() >= guard.current_cooldown {
                    guard.circuit = CircuitState::HalfOpen;
                    guard.probe_in_flight = false;
                }
            }
        }
    }

    /// Decide whether to let an invocation through.
    pub async fn allow(&self) -> AllowDecision {
        let mut guard = self.state.lock().await;
        self.maybe_transition_to_half_open(&mut guard);
        match guard.circuit {
            CircuitState::Closed => AllowDecision::Proceed,
            CircuitState::Open => AllowDecision::Reject,
            CircuitState::HalfOpen => {
                if guard.probe_in_flight {
                    AllowDecision::Reject
                } else {
                    guard.probe_in_flight = true;
                    AllowDecision::Probe
                }
            }
        }
    }

    /// Record a successful invocation outcome.
    pub async fn record_success(&self) {
        let mut guard = self.state.lock().await;
        match guard.circuit {
            CircuitState::HalfOpen => {
                guard.circuit = CircuitState::Closed;
                guard.current_cooldown = self.config.base_cooldown;
                guard.opened_at = None;
                guard.window.clear();
            }
            CircuitState::Closed => {
                push_window(&mut guard.window, self.config.window_size, true);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a transient failure outcome and evaluate trip conditions.
    pub async fn record_failure(&self) {
        let mut guard = self.state.lock().await;
        match guard.circuit {
            CircuitState::HalfOpen => {
                guard.current_cooldown = (guard.current_cooldown * 2).min(self.config.cooldown_ceiling);
                guard.circuit = CircuitState::Open;
                guard.opened_at = Some(Instant::now());
                guard.probe_in_flight = false;
            }
            CircuitState::Closed => {
                push_window(&mut guard.window, self.config.window_size, false);
                let failures = guard.window.iter().filter(|ok| !**ok).count() as u32;
                let rate = failures as f64 / guard.window.len().max(1) as f64;
                if failures >= self.config.min_failures && rate >= self.config.failure_rate_threshold {
                    guard.circuit = CircuitState::Open;
                    guard.opened_at = Some(Instant::now());
                    guard.current_cooldown = self.config.base_cooldown;
                }
            }
            CircuitState::Open => {}
        }
    }
}

fn push_window(window: &mut VecDeque<bool>, cap: usize, outcome: bool) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(outcome);
}

/// Registry of circuit breakers keyed by `"<agent_name>::<capability>"`,
/// created lazily on first use.
#[derive(Clone)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Arc<Mutex<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl BreakerRegistry {
    /// Construct a registry that creates new breakers with `config`.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn key(agent_name: &str, capability: &str) -> String {
        format!("{agent_name}::{capability}")
    }

    /// Fetch or lazily create the breaker for `(agent_name, capability)`.
    pub async fn get_or_create(&self, agent_name: &str, capability: &str) -> Arc<CircuitBreaker> {
        let key = Self::key(agent_name, capability);
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(key)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

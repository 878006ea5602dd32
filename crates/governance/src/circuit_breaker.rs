//! Circuit breaker for the balance oracle
//!
//! A dead RPC node would otherwise make every reaction wait for a request
//! timeout. After `failure_threshold` consecutive failures the circuit opens
//! and calls fail immediately until `reset_timeout` has passed.
//!
//! ## States
//! - **Closed**: calls pass through
//! - **Open**: calls fail fast
//! - **HalfOpen**: probe calls pass through to test recovery
//!
//! ## Transitions
//! - Closed → Open: after `failure_threshold` consecutive failures
//! - Open → HalfOpen: after `reset_timeout`
//! - HalfOpen → Closed: after `success_threshold` consecutive successes
//! - HalfOpen → Open: on any failure

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time spent Open before probing
    pub reset_timeout: Duration,
    /// Consecutive HalfOpen successes needed to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct CircuitData {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    data: Mutex<CircuitData>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            data: Mutex::new(CircuitData {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
            config,
        }
    }

    /// `Ok(())` if a call may proceed, otherwise the time left before a probe
    pub fn check(&self) -> Result<(), Duration> {
        let mut circuit = self.data.lock();
        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.config.reset_timeout);
                if elapsed >= self.config.reset_timeout {
                    info!(circuit = %self.name, "Circuit transitioning from Open to HalfOpen");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.success_count = 0;
                    Ok(())
                } else {
                    Err(self.config.reset_timeout.saturating_sub(elapsed))
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut circuit = self.data.lock();
        match circuit.state {
            CircuitState::Closed => circuit.failure_count = 0,
            CircuitState::HalfOpen => {
                circuit.success_count += 1;
                if circuit.success_count >= self.config.success_threshold {
                    info!(circuit = %self.name, "Circuit transitioning from HalfOpen to Closed");
                    circuit.state = CircuitState::Closed;
                    circuit.failure_count = 0;
                    circuit.success_count = 0;
                    circuit.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut circuit = self.data.lock();
        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count += 1;
                if circuit.failure_count >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = circuit.failure_count,
                        "Circuit transitioning from Closed to Open"
                    );
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                } else {
                    debug!(
                        circuit = %self.name,
                        failures = circuit.failure_count,
                        threshold = self.config.failure_threshold,
                        "Closed circuit: failure recorded"
                    );
                }
            }
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "Circuit reopened after failed probe");
                circuit.state = CircuitState::Open;
                circuit.success_count = 0;
                circuit.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.data.lock().state
    }
}

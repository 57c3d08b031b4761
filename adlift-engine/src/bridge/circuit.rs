//! Circuit breaker for bridge bootstrap health
//!
//! Tracks consecutive bootstrap failures. After the threshold the circuit
//! opens and callers fail fast for a cooldown; the first caller after the
//! cooldown gets a single half-open probe that either closes or re-opens
//! the circuit.

use crate::error::{Error, Result};
use adlift_common::events::CircuitHealth;
use std::time::Duration;
use tokio::time::Instant;

/// Internal circuit state
#[derive(Debug, Clone, Copy)]
pub enum CircuitState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen,
}

/// Consecutive-failure circuit breaker with cooldown and half-open probe
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed {
                consecutive_failures: 0,
            },
            failure_threshold,
            cooldown,
        }
    }

    /// Whether a call may proceed right now
    ///
    /// `Err(CircuitOpen)` while the cooldown is pending. Once the cooldown
    /// elapses the circuit moves to half-open and admits exactly one probe.
    pub fn check(&mut self) -> Result<()> {
        match self.state {
            CircuitState::Closed { .. } | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.cooldown {
                    self.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen)
                }
            }
        }
    }

    /// Record a successful call; closes the circuit
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed call
    ///
    /// Reaching the threshold (or failing the half-open probe) opens the
    /// circuit and restarts the cooldown.
    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    self.state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    self.state = CircuitState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            CircuitState::HalfOpen | CircuitState::Open { .. } => {
                self.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
            }
        }
    }

    pub fn health(&self) -> CircuitHealth {
        match self.state {
            CircuitState::Closed { .. } => CircuitHealth::Closed,
            CircuitState::Open { .. } => CircuitHealth::Open,
            CircuitState::HalfOpen => CircuitHealth::HalfOpen,
        }
    }
}

//! Error types for the adlift engine
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Errors never escape the orchestrator's public surface;
//! losing one slot must never break unrelated page functionality.

use adlift_common::{FailureKind, SlotId, SlotState};
use thiserror::Error;

/// Main error type for the adlift engine
#[derive(Error, Debug)]
pub enum Error {
    /// Bridge bootstrap resource failed to load or verify
    #[error("Bridge bootstrap failed: {0}")]
    Bootstrap(String),

    /// Gateway circuit is open; call failed fast without touching the bridge
    #[error("Bridge circuit open; failing fast")]
    CircuitOpen,

    /// Push succeeded but no rendered result appeared in time
    #[error("No rendered result for slot {0} within verification window")]
    FulfillmentTimeout(SlotId),

    /// Bridge rejected or failed a fulfillment push
    #[error("Bridge request failed: {0}")]
    Bridge(String),

    /// Slot missing required attributes and not auto-repairable
    #[error("Slot validation failed: {0}")]
    Validation(String),

    /// Invariant violation: a second fulfillment request for an in-flight
    /// slot. Must never reach the bridge; logged as a bug signal.
    #[error("Duplicate fulfillment attempt for slot {0}")]
    DuplicateAttempt(SlotId),

    /// Illegal slot state machine move
    #[error("Invalid slot transition: {from} -> {to}")]
    InvalidTransition { from: SlotState, to: SlotState },

    /// Slot id not tracked by the registry
    #[error("Slot not found: {0}")]
    SlotNotFound(SlotId),

    /// Hosting region left the document; terminal, not retried
    #[error("Slot region no longer in document: {0}")]
    Stale(SlotId),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Map a failed fulfillment attempt onto its retry classification
    ///
    /// Returns None for errors that are not attempt failures (invariant
    /// violations, state machine errors); those never enter retry.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::FulfillmentTimeout(_) => Some(FailureKind::Timeout),
            Error::Bridge(_) | Error::Bootstrap(_) | Error::CircuitOpen => {
                Some(FailureKind::Network)
            }
            Error::Validation(_) => Some(FailureKind::Validation),
            _ => None,
        }
    }
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

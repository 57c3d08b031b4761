//! Event system for the adlift engine
//!
//! The engine uses hybrid communication:
//! - **EventBus** (tokio::broadcast): one-to-many event broadcasting to hosts
//!   and observers
//! - **Command channels** (tokio::mpsc): slot intake into the dispatcher
//! - **Shared state** (Arc<RwLock<T>>): read-heavy registry access
//!
//! Every externally observable state change is mirrored onto the bus. State
//! transitions use `emit` (never silently lost without a log); progress-style
//! events use `emit_lossy`.

use crate::types::{FailureKind, RegionHandle, SlotId, SlotState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Bridge session lifecycle, as exposed to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeSessionState {
    Unloaded,
    Loading,
    Ready,
    Unavailable,
}

/// Circuit breaker health, as exposed to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitHealth {
    Closed,
    Open,
    HalfOpen,
}

/// Adlift event types
///
/// Events are broadcast via EventBus and can be serialized for transmission
/// to the host page. All events use this central enum for type safety and
/// exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AdliftEvent {
    /// A new placeholder region entered the registry
    SlotDiscovered {
        slot_id: SlotId,
        region: RegionHandle,
        /// Priority score assigned at discovery
        score: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A slot moved through its lifecycle state machine
    SlotStateChanged {
        slot_id: SlotId,
        old_state: SlotState,
        new_state: SlotState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A slot received its content
    SlotFulfilled {
        slot_id: SlotId,
        /// Total fulfillment attempts, zero when fulfilled externally
        attempts: u32,
        /// True when reconciliation found content the engine never requested
        external: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A fulfillment attempt failed
    SlotFailed {
        slot_id: SlotId,
        failure: FailureKind,
        attempts: u32,
        /// True when the retry budget is exhausted and the slot is done
        terminal: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A retry was scheduled for a failed slot
    RetryScheduled {
        slot_id: SlotId,
        /// Attempt number the retry will be (1-based)
        attempt: u32,
        delay_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The bridge session changed state
    BridgeSessionChanged {
        old_state: BridgeSessionState,
        new_state: BridgeSessionState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The gateway circuit breaker changed state
    CircuitStateChanged {
        old_state: CircuitHealth,
        new_state: CircuitHealth,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The dispatcher released a wave of fulfillment attempts
    WaveDispatched {
        wave_size: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A reconciliation sweep completed
    ReconcileCompleted {
        /// Slots examined in the sweep
        examined: usize,
        /// Stuck slots forced into the dispatcher
        forced: usize,
        /// Slots reconciled to fulfilled from externally rendered content
        external: usize,
        /// Slots abandoned because their region left the document
        abandoned: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus for engine events
///
/// Thin wrapper over `tokio::sync::broadcast` so emitters do not deal with
/// subscriber bookkeeping. Subscribers receive only events emitted after
/// subscription.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AdliftEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AdliftEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` when at least one subscriber exists,
    /// `Err` when nobody is listening.
    pub fn emit(
        &self,
        event: AdliftEvent,
    ) -> Result<usize, broadcast::error::SendError<AdliftEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case
    pub fn emit_lossy(&self, event: AdliftEvent) {
        let _ = self.tx.send(event);
    }

    /// Channel capacity this bus was created with
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

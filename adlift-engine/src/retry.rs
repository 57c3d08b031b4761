//! Retry policy
//!
//! Decides whether and when a failed slot retries. Eligibility depends on
//! attempt count against a severity-weighted budget (low-severity,
//! likely-permanent failures are not retried indefinitely); timing is
//! bounded exponential backoff with jitter. Pending retries are tracked as
//! generation-checked tickets so a terminated slot's tickets die unfired.

use crate::error::Result;
use crate::registry::SlotRegistry;
use adlift_common::config::RetryConfig;
use adlift_common::{AdliftEvent, EventBus, FailureKind, SlotId, SlotState};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Failure severity for retry weighting
///
/// Higher severity means more likely transient, so more retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn of(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Timeout => Severity::Critical,
            FailureKind::Network => Severity::High,
            FailureKind::Script => Severity::Medium,
            FailureKind::Validation => Severity::Low,
        }
    }

    /// Fraction of the attempt budget this severity is worth
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.8,
            Severity::Medium => 0.5,
            Severity::Low => 0.25,
        }
    }
}

/// A pending deferred retry
///
/// Destroyed on firing or slot termination. The generation check is what
/// makes a stale ticket inert: cancellation removes the entry, and a fired
/// task whose generation no longer matches simply drops.
#[derive(Debug, Clone, Copy)]
struct RetryTicket {
    attempt: u32,
    generation: u64,
}

/// Retry eligibility and backoff timing
pub struct RetryPolicy {
    config: RetryConfig,
    registry: Arc<SlotRegistry>,
    intake: mpsc::UnboundedSender<SlotId>,
    events: EventBus,
    tickets: Mutex<HashMap<SlotId, RetryTicket>>,
    generation: AtomicU64,
}

impl RetryPolicy {
    pub fn new(
        config: RetryConfig,
        registry: Arc<SlotRegistry>,
        intake: mpsc::UnboundedSender<SlotId>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            registry,
            intake,
            events,
            tickets: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Total attempts allowed for a slot of this priority failing this way
    pub fn attempt_budget(&self, score: u8, kind: FailureKind) -> u32 {
        let base = if score >= self.config.high_priority_cutoff {
            self.config.max_attempts + self.config.high_priority_bonus
        } else {
            self.config.max_attempts
        };
        ((base as f64) * Severity::of(kind).weight()).ceil().max(1.0) as u32
    }

    /// Whether a slot that has already made `attempts` attempts may retry
    pub fn should_retry(&self, attempts: u32, score: u8, kind: FailureKind) -> bool {
        attempts < self.attempt_budget(score, kind)
    }

    /// Backoff delay before retry number `attempt`
    ///
    /// `base * growth^attempt * jitter`, clamped to the ceiling. With the
    /// default growth/jitter bounds this is monotone non-decreasing in
    /// `attempt` up to the ceiling, jitter included.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exp = self.config.base_delay_ms as f64 * self.config.growth.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(self.config.jitter_low..=self.config.jitter_high);
        let ms = (exp * jitter).min(self.config.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Schedule a deferred retry for a failed slot
    ///
    /// Replaces any pending ticket for the slot. Returns the chosen delay.
    pub async fn schedule(self: &Arc<Self>, slot_id: SlotId, attempt: u32) -> Duration {
        let delay = self.next_delay(attempt);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.tickets.lock().await.insert(
            slot_id,
            RetryTicket {
                attempt,
                generation,
            },
        );

        debug!(slot_id = %slot_id, attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
        self.events.emit_lossy(AdliftEvent::RetryScheduled {
            slot_id,
            attempt,
            delay_ms: delay.as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });

        let policy = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            policy.fire(slot_id, generation).await;
        });

        delay
    }

    /// Fire a ticket if it is still current
    async fn fire(&self, slot_id: SlotId, generation: u64) {
        {
            let mut tickets = self.tickets.lock().await;
            match tickets.get(&slot_id) {
                Some(ticket) if ticket.generation == generation => {
                    tickets.remove(&slot_id);
                }
                _ => return,
            }
        }

        if let Err(e) = self.requeue(slot_id).await {
            debug!(slot_id = %slot_id, "retry ticket dropped: {}", e);
        }
    }

    async fn requeue(&self, slot_id: SlotId) -> Result<()> {
        self.registry
            .transition(slot_id, SlotState::Queued, None)
            .await?;
        if self.intake.send(slot_id).is_err() {
            warn!(slot_id = %slot_id, "dispatcher intake closed; retry lost");
        }
        Ok(())
    }

    /// Drop a slot's pending ticket, if any
    pub async fn cancel(&self, slot_id: SlotId) {
        self.tickets.lock().await.remove(&slot_id);
    }

    /// Drop every pending ticket (reset path)
    pub async fn cancel_all(&self) {
        self.tickets.lock().await.clear();
    }

    /// Whether a deferred retry is pending for this slot
    pub async fn has_ticket(&self, slot_id: SlotId) -> bool {
        self.tickets.lock().await.contains_key(&slot_id)
    }

    /// Pending attempt number for a slot's ticket, if any
    pub async fn pending_attempt(&self, slot_id: SlotId) -> Option<u32> {
        self.tickets.lock().await.get(&slot_id).map(|t| t.attempt)
    }
}

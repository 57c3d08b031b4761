//! Slot Registry
//!
//! Authoritative map of discovered slots to fulfillment state. Slots are
//! owned exclusively by the registry and mutated only through state
//! transitions; a slot is never deleted while its region exists, only marked
//! terminal. The registry is also the sole mint for `FulfillmentClaim`
//! tokens, which is how the at-most-one-in-flight-per-slot invariant is
//! enforced structurally rather than by convention.

use crate::document::DocumentSurface;
use crate::error::{Error, Result};
use crate::scorer::PriorityScorer;
use adlift_common::{
    AdliftEvent, EventBus, FailureKind, Geometry, RegionHandle, SlotId, SlotState,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Bounded per-slot failure history length
const FAILURE_HISTORY_LIMIT: usize = 8;

/// One recorded attempt failure
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub at: DateTime<Utc>,
}

/// A tracked placeholder slot
#[derive(Debug, Clone)]
pub struct Slot {
    pub id: SlotId,
    pub region: RegionHandle,
    pub geometry: Geometry,
    pub score: u8,
    pub state: SlotState,
    pub attempts: u32,
    pub last_attempt: Option<Instant>,
    pub failures: VecDeque<FailureRecord>,
    pub discovered_at: DateTime<Utc>,
    /// Updated on every transition; staleness is measured against this
    pub last_activity: Instant,
}

/// Witness that a slot legally entered `Fulfilling`
///
/// Only the registry can mint one (via `begin_fulfillment`), and the bridge
/// gateway consumes it by value on push. A second concurrent claim for the
/// same slot fails at the state machine, so two in-flight requests for one
/// slot cannot exist.
#[derive(Debug)]
pub struct FulfillmentClaim {
    slot_id: SlotId,
    region: RegionHandle,
}

impl FulfillmentClaim {
    pub fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    pub fn region(&self) -> &RegionHandle {
        &self.region
    }
}

/// Read-only per-slot view for the monitor, dispatcher, and status surface
#[derive(Debug, Clone, Serialize)]
pub struct SlotSnapshot {
    pub id: SlotId,
    pub region: RegionHandle,
    pub state: SlotState,
    pub score: u8,
    pub attempts: u32,
    /// Milliseconds since the slot last changed state
    pub idle_ms: u64,
    pub discovered_at: DateTime<Utc>,
    pub failures: Vec<FailureKind>,
}

/// Point-in-time view of the whole registry
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub slots: Vec<SlotSnapshot>,
    pub taken_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    pub fn count_in(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }

    pub fn in_flight(&self) -> usize {
        self.count_in(SlotState::Fulfilling)
    }
}

struct Inner {
    slots: HashMap<SlotId, Slot>,
    by_region: HashMap<RegionHandle, SlotId>,
    /// Terminally failed ids blocked from rediscovery until the cooldown
    /// elapses, preventing discover/fail thrash on broken placements
    terminal_cooldown: HashMap<SlotId, Instant>,
}

/// Authoritative slot store
pub struct SlotRegistry {
    inner: RwLock<Inner>,
    session_salt: Uuid,
    cooldown: Duration,
    events: EventBus,
}

impl SlotRegistry {
    pub fn new(cooldown: Duration, events: EventBus) -> Self {
        Self {
            inner: RwLock::new(Inner {
                slots: HashMap::new(),
                by_region: HashMap::new(),
                terminal_cooldown: HashMap::new(),
            }),
            session_salt: Uuid::new_v4(),
            cooldown,
            events,
        }
    }

    /// Scan the document for unfulfilled placeholder regions
    ///
    /// Idempotent: already-tracked regions are skipped, never duplicated.
    /// Regions without an explicit identity attribute are auto-repaired with
    /// a generated, session-salted id. Regions already holding content are
    /// not tracked (host auto-placement got there first).
    ///
    /// Returns the ids of newly inserted slots, in document order.
    pub async fn discover(
        &self,
        surface: &dyn DocumentSurface,
        scorer: &PriorityScorer,
        engagement: Option<f64>,
    ) -> Vec<SlotId> {
        let viewport = surface.viewport();
        let descriptors = surface.scan();
        let now = Instant::now();

        let mut inner = self.inner.write().await;
        let mut new_ids = Vec::new();

        for descriptor in descriptors {
            if inner.by_region.contains_key(&descriptor.region) {
                continue;
            }

            if surface.region_rendered(&descriptor.region) {
                debug!(region = %descriptor.region, "skipping pre-rendered region at discovery");
                continue;
            }

            let id = match &descriptor.explicit_id {
                Some(identity) => SlotId::from_identity(identity),
                None => SlotId::generate(&self.session_salt),
            };

            // A terminally failed id may only come back after its cooldown
            if let Some(existing) = inner.slots.get(&id) {
                if !existing.state.is_terminal() {
                    continue;
                }
                let old_region = existing.region.clone();
                match inner.terminal_cooldown.get(&id) {
                    Some(since) if since.elapsed() < self.cooldown => {
                        debug!(slot_id = %id, "rediscovery blocked by terminal cooldown");
                        continue;
                    }
                    _ => {
                        inner.terminal_cooldown.remove(&id);
                        inner.by_region.remove(&old_region);
                    }
                }
            }

            let score = scorer.score(&descriptor.geometry, &viewport, engagement);
            let slot = Slot {
                id,
                region: descriptor.region.clone(),
                geometry: descriptor.geometry,
                score,
                state: SlotState::Discovered,
                attempts: 0,
                last_attempt: None,
                failures: VecDeque::new(),
                discovered_at: Utc::now(),
                last_activity: now,
            };

            inner.by_region.insert(descriptor.region.clone(), id);
            inner.slots.insert(id, slot);
            new_ids.push(id);

            info!(slot_id = %id, region = %descriptor.region, score, "slot discovered");
            self.emit(AdliftEvent::SlotDiscovered {
                slot_id: id,
                region: descriptor.region,
                score,
                timestamp: Utc::now(),
            });
        }

        new_ids
    }

    /// Move a slot through its state machine
    ///
    /// Fails with `InvalidTransition` on illegal moves. A same-state
    /// transition is a no-op (re-enqueue deduplication relies on this).
    /// `failure` is recorded for `Failed`/`FailedTerminal` transitions.
    pub async fn transition(
        &self,
        id: SlotId,
        to: SlotState,
        failure: Option<FailureKind>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.slots.get_mut(&id).ok_or(Error::SlotNotFound(id))?;

        if slot.state == to {
            return Ok(());
        }
        if !slot.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: slot.state,
                to,
            });
        }

        apply_transition(slot, to, failure, &self.events);

        if to == SlotState::FailedTerminal {
            inner.terminal_cooldown.insert(id, Instant::now());
        }
        Ok(())
    }

    /// Claim a queued slot for fulfillment
    ///
    /// The sole path into `Fulfilling`. A claim for an already in-flight
    /// slot is a `DuplicateAttempt` (an engine bug), logged as such and
    /// guaranteed never to reach the bridge.
    pub async fn begin_fulfillment(&self, id: SlotId) -> Result<FulfillmentClaim> {
        let mut inner = self.inner.write().await;
        let slot = inner.slots.get_mut(&id).ok_or(Error::SlotNotFound(id))?;

        match slot.state {
            SlotState::Fulfilling => {
                error!(slot_id = %id, "duplicate fulfillment attempt blocked before bridge");
                Err(Error::DuplicateAttempt(id))
            }
            SlotState::Queued => {
                apply_transition(slot, SlotState::Fulfilling, None, &self.events);
                Ok(FulfillmentClaim {
                    slot_id: id,
                    region: slot.region.clone(),
                })
            }
            from => Err(Error::InvalidTransition {
                from,
                to: SlotState::Fulfilling,
            }),
        }
    }

    /// Read-only view of the whole registry
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read().await;
        let slots = inner
            .slots
            .values()
            .map(|slot| SlotSnapshot {
                id: slot.id,
                region: slot.region.clone(),
                state: slot.state,
                score: slot.score,
                attempts: slot.attempts,
                idle_ms: slot.last_activity.elapsed().as_millis() as u64,
                discovered_at: slot.discovered_at,
                failures: slot.failures.iter().map(|f| f.kind).collect(),
            })
            .collect();
        RegistrySnapshot {
            slots,
            taken_at: Utc::now(),
        }
    }

    pub async fn state_of(&self, id: SlotId) -> Option<SlotState> {
        self.inner.read().await.slots.get(&id).map(|s| s.state)
    }

    pub async fn region_of(&self, id: SlotId) -> Option<RegionHandle> {
        self.inner
            .read()
            .await
            .slots
            .get(&id)
            .map(|s| s.region.clone())
    }

    pub async fn geometry_of(&self, id: SlotId) -> Option<Geometry> {
        self.inner.read().await.slots.get(&id).map(|s| s.geometry)
    }

    pub async fn score_of(&self, id: SlotId) -> Option<u8> {
        self.inner.read().await.slots.get(&id).map(|s| s.score)
    }

    pub async fn attempts_of(&self, id: SlotId) -> Option<u32> {
        self.inner.read().await.slots.get(&id).map(|s| s.attempts)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.slots.is_empty()
    }

    /// Drop all tracked state (full-reload scenario)
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.slots.clear();
        inner.by_region.clear();
        inner.terminal_cooldown.clear();
    }

    fn emit(&self, event: AdliftEvent) {
        if self.events.emit(event).is_err() {
            debug!("registry event dropped (no subscribers)");
        }
    }
}

/// Apply a validated transition to a slot and emit the matching events
///
/// Caller has already checked legality and holds the write lock.
fn apply_transition(
    slot: &mut Slot,
    to: SlotState,
    failure: Option<FailureKind>,
    events: &EventBus,
) {
    let from = slot.state;
    let now = Utc::now();

    match to {
        SlotState::Fulfilling => {
            slot.attempts += 1;
            slot.last_attempt = Some(Instant::now());
        }
        SlotState::Failed | SlotState::FailedTerminal => {
            if let Some(kind) = failure {
                slot.failures.push_back(FailureRecord { kind, at: now });
                if slot.failures.len() > FAILURE_HISTORY_LIMIT {
                    slot.failures.pop_front();
                }
            }
        }
        _ => {}
    }

    slot.state = to;
    slot.last_activity = Instant::now();

    events.emit_lossy(AdliftEvent::SlotStateChanged {
        slot_id: slot.id,
        old_state: from,
        new_state: to,
        timestamp: now,
    });

    match to {
        SlotState::Fulfilled => {
            let external = from != SlotState::Fulfilling;
            if external {
                info!(slot_id = %slot.id, "slot reconciled to fulfilled (external content)");
            } else {
                info!(slot_id = %slot.id, attempts = slot.attempts, "slot fulfilled");
            }
            events.emit_lossy(AdliftEvent::SlotFulfilled {
                slot_id: slot.id,
                attempts: slot.attempts,
                external,
                timestamp: now,
            });
        }
        SlotState::Failed | SlotState::FailedTerminal => {
            let kind = failure
                .or_else(|| slot.failures.back().map(|f| f.kind))
                .unwrap_or(FailureKind::Script);
            events.emit_lossy(AdliftEvent::SlotFailed {
                slot_id: slot.id,
                failure: kind,
                attempts: slot.attempts,
                terminal: to == SlotState::FailedTerminal,
                timestamp: now,
            });
        }
        _ => {}
    }
}

//! Visibility scheduler
//!
//! Converts viewport visibility transitions into fulfillment triggers. The
//! host wires its intersection primitive up as a `VisibilitySource`; hosts
//! without one fall back to `AlwaysVisibleSource`, which reports every
//! watched region visible immediately (selected once at startup).
//!
//! The scheduler applies a last-call-wins throttle: dispatch decisions are
//! at least `min_decision_interval_ms` apart, and a burst of visibility
//! events inside that window collapses into the newest one. Slots dropped
//! by the throttle are not lost; the reconciliation monitor forces them
//! forward once they go stale.

use crate::dispatch::BatchDispatcher;
use crate::error::{Error, Result};
use crate::registry::SlotRegistry;
use adlift_common::config::VisibilityConfig;
use adlift_common::{RegionHandle, SlotId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One viewport intersection observation
#[derive(Debug, Clone)]
pub struct VisibilityEvent {
    pub region: RegionHandle,
    /// Fraction of the region currently intersecting the viewport
    pub ratio: f64,
}

/// Capability interface over the host's intersection primitive
pub trait VisibilitySource: Send + Sync {
    /// Install the channel observations are delivered on; called once by the
    /// scheduler at construction
    fn bind(&self, tx: mpsc::UnboundedSender<VisibilityEvent>);

    /// Begin observing a region
    fn watch(&self, region: &RegionHandle);

    /// Stop observing a region
    fn unwatch(&self, region: &RegionHandle);
}

/// Fallback source for hosts without an intersection primitive
///
/// Reports every watched region fully visible the moment it is watched, so
/// the engine degenerates to eager dispatch rather than never dispatching.
#[derive(Default)]
pub struct AlwaysVisibleSource {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<VisibilityEvent>>>,
}

impl AlwaysVisibleSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VisibilitySource for AlwaysVisibleSource {
    fn bind(&self, tx: mpsc::UnboundedSender<VisibilityEvent>) {
        *self.tx.lock().unwrap() = Some(tx);
    }

    fn watch(&self, region: &RegionHandle) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(VisibilityEvent {
                region: region.clone(),
                ratio: 1.0,
            });
        }
    }

    fn unwatch(&self, _region: &RegionHandle) {}
}

/// Visibility-gated fulfillment trigger
pub struct VisibilityScheduler {
    source: Arc<dyn VisibilitySource>,
    registry: Arc<SlotRegistry>,
    dispatcher: Arc<BatchDispatcher>,
    config: VisibilityConfig,
    watched: Mutex<HashMap<RegionHandle, SlotId>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<VisibilityEvent>>>,
}

impl VisibilityScheduler {
    pub fn new(
        source: Arc<dyn VisibilitySource>,
        registry: Arc<SlotRegistry>,
        dispatcher: Arc<BatchDispatcher>,
        config: VisibilityConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        source.bind(tx);
        Self {
            source,
            registry,
            dispatcher,
            config,
            watched: Mutex::new(HashMap::new()),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Begin observing a slot's region for visibility
    pub async fn watch(&self, slot_id: SlotId) -> Result<()> {
        let region = self
            .registry
            .region_of(slot_id)
            .await
            .ok_or(Error::SlotNotFound(slot_id))?;
        self.watched.lock().await.insert(region.clone(), slot_id);
        self.source.watch(&region);
        debug!(slot_id = %slot_id, region = %region, "watching for visibility");
        Ok(())
    }

    /// Stop observing everything (reset path)
    pub async fn unwatch_all(&self) {
        let mut watched = self.watched.lock().await;
        for region in watched.keys() {
            self.source.unwatch(region);
        }
        watched.clear();
    }

    /// Number of regions currently under observation
    pub async fn watched_count(&self) -> usize {
        self.watched.lock().await.len()
    }

    /// Start the decision loop
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = match scheduler.rx.lock().await.take() {
                Some(rx) => rx,
                None => return,
            };
            info!("visibility scheduler started");
            scheduler.run(&mut rx).await;
            info!("visibility scheduler stopped");
        })
    }

    async fn run(&self, rx: &mut mpsc::UnboundedReceiver<VisibilityEvent>) {
        let min_interval = Duration::from_millis(self.config.min_decision_interval_ms);
        let mut last_decision: Option<tokio::time::Instant> = None;
        let mut pending: Option<VisibilityEvent> = None;

        loop {
            let event = match pending.take() {
                // Throttled: hold until the interval elapses, replacing the
                // held event with anything newer (last-call-wins)
                Some(held) => {
                    let wake = last_decision
                        .map(|t| t + min_interval)
                        .unwrap_or_else(tokio::time::Instant::now);
                    let mut current = held;
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep_until(wake) => break,
                            next = rx.recv() => match next {
                                Some(next) => current = next,
                                None => return,
                            }
                        }
                    }
                    current
                }
                None => match rx.recv().await {
                    Some(event) => event,
                    None => return,
                },
            };

            if event.ratio < self.config.threshold {
                continue;
            }

            if let Some(t) = last_decision {
                if t.elapsed() < min_interval {
                    pending = Some(event);
                    continue;
                }
            }

            if self.decide(event).await {
                last_decision = Some(tokio::time::Instant::now());
            }
        }
    }

    /// Hand a visible slot to the dispatcher exactly once
    ///
    /// Removal from the watch map and `unwatch` happen synchronously with
    /// the handoff, so a re-entrant event for the same region cannot race
    /// the `Queued` transition.
    async fn decide(&self, event: VisibilityEvent) -> bool {
        let slot_id = match self.watched.lock().await.remove(&event.region) {
            Some(id) => id,
            None => return false,
        };
        self.source.unwatch(&event.region);

        debug!(slot_id = %slot_id, region = %event.region, ratio = event.ratio, "visibility threshold crossed");
        if let Err(e) = self.dispatcher.enqueue(slot_id).await {
            debug!(slot_id = %slot_id, "visible slot not enqueued: {}", e);
        }
        true
    }
}

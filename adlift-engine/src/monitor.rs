//! Reconciliation monitor
//!
//! Periodic sweep re-validating the registry against rendered reality. The
//! correctness guarantee is "every slot eventually resolves", not "only
//! visible slots resolve": slots stuck beyond the staleness threshold are
//! forced through the dispatcher regardless of visibility, regions that
//! vanished are abandoned, and content rendered without the engine's
//! involvement (host auto-placement) is reconciled to fulfilled so it is
//! never spuriously refulfilled.

use crate::dispatch::BatchDispatcher;
use crate::document::DocumentSurface;
use crate::registry::SlotRegistry;
use crate::retry::RetryPolicy;
use adlift_common::config::MonitorConfig;
use adlift_common::{AdliftEvent, EventBus, SlotState};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation sweep
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    /// Slots examined
    pub examined: usize,
    /// Stuck slots forced into the dispatcher
    pub forced: usize,
    /// Slots reconciled to fulfilled from externally rendered content
    pub external: usize,
    /// Slots abandoned because their region left the document
    pub abandoned: usize,
}

/// Background registry/reality reconciler
pub struct ReconciliationMonitor {
    registry: Arc<SlotRegistry>,
    dispatcher: Arc<BatchDispatcher>,
    retry: Arc<RetryPolicy>,
    surface: Arc<dyn DocumentSurface>,
    config: MonitorConfig,
    events: EventBus,
    /// Total slots the monitor had to force forward; mirrors into status()
    /// as a health signal for the event-driven paths
    interventions_total: AtomicU64,
}

impl ReconciliationMonitor {
    pub fn new(
        registry: Arc<SlotRegistry>,
        dispatcher: Arc<BatchDispatcher>,
        retry: Arc<RetryPolicy>,
        surface: Arc<dyn DocumentSurface>,
        config: MonitorConfig,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            retry,
            surface,
            config,
            events,
            interventions_total: AtomicU64::new(0),
        }
    }

    /// Start the periodic sweep task
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_millis(monitor.config.interval_ms));
            // The first tick fires immediately; skip it so startup dispatch
            // gets a full interval before the monitor second-guesses it
            interval.tick().await;
            info!(
                "reconciliation monitor started ({}ms interval)",
                monitor.config.interval_ms
            );
            loop {
                interval.tick().await;
                monitor.sweep().await;
            }
        })
    }

    /// Run one reconciliation sweep
    pub async fn sweep(&self) -> SweepReport {
        let snapshot = self.registry.snapshot().await;
        let mut report = SweepReport {
            examined: snapshot.slots.len(),
            ..SweepReport::default()
        };

        for slot in &snapshot.slots {
            if slot.state.is_terminal() || slot.state.is_in_flight() {
                continue;
            }

            // Region gone: terminal, not an error; pending tickets die too
            if !self.surface.region_exists(&slot.region) {
                debug!(slot_id = %slot.id, "region left the document; abandoning slot");
                let _ = self
                    .registry
                    .transition(slot.id, SlotState::FailedTerminal, None)
                    .await;
                self.retry.cancel(slot.id).await;
                report.abandoned += 1;
                continue;
            }

            // Content rendered without our involvement: reconcile, never
            // refulfill. Normal host behavior, not a defect signal.
            if self.surface.region_rendered(&slot.region) {
                let _ = self
                    .registry
                    .transition(slot.id, SlotState::Fulfilled, None)
                    .await;
                self.retry.cancel(slot.id).await;
                report.external += 1;
                continue;
            }

            // A pending retry ticket is progress, not stuckness
            if self.retry.has_ticket(slot.id).await {
                continue;
            }

            if slot.idle_ms >= self.config.staleness_ms {
                warn!(slot_id = %slot.id, state = %slot.state, idle_ms = slot.idle_ms, "stale slot forced forward");
                if let Err(e) = self.dispatcher.enqueue(slot.id).await {
                    warn!(slot_id = %slot.id, "forced enqueue failed: {}", e);
                    continue;
                }
                self.interventions_total.fetch_add(1, Ordering::Relaxed);
                report.forced += 1;
            }
        }

        self.events.emit_lossy(AdliftEvent::ReconcileCompleted {
            examined: report.examined,
            forced: report.forced,
            external: report.external,
            abandoned: report.abandoned,
            timestamp: chrono::Utc::now(),
        });
        debug!(?report, "reconciliation sweep completed");
        report
    }

    /// Total interventions since startup
    pub fn interventions_total(&self) -> u64 {
        self.interventions_total.load(Ordering::Relaxed)
    }
}

//! Orchestrator
//!
//! Composes the registry, gateway, scorer, scheduler, retry policy,
//! dispatcher, and monitor into the end-to-end slot lifecycle, and exposes
//! the operator control surface (`status`, `force_reconcile`, `reset`).
//!
//! No error escapes this surface: a bridge that never comes up degrades, a
//! slot that never fulfills goes terminal, and the page around the engine
//! keeps working either way.

use crate::bridge::{Bridge, BridgeGateway, Readiness};
use crate::dispatch::BatchDispatcher;
use crate::document::DocumentSurface;
use crate::error::{Error, Result};
use crate::monitor::{ReconciliationMonitor, SweepReport};
use crate::registry::SlotRegistry;
use crate::retry::RetryPolicy;
use crate::scorer::PriorityScorer;
use crate::visibility::{VisibilityScheduler, VisibilitySource};
use adlift_common::config::EngineConfig;
use adlift_common::events::{BridgeSessionState, CircuitHealth};
use adlift_common::{AdliftEvent, EventBus, SlotId, SlotState};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

/// Operator-facing engine status
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub total: usize,
    pub fulfilled: usize,
    pub failed_terminal: usize,
    pub in_flight: usize,
    pub pending: usize,
    /// Fulfilled fraction of resolved slots; None until something resolved
    pub success_rate: Option<f64>,
    pub bridge_session: BridgeSessionState,
    pub circuit: CircuitHealth,
    pub forced_reconciliations: u64,
}

/// End-to-end fulfillment engine
pub struct Orchestrator {
    config: EngineConfig,
    events: EventBus,
    surface: Arc<dyn DocumentSurface>,
    scorer: PriorityScorer,
    registry: Arc<SlotRegistry>,
    gateway: Arc<BridgeGateway>,
    retry: Arc<RetryPolicy>,
    dispatcher: Arc<BatchDispatcher>,
    scheduler: Arc<VisibilityScheduler>,
    monitor: Arc<ReconciliationMonitor>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    /// Wire up the engine against host-provided capabilities
    ///
    /// Nothing runs until `start()`; construction is side-effect free apart
    /// from binding the visibility channel.
    pub fn new(
        config: EngineConfig,
        bridge: Arc<dyn Bridge>,
        surface: Arc<dyn DocumentSurface>,
        visibility: Arc<dyn VisibilitySource>,
    ) -> Arc<Self> {
        let events = EventBus::new(256);

        let registry = Arc::new(SlotRegistry::new(
            Duration::from_millis(config.retry.terminal_cooldown_ms),
            events.clone(),
        ));
        let gateway = Arc::new(BridgeGateway::new(
            bridge,
            config.gateway.clone(),
            events.clone(),
        ));

        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let retry = Arc::new(RetryPolicy::new(
            config.retry.clone(),
            registry.clone(),
            intake_tx.clone(),
            events.clone(),
        ));
        let dispatcher = Arc::new(BatchDispatcher::new(
            registry.clone(),
            gateway.clone(),
            retry.clone(),
            surface.clone(),
            config.dispatch.clone(),
            events.clone(),
            intake_tx,
            intake_rx,
        ));
        let scheduler = Arc::new(VisibilityScheduler::new(
            visibility,
            registry.clone(),
            dispatcher.clone(),
            config.visibility.clone(),
        ));
        let monitor = Arc::new(ReconciliationMonitor::new(
            registry.clone(),
            dispatcher.clone(),
            retry.clone(),
            surface.clone(),
            config.monitor.clone(),
            events.clone(),
        ));
        let scorer = PriorityScorer::new(config.scorer.clone());

        Arc::new(Self {
            config,
            events,
            surface,
            scorer,
            registry,
            gateway,
            retry,
            dispatcher,
            scheduler,
            monitor,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Boot the engine: bridge bring-up, discovery, initial dispatch, and
    /// background tasks
    ///
    /// Already-visible slots go straight to the dispatcher in priority
    /// order; the rest wait on visibility (with the monitor as the safety
    /// net for slots that never become visible).
    pub async fn start(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        if self.gateway.ensure_ready().await == Readiness::Degraded {
            warn!("bridge degraded at startup; slots will resolve through timeouts");
        }

        let new_ids = self
            .registry
            .discover(self.surface.as_ref(), &self.scorer, None)
            .await;
        info!(discovered = new_ids.len(), "initial discovery complete");

        let viewport = self.surface.viewport();
        let mut visible: Vec<(u8, SlotId)> = Vec::new();

        for id in new_ids {
            let visible_now = self
                .registry
                .geometry_of(id)
                .await
                .map(|g| g.viewport_overlap(&viewport) >= self.config.visibility.threshold)
                .unwrap_or(false);

            if visible_now {
                let score = self.registry.score_of(id).await.unwrap_or(1);
                visible.push((score, id));
            } else if let Err(e) = self.scheduler.watch(id).await {
                debug!(slot_id = %id, "watch failed: {}", e);
            }
        }

        // Highest priority first within the initial burst
        visible.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, id) in visible {
            if let Err(e) = self.dispatcher.enqueue(id).await {
                debug!(slot_id = %id, "initial enqueue failed: {}", e);
            }
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.dispatcher.spawn_drain());
        tasks.push(self.scheduler.spawn());
        tasks.push(self.monitor.spawn());
        info!("orchestrator started");
        Ok(())
    }

    /// Current slot counts and bridge health
    pub async fn status(&self) -> EngineStatus {
        let snapshot = self.registry.snapshot().await;
        let total = snapshot.slots.len();
        let fulfilled = snapshot.count_in(SlotState::Fulfilled);
        let failed_terminal = snapshot.count_in(SlotState::FailedTerminal);
        let in_flight = snapshot.in_flight();
        let resolved = fulfilled + failed_terminal;

        EngineStatus {
            total,
            fulfilled,
            failed_terminal,
            in_flight,
            pending: total - fulfilled - failed_terminal - in_flight,
            success_rate: (resolved > 0).then(|| fulfilled as f64 / resolved as f64),
            bridge_session: self.gateway.session_state().await,
            circuit: self.gateway.circuit_health().await,
            forced_reconciliations: self.monitor.interventions_total(),
        }
    }

    /// Run an immediate out-of-cycle reconciliation sweep
    pub async fn force_reconcile(&self) -> SweepReport {
        self.monitor.sweep().await
    }

    /// Tear down timers and observers and clear the registry
    ///
    /// Full-reload scenario: the instance is inert afterwards; the host
    /// constructs a fresh orchestrator for the next page lifecycle.
    pub async fn reset(&self) {
        info!("orchestrator reset");
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        self.scheduler.unwatch_all().await;
        self.retry.cancel_all().await;
        self.registry.clear().await;
        self.gateway.reset().await;
    }

    /// Subscribe to the engine event stream
    pub fn subscribe(&self) -> broadcast::Receiver<AdliftEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &Arc<SlotRegistry> {
        &self.registry
    }

    pub fn gateway(&self) -> &Arc<BridgeGateway> {
        &self.gateway
    }
}

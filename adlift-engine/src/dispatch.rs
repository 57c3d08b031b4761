//! Batch Dispatcher
//!
//! Throttles fulfillment requests into bounded waves. Slots enter through a
//! single intake channel (from the orchestrator, the visibility scheduler,
//! retry tickets, and the reconciliation monitor); the drain task groups
//! them into waves, claims each slot, pushes through the gateway, and waits
//! for the rendered result within the verification window. A wave is
//! settle-all: one slot's failure never aborts its siblings.

use crate::bridge::BridgeGateway;
use crate::document::DocumentSurface;
use crate::error::{Error, Result};
use crate::registry::SlotRegistry;
use crate::retry::RetryPolicy;
use adlift_common::config::DispatchConfig;
use adlift_common::{AdliftEvent, EventBus, FailureKind, RegionHandle, SlotId, SlotState};
use futures::future::join_all;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Window of recent attempt outcomes used for adaptive pacing
const OUTCOME_WINDOW: usize = 20;

/// Minimum samples before the dispatcher trusts the success rate
const OUTCOME_MIN_SAMPLES: usize = 5;

/// Wave-based fulfillment dispatcher
pub struct BatchDispatcher {
    registry: Arc<SlotRegistry>,
    gateway: Arc<BridgeGateway>,
    retry: Arc<RetryPolicy>,
    surface: Arc<dyn DocumentSurface>,
    config: DispatchConfig,
    events: EventBus,
    intake_tx: mpsc::UnboundedSender<SlotId>,
    intake_rx: Mutex<Option<mpsc::UnboundedReceiver<SlotId>>>,
    recent: Mutex<VecDeque<bool>>,
}

impl BatchDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SlotRegistry>,
        gateway: Arc<BridgeGateway>,
        retry: Arc<RetryPolicy>,
        surface: Arc<dyn DocumentSurface>,
        config: DispatchConfig,
        events: EventBus,
        intake_tx: mpsc::UnboundedSender<SlotId>,
        intake_rx: mpsc::UnboundedReceiver<SlotId>,
    ) -> Self {
        Self {
            registry,
            gateway,
            retry,
            surface,
            config,
            events,
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a slot for fulfillment
    ///
    /// Moves the slot to `Queued` (from `Discovered` or `Failed`) and hands
    /// it to the drain task. Terminal and in-flight slots are dropped here;
    /// duplicate copies in the channel are filtered again at wave collection,
    /// so re-enqueueing is always safe.
    pub async fn enqueue(&self, slot_id: SlotId) -> Result<()> {
        let state = self
            .registry
            .state_of(slot_id)
            .await
            .ok_or(Error::SlotNotFound(slot_id))?;

        match state {
            s if s.is_terminal() || s.is_in_flight() => {
                debug!(slot_id = %slot_id, state = %s, "enqueue skipped");
                return Ok(());
            }
            SlotState::Queued => {}
            _ => {
                self.registry
                    .transition(slot_id, SlotState::Queued, None)
                    .await?;
            }
        }

        if self.intake_tx.send(slot_id).is_err() {
            warn!(slot_id = %slot_id, "dispatcher intake closed");
        }
        Ok(())
    }

    /// Start the drain loop
    pub fn spawn_drain(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = match dispatcher.intake_rx.lock().await.take() {
                Some(rx) => rx,
                None => {
                    warn!("dispatcher drain already started");
                    return;
                }
            };
            info!("batch dispatcher drain started");

            while let Some(first) = rx.recv().await {
                let wave = dispatcher.collect_wave(first, &mut rx).await;
                if wave.is_empty() {
                    continue;
                }

                dispatcher.events.emit_lossy(AdliftEvent::WaveDispatched {
                    wave_size: wave.len(),
                    timestamp: chrono::Utc::now(),
                });
                debug!(wave_size = wave.len(), "dispatching fulfillment wave");

                // Settle-all: every attempt runs to completion
                join_all(wave.into_iter().map(|id| dispatcher.attempt(id))).await;

                tokio::time::sleep(dispatcher.inter_wave_delay().await).await;
            }
            info!("batch dispatcher drain stopped");
        })
    }

    /// Group the first slot plus whatever else is immediately available into
    /// one wave, deduplicated and filtered to currently-queued slots
    async fn collect_wave(
        &self,
        first: SlotId,
        rx: &mut mpsc::UnboundedReceiver<SlotId>,
    ) -> Vec<SlotId> {
        let limit = self.wave_limit().await;

        let mut seen = HashSet::new();
        let mut candidates = vec![first];
        seen.insert(first);

        while candidates.len() < limit {
            match rx.try_recv() {
                Ok(id) if seen.insert(id) => candidates.push(id),
                Ok(_) => {}
                Err(_) => break,
            }
        }

        let mut wave = Vec::with_capacity(candidates.len());
        for id in candidates {
            if self.registry.state_of(id).await == Some(SlotState::Queued) {
                wave.push(id);
            } else {
                debug!(slot_id = %id, "stale intake entry skipped");
            }
        }
        wave
    }

    /// One fulfillment attempt: claim, push, verify, settle
    async fn attempt(&self, slot_id: SlotId) {
        let claim = match self.registry.begin_fulfillment(slot_id).await {
            Ok(claim) => claim,
            Err(Error::DuplicateAttempt(_)) => return,
            Err(e) => {
                debug!(slot_id = %slot_id, "claim refused: {}", e);
                return;
            }
        };
        let region = claim.region().clone();

        let outcome = match self.gateway.request_fulfillment(claim).await {
            Ok(()) => self.verify(slot_id, &region).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self
                    .registry
                    .transition(slot_id, SlotState::Fulfilled, None)
                    .await
                {
                    warn!(slot_id = %slot_id, "fulfilled transition failed: {}", e);
                }
                self.record_outcome(true).await;
            }
            Err(e) => {
                self.settle_failure(slot_id, &region, e).await;
                self.record_outcome(false).await;
            }
        }
    }

    /// Wait for the rendered result after a push
    ///
    /// Every attempt is bounded: exceeding the window is a retry-eligible
    /// timeout, never an indefinitely pending state.
    async fn verify(&self, slot_id: SlotId, region: &RegionHandle) -> Result<()> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.verification_timeout_ms);
        let poll = Duration::from_millis(self.config.verification_poll_ms);

        loop {
            if !self.surface.region_exists(region) {
                return Err(Error::Stale(slot_id));
            }
            if self.surface.region_rendered(region) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::FulfillmentTimeout(slot_id));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Route a failed attempt through the retry policy
    async fn settle_failure(&self, slot_id: SlotId, region: &RegionHandle, error: Error) {
        if matches!(error, Error::Stale(_)) {
            info!(slot_id = %slot_id, "region left the document mid-flight; abandoning");
            let _ = self
                .registry
                .transition(slot_id, SlotState::FailedTerminal, None)
                .await;
            self.retry.cancel(slot_id).await;
            return;
        }

        let kind = error.failure_kind().unwrap_or(FailureKind::Script);
        if let Err(e) = self
            .registry
            .transition(slot_id, SlotState::Failed, Some(kind))
            .await
        {
            warn!(slot_id = %slot_id, "failure transition rejected: {}", e);
            return;
        }

        let attempts = self.registry.attempts_of(slot_id).await.unwrap_or(0);
        let score = self.registry.score_of(slot_id).await.unwrap_or(1);

        if self.retry.should_retry(attempts, score, kind) {
            self.retry.schedule(slot_id, attempts).await;
        } else {
            warn!(slot_id = %slot_id, attempts, ?kind, "retry budget exhausted; slot terminal");
            let _ = self
                .registry
                .transition(slot_id, SlotState::FailedTerminal, Some(kind))
                .await;
            self.retry.cancel(slot_id).await;
            self.surface.collapse(region);
        }
    }

    async fn record_outcome(&self, success: bool) {
        let mut recent = self.recent.lock().await;
        recent.push_back(success);
        if recent.len() > OUTCOME_WINDOW {
            recent.pop_front();
        }
    }

    /// Recent attempt success rate, None until enough samples exist
    pub async fn recent_success_rate(&self) -> Option<f64> {
        let recent = self.recent.lock().await;
        if recent.len() < OUTCOME_MIN_SAMPLES {
            return None;
        }
        let successes = recent.iter().filter(|s| **s).count();
        Some(successes as f64 / recent.len() as f64)
    }

    /// Adaptive concurrency: drop to single-slot waves on a struggling bridge
    async fn wave_limit(&self) -> usize {
        match self.recent_success_rate().await {
            Some(rate) if rate < 0.5 => 1,
            _ => self.config.max_wave_size,
        }
    }

    /// Adaptive pacing: healthy recent history shortens the inter-wave gap
    async fn inter_wave_delay(&self) -> Duration {
        let max = self.config.wave_delay_ms as f64;
        let min = self.config.min_wave_delay_ms as f64;
        let rate = self.recent_success_rate().await.unwrap_or(0.5);
        Duration::from_millis((max - (max - min) * rate) as u64)
    }
}

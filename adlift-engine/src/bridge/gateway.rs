//! Bridge Gateway
//!
//! Single-flight-guarded, circuit-broken adapter to the external fulfillment
//! bridge. The session mutex is held across the entire bootstrap, so
//! concurrent callers share one load operation and see its outcome. On an
//! unavailable bridge the gateway degrades to a no-op stub queue: pushes
//! succeed without effect and slots resolve through the normal timeout path
//! instead of the engine deadlocking.

use super::circuit::CircuitBreaker;
use crate::error::{Error, Result};
use crate::registry::FulfillmentClaim;
use adlift_common::config::GatewayConfig;
use adlift_common::events::{BridgeSessionState, CircuitHealth};
use adlift_common::{AdliftEvent, EventBus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Capability interface over the external fulfillment bridge
///
/// `push_request` appends to the bridge's positional queue: each append is
/// correlated to the next unfulfilled region in document order, which is why
/// the engine must never push twice for one slot.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Inject the bootstrap resource and wait for its readiness signal
    async fn load_bootstrap(&self) -> Result<()>;

    /// Append one fulfillment request to the bridge queue (fire-and-forget)
    async fn push_request(&self) -> Result<()>;
}

/// Outcome of `ensure_ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Bridge session is loaded and accepting requests
    Ready,
    /// Bridge is unavailable; pushes are logged no-ops
    Degraded,
}

/// The one path to the bridge
pub struct BridgeGateway {
    bridge: Arc<dyn Bridge>,
    session: Mutex<BridgeSessionState>,
    circuit: Mutex<CircuitBreaker>,
    config: GatewayConfig,
    events: EventBus,
}

impl BridgeGateway {
    pub fn new(bridge: Arc<dyn Bridge>, config: GatewayConfig, events: EventBus) -> Self {
        let circuit = CircuitBreaker::new(
            config.circuit_failure_threshold,
            Duration::from_millis(config.circuit_cooldown_ms),
        );
        Self {
            bridge,
            session: Mutex::new(BridgeSessionState::Unloaded),
            circuit: Mutex::new(circuit),
            config,
            events,
        }
    }

    /// Bring the bridge session up, sharing one load among concurrent callers
    ///
    /// Never errors: an unreachable bridge yields `Degraded` so callers
    /// proceed with graceful no-op fulfillment. While the circuit is open,
    /// returns `Degraded` fast without attempting a load; after the cooldown
    /// one half-open probe retries the bootstrap.
    pub async fn ensure_ready(&self) -> Readiness {
        let mut session = self.session.lock().await;

        match *session {
            BridgeSessionState::Ready => return Readiness::Ready,
            BridgeSessionState::Unloaded | BridgeSessionState::Unavailable => {}
            // Loading is only observable through events; the lock is held
            // for the duration of a load
            BridgeSessionState::Loading => {}
        }

        {
            let mut circuit = self.circuit.lock().await;
            let before = circuit.health();
            let admitted = circuit.check();
            self.emit_circuit_change(before, circuit.health());
            if admitted.is_err() {
                debug!("circuit open; bridge load skipped, session degraded");
                return Readiness::Degraded;
            }
        }

        self.set_session(&mut session, BridgeSessionState::Loading);

        let load = timeout(
            Duration::from_millis(self.config.bootstrap_timeout_ms),
            self.bridge.load_bootstrap(),
        )
        .await;

        let outcome = match load {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Bootstrap(e.to_string())),
            Err(_) => Err(Error::Bootstrap(format!(
                "no readiness signal within {}ms",
                self.config.bootstrap_timeout_ms
            ))),
        };

        let mut circuit = self.circuit.lock().await;
        let before = circuit.health();
        match outcome {
            Ok(()) => {
                circuit.record_success();
                self.emit_circuit_change(before, circuit.health());
                self.set_session(&mut session, BridgeSessionState::Ready);
                info!("bridge session ready");
                Readiness::Ready
            }
            Err(e) => {
                circuit.record_failure();
                self.emit_circuit_change(before, circuit.health());
                self.set_session(&mut session, BridgeSessionState::Unavailable);
                warn!("bridge bootstrap failed, session degraded: {}", e);
                Readiness::Degraded
            }
        }
    }

    /// Push one fulfillment request for a claimed slot
    ///
    /// The sole push path. Consuming the claim makes a second push for the
    /// same fulfillment episode unrepresentable. Against a degraded session
    /// this is a logged no-op success; the slot resolves via its
    /// verification timeout.
    pub async fn request_fulfillment(&self, claim: FulfillmentClaim) -> Result<()> {
        match self.ensure_ready().await {
            Readiness::Ready => {
                self.bridge
                    .push_request()
                    .await
                    .map_err(|e| Error::Bridge(e.to_string()))?;
                debug!(slot_id = %claim.slot_id(), region = %claim.region(), "fulfillment request pushed");
                Ok(())
            }
            Readiness::Degraded => {
                debug!(slot_id = %claim.slot_id(), "degraded bridge session; no-op push");
                Ok(())
            }
        }
    }

    pub async fn session_state(&self) -> BridgeSessionState {
        *self.session.lock().await
    }

    pub async fn circuit_health(&self) -> CircuitHealth {
        self.circuit.lock().await.health()
    }

    /// Operator reset: drop the session and close the circuit
    pub async fn reset(&self) {
        let mut session = self.session.lock().await;
        self.set_session(&mut session, BridgeSessionState::Unloaded);
        *self.circuit.lock().await = CircuitBreaker::new(
            self.config.circuit_failure_threshold,
            Duration::from_millis(self.config.circuit_cooldown_ms),
        );
    }

    fn set_session(&self, session: &mut BridgeSessionState, new_state: BridgeSessionState) {
        if *session != new_state {
            self.events.emit_lossy(AdliftEvent::BridgeSessionChanged {
                old_state: *session,
                new_state,
                timestamp: chrono::Utc::now(),
            });
            *session = new_state;
        }
    }

    fn emit_circuit_change(&self, old: CircuitHealth, new: CircuitHealth) {
        if old != new {
            info!(?old, ?new, "bridge circuit state changed");
            self.events.emit_lossy(AdliftEvent::CircuitStateChanged {
                old_state: old,
                new_state: new,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

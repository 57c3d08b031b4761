//! # Adlift Fulfillment Engine (adlift-engine)
//!
//! Client-side orchestration engine for advertisement slot fulfillment.
//!
//! **Purpose:** Discover placeholder slots in a rendered document, negotiate
//! their fulfillment with a positional, side-effecting external bridge, and
//! guarantee every slot ends `Fulfilled` or `FailedTerminal`, without ever
//! pushing twice for the same slot and without blocking page responsiveness.
//!
//! **Architecture:** Cooperative async tasks over capability traits
//! (`Bridge`, `DocumentSurface`, `VisibilitySource`) injected by the host.
//! The single in-flight-per-slot invariant is enforced structurally: the
//! bridge gateway only accepts a `FulfillmentClaim`, and the registry mints
//! at most one claim per fulfillment episode.

pub mod bridge;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod scorer;
pub mod visibility;

pub use error::{Error, Result};
pub use orchestrator::{EngineStatus, Orchestrator};

//! Bridge adapter layer
//!
//! The external fulfillment bridge is a black box: request-only,
//! positionally addressed, with process-wide state that makes a repeated
//! push for the same region fatal. Everything that touches it goes through
//! `BridgeGateway`.

mod circuit;
mod gateway;

pub use circuit::{CircuitBreaker, CircuitState};
pub use gateway::{Bridge, BridgeGateway, Readiness};

//! # Adlift Common Library
//!
//! Shared code for the adlift slot-fulfillment engine:
//! - Slot/region identifiers and geometry types
//! - Event types (AdliftEvent enum) and EventBus
//! - Engine configuration (all tuned constants in one place)

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use events::{AdliftEvent, EventBus};
pub use types::{FailureKind, Geometry, RegionHandle, SlotId, SlotState, Viewport};

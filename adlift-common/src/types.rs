//! Core identifiers, geometry, and slot lifecycle states
//!
//! These types are shared between the engine and any host-side adapter code.
//! Geometry math is pure and deterministic; the priority scorer and the
//! visibility scheduler both derive their decisions from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier for a placeholder slot
///
/// Ids survive rediscovery: a region carrying an explicit identity attribute
/// always maps to the same SlotId, while anonymous regions get a generated id
/// salted with a per-session token (so ids are unique per page load but never
/// collide with explicit ones).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(Uuid);

impl SlotId {
    /// Derive a stable id from an explicit identity attribute
    pub fn from_identity(identity: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, identity.as_bytes()))
    }

    /// Generate a fresh id for a region without an identity attribute
    ///
    /// Salted with the session token so generated ids are namespaced to this
    /// page load and cannot collide with identity-derived ids.
    pub fn generate(session_salt: &Uuid) -> Self {
        Self(Uuid::new_v5(session_salt, Uuid::new_v4().as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque host-provided reference to a region in the rendered tree
///
/// The engine never interprets the contents; it only uses handles as keys
/// when talking back to the `DocumentSurface`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionHandle(String);

impl RegionHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RegionHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Viewport dimensions at snapshot time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Geometry snapshot of a slot region, in document coordinates
///
/// `top`/`left` are relative to the viewport origin at snapshot time, so a
/// negative `top` means the region is scrolled above the current view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Geometry {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Fraction of this region's area currently inside the viewport, in [0, 1]
    pub fn viewport_overlap(&self, viewport: &Viewport) -> f64 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }

        let x_overlap = (self.right().min(viewport.width) - self.left.max(0.0)).max(0.0);
        let y_overlap = (self.bottom().min(viewport.height) - self.top.max(0.0)).max(0.0);

        (x_overlap * y_overlap / area).clamp(0.0, 1.0)
    }

    /// Whether the region starts above the fold (top edge within first viewport)
    pub fn above_the_fold(&self, viewport: &Viewport) -> bool {
        self.top < viewport.height
    }
}

/// Slot lifecycle states
///
/// Legal transitions:
/// - Discovered -> Queued | Fulfilled | FailedTerminal
/// - Queued     -> Fulfilling | Fulfilled | FailedTerminal
/// - Fulfilling -> Fulfilled | Failed | FailedTerminal
/// - Failed     -> Queued | Fulfilled | FailedTerminal
///
/// `Fulfilled` and `FailedTerminal` are terminal; any transition out of them
/// is rejected. `Fulfilled` may be entered from non-`Fulfilling` states only
/// by reconciliation (externally rendered content).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Discovered,
    Queued,
    Fulfilling,
    Fulfilled,
    Failed,
    FailedTerminal,
}

impl SlotState {
    /// Whether this state ends the slot's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotState::Fulfilled | SlotState::FailedTerminal)
    }

    /// Whether a fulfillment request is currently in flight
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SlotState::Fulfilling)
    }

    /// State machine legality check
    pub fn can_transition_to(&self, to: SlotState) -> bool {
        use SlotState::*;
        match (*self, to) {
            (Discovered, Queued) => true,
            (Queued, Fulfilling) => true,
            (Fulfilling, Fulfilled) => true,
            (Fulfilling, Failed) => true,
            (Failed, Queued) => true,
            // Reconciliation may terminate or externally fulfill any live slot
            (Discovered | Queued | Failed, Fulfilled) => true,
            (Discovered | Queued | Fulfilling | Failed, FailedTerminal) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotState::Discovered => "discovered",
            SlotState::Queued => "queued",
            SlotState::Fulfilling => "fulfilling",
            SlotState::Fulfilled => "fulfilled",
            SlotState::Failed => "failed",
            SlotState::FailedTerminal => "failed-terminal",
        };
        f.write_str(s)
    }
}

/// Classification of a failed fulfillment attempt
///
/// Ordered by retry severity: timeouts are the most likely to be transient,
/// validation failures the most likely to be permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Network,
    Script,
    Validation,
}

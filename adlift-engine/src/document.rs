//! Document surface capability
//!
//! The engine never touches the rendered tree directly; the host supplies a
//! `DocumentSurface` implementation. All calls are synchronous reads or
//! cheap mutations (collapse), matching the host-side rendering model.

use adlift_common::{Geometry, RegionHandle, Viewport};

/// One placeholder region as reported by a document scan
#[derive(Debug, Clone)]
pub struct RegionDescriptor {
    /// Opaque handle the engine uses for all later queries about this region
    pub region: RegionHandle,

    /// Explicit identity attribute, when the markup carries one
    ///
    /// Regions without one are auto-repaired with a generated, session-salted
    /// id at discovery.
    pub explicit_id: Option<String>,

    /// Geometry snapshot at scan time
    pub geometry: Geometry,
}

/// Capability interface over the rendered document
pub trait DocumentSurface: Send + Sync {
    /// Enumerate placeholder regions currently in the document
    ///
    /// Includes regions that already hold content; the registry and the
    /// reconciliation monitor decide what to do with those.
    fn scan(&self) -> Vec<RegionDescriptor>;

    /// Whether the region is still attached to the document
    fn region_exists(&self, region: &RegionHandle) -> bool;

    /// Whether the region holds rendered content
    ///
    /// This is the only way to observe fulfillment: the bridge offers no
    /// query API, so a rendered subtree is the sole success signal.
    fn region_rendered(&self, region: &RegionHandle) -> bool;

    /// Current geometry for the region, None once detached
    fn geometry(&self, region: &RegionHandle) -> Option<Geometry>;

    /// Current viewport dimensions
    fn viewport(&self) -> Viewport;

    /// Collapse a failed region's reserved space to minimal
    ///
    /// Called once when a slot goes terminal without content; a failed slot
    /// never surfaces a visible error.
    fn collapse(&self, region: &RegionHandle);
}

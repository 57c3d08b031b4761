//! Shared fixtures for engine integration tests
//!
//! `PageState` plays the rendered document; `TestBridge` plays the external
//! fulfillment bridge, rendering into the page positionally (first
//! unfulfilled region in document order per push) the way the real bridge
//! correlates appends; `ManualVisibility` lets a test script visibility
//! transitions by hand.

#![allow(dead_code)]

use adlift_common::{AdliftEvent, Geometry, RegionHandle, Viewport};
use adlift_engine::bridge::Bridge;
use adlift_engine::document::{DocumentSurface, RegionDescriptor};
use adlift_engine::visibility::{VisibilityEvent, VisibilitySource};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Mutable document the engine and the fake bridge both act on
pub struct PageState {
    regions: Mutex<Vec<RegionDescriptor>>,
    rendered: Mutex<HashSet<RegionHandle>>,
    collapsed: Mutex<HashSet<RegionHandle>>,
    viewport: Viewport,
}

impl PageState {
    pub fn new(regions: Vec<RegionDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            regions: Mutex::new(regions),
            rendered: Mutex::new(HashSet::new()),
            collapsed: Mutex::new(HashSet::new()),
            viewport: Viewport {
                width: 1000.0,
                height: 800.0,
            },
        })
    }

    /// Host (or bridge) renders content into a region
    pub fn mark_rendered(&self, region: &RegionHandle) {
        self.rendered.lock().unwrap().insert(region.clone());
    }

    /// Region leaves the document entirely
    pub fn remove_region(&self, region: &RegionHandle) {
        self.regions.lock().unwrap().retain(|d| &d.region != region);
    }

    /// Bridge-side positional fulfillment: render the first region in
    /// document order that has no content yet
    pub fn render_next_unfulfilled(&self) {
        let regions = self.regions.lock().unwrap();
        let mut rendered = self.rendered.lock().unwrap();
        if let Some(next) = regions.iter().find(|d| !rendered.contains(&d.region)) {
            rendered.insert(next.region.clone());
        }
    }

    pub fn rendered_count(&self) -> usize {
        self.rendered.lock().unwrap().len()
    }

    pub fn is_collapsed(&self, region: &RegionHandle) -> bool {
        self.collapsed.lock().unwrap().contains(region)
    }
}

impl DocumentSurface for PageState {
    fn scan(&self) -> Vec<RegionDescriptor> {
        self.regions.lock().unwrap().clone()
    }

    fn region_exists(&self, region: &RegionHandle) -> bool {
        self.regions.lock().unwrap().iter().any(|d| &d.region == region)
    }

    fn region_rendered(&self, region: &RegionHandle) -> bool {
        self.rendered.lock().unwrap().contains(region)
    }

    fn geometry(&self, region: &RegionHandle) -> Option<Geometry> {
        self.regions
            .lock()
            .unwrap()
            .iter()
            .find(|d| &d.region == region)
            .map(|d| d.geometry)
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn collapse(&self, region: &RegionHandle) {
        self.collapsed.lock().unwrap().insert(region.clone());
    }
}

/// Scriptable bridge fake
///
/// Counts pushes and bootstrap attempts; can fail the first N bootstraps or
/// swallow the first N pushes (push accepted, nothing ever renders).
pub struct TestBridge {
    page: Arc<PageState>,
    bootstraps: AtomicUsize,
    pushes: AtomicUsize,
    fail_bootstraps: usize,
    swallow_pushes: usize,
}

impl TestBridge {
    pub fn new(page: Arc<PageState>) -> Arc<Self> {
        Self::with_behavior(page, 0, 0)
    }

    pub fn with_behavior(
        page: Arc<PageState>,
        fail_bootstraps: usize,
        swallow_pushes: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            page,
            bootstraps: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
            fail_bootstraps,
            swallow_pushes,
        })
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn bootstrap_count(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bridge for TestBridge {
    async fn load_bootstrap(&self) -> adlift_engine::Result<()> {
        let attempt = self.bootstraps.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_bootstraps {
            Err(adlift_engine::Error::Bootstrap(
                "readiness flag never defined".into(),
            ))
        } else {
            Ok(())
        }
    }

    async fn push_request(&self) -> adlift_engine::Result<()> {
        let push = self.pushes.fetch_add(1, Ordering::SeqCst);
        if push >= self.swallow_pushes {
            self.page.render_next_unfulfilled();
        }
        Ok(())
    }
}

/// Visibility source driven explicitly by the test
#[derive(Default)]
pub struct ManualVisibility {
    tx: Mutex<Option<mpsc::UnboundedSender<VisibilityEvent>>>,
    watched: Mutex<HashSet<RegionHandle>>,
}

impl ManualVisibility {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report a region intersecting the viewport at the given ratio
    pub fn show(&self, region: &RegionHandle, ratio: f64) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(VisibilityEvent {
                region: region.clone(),
                ratio,
            });
        }
    }

    pub fn watched_count(&self) -> usize {
        self.watched.lock().unwrap().len()
    }
}

impl VisibilitySource for ManualVisibility {
    fn bind(&self, tx: mpsc::UnboundedSender<VisibilityEvent>) {
        *self.tx.lock().unwrap() = Some(tx);
    }

    fn watch(&self, region: &RegionHandle) {
        self.watched.lock().unwrap().insert(region.clone());
    }

    fn unwatch(&self, region: &RegionHandle) {
        self.watched.lock().unwrap().remove(region);
    }
}

/// Standard 300x250 placement at the given document offset
pub fn banner(handle: &str, top: f64) -> RegionDescriptor {
    RegionDescriptor {
        region: RegionHandle::from(handle),
        explicit_id: Some(handle.to_string()),
        geometry: Geometry {
            left: 0.0,
            top,
            width: 300.0,
            height: 250.0,
        },
    }
}

/// Receive events until one satisfies the predicate, with a deadline so a
/// wrong engine hangs the assertion instead of the test run
pub async fn wait_for<F>(
    rx: &mut broadcast::Receiver<AdliftEvent>,
    mut predicate: F,
) -> AdliftEvent
where
    F: FnMut(&AdliftEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event bus closed before the expected event")
                }
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

//! End-to-end engine scenarios against scripted page, bridge, and
//! visibility fakes

mod common;

use adlift_common::config::EngineConfig;
use adlift_common::events::BridgeSessionState;
use adlift_common::{AdliftEvent, RegionHandle, SlotState};
use adlift_engine::Orchestrator;
use common::{banner, wait_for, ManualVisibility, PageState, TestBridge};
use std::collections::HashMap;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_visible_slots_fulfill_first_then_scroll_triggers_the_rest() {
    let page = PageState::new(vec![
        banner("r-top", 50.0),
        banner("r-mid", 300.0),
        banner("r-low1", 1200.0),
        banner("r-low2", 2000.0),
        banner("r-low3", 2600.0),
    ]);
    let bridge = TestBridge::new(page.clone());
    let visibility = ManualVisibility::new();

    let orch = Orchestrator::new(
        EngineConfig::default(),
        bridge.clone(),
        page.clone(),
        visibility.clone(),
    );
    let mut events = orch.subscribe();
    orch.start().await.unwrap();

    // The two in-viewport slots fulfill without any visibility event
    for _ in 0..2 {
        wait_for(&mut events, |e| {
            matches!(e, AdliftEvent::SlotFulfilled { external: false, .. })
        })
        .await;
    }
    assert_eq!(bridge.push_count(), 2);

    let status = orch.status().await;
    assert_eq!(status.total, 5);
    assert_eq!(status.fulfilled, 2);
    assert_eq!(status.pending, 3);
    assert_eq!(visibility.watched_count(), 3);

    // Status is the host-facing surface; it must serialize cleanly
    let json = serde_json::to_string(&status).unwrap();
    assert!(json.contains("\"fulfilled\":2"));
    assert!(json.contains("\"bridge_session\":\"ready\""));

    // Scrolling one below-fold slot across the threshold dispatches it
    visibility.show(&RegionHandle::from("r-low1"), 0.8);
    wait_for(&mut events, |e| {
        matches!(e, AdliftEvent::SlotFulfilled { external: false, .. })
    })
    .await;

    assert_eq!(bridge.push_count(), 3);
    assert_eq!(orch.status().await.fulfilled, 3);
    // The dispatched slot is no longer observed
    assert_eq!(visibility.watched_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_visibility_burst_collapses_to_newest_observation() {
    let page = PageState::new(vec![
        banner("r-low1", 1200.0),
        banner("r-low2", 2000.0),
        banner("r-low3", 2600.0),
    ]);
    // Pushes never render; only the queueing decisions matter here
    let bridge = TestBridge::with_behavior(page.clone(), 0, usize::MAX);
    let visibility = ManualVisibility::new();

    // Keep the monitor out of the picture so every queued slot is a
    // scheduler decision
    let mut config = EngineConfig::default();
    config.monitor.interval_ms = 3_600_000;
    config.monitor.staleness_ms = 3_600_000;

    let orch = Orchestrator::new(config, bridge.clone(), page.clone(), visibility.clone());
    let mut events = orch.subscribe();
    orch.start().await.unwrap();
    assert_eq!(visibility.watched_count(), 3);

    let mut slot_of = HashMap::new();
    for _ in 0..3 {
        if let AdliftEvent::SlotDiscovered { slot_id, region, .. } =
            wait_for(&mut events, |e| matches!(e, AdliftEvent::SlotDiscovered { .. })).await
        {
            slot_of.insert(region, slot_id);
        }
    }

    // A fast scroll: three observations land inside one decision interval
    visibility.show(&RegionHandle::from("r-low1"), 1.0);
    visibility.show(&RegionHandle::from("r-low2"), 1.0);
    visibility.show(&RegionHandle::from("r-low3"), 1.0);

    let mut queued = Vec::new();
    while queued.len() < 2 {
        if let AdliftEvent::SlotStateChanged { slot_id, .. } = wait_for(&mut events, |e| {
            matches!(
                e,
                AdliftEvent::SlotStateChanged {
                    new_state: SlotState::Queued,
                    ..
                }
            )
        })
        .await
        {
            queued.push(slot_id);
        }
    }

    // The first observation dispatches immediately; the burst behind it
    // collapses to the newest one, dropping the middle observation
    assert_eq!(queued[0], slot_of[&RegionHandle::from("r-low1")]);
    assert_eq!(queued[1], slot_of[&RegionHandle::from("r-low3")]);

    // The absorbed slot stays watched for a later crossing
    assert_eq!(visibility.watched_count(), 1);
    let status = orch.status().await;
    assert_eq!(status.fulfilled, 0);
    assert_eq!(status.failed_terminal, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_bridge_degrades_without_blocking() {
    let page = PageState::new(vec![banner("r-top", 50.0)]);
    let bridge = TestBridge::with_behavior(page.clone(), usize::MAX, 0);
    let visibility = ManualVisibility::new();

    let orch = Orchestrator::new(
        EngineConfig::default(),
        bridge.clone(),
        page.clone(),
        visibility,
    );
    let mut events = orch.subscribe();
    orch.start().await.unwrap();

    // Degraded pushes are no-ops; the slot burns its retry budget through
    // verification timeouts and goes terminal
    let failed = wait_for(&mut events, |e| {
        matches!(e, AdliftEvent::SlotFailed { terminal: true, .. })
    })
    .await;
    if let AdliftEvent::SlotFailed { attempts, .. } = failed {
        assert!(attempts >= 1);
    }

    assert_eq!(bridge.push_count(), 0, "no push may reach a degraded bridge");
    assert!(page.is_collapsed(&RegionHandle::from("r-top")));

    let status = orch.status().await;
    assert_eq!(status.failed_terminal, 1);
    assert_eq!(status.fulfilled, 0);
    assert_eq!(status.bridge_session, BridgeSessionState::Unavailable);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_with_growing_backoff() {
    let page = PageState::new(vec![banner("r-top", 50.0)]);
    // First two pushes are accepted but never render: verification timeouts
    let bridge = TestBridge::with_behavior(page.clone(), 0, 2);
    let visibility = ManualVisibility::new();

    let orch = Orchestrator::new(
        EngineConfig::default(),
        bridge.clone(),
        page.clone(),
        visibility,
    );
    let mut events = orch.subscribe();
    orch.start().await.unwrap();

    let mut retry_delays = Vec::new();
    let fulfilled = wait_for(&mut events, |e| {
        if let AdliftEvent::RetryScheduled { delay_ms, .. } = e {
            retry_delays.push(*delay_ms);
        }
        matches!(e, AdliftEvent::SlotFulfilled { .. })
    })
    .await;

    if let AdliftEvent::SlotFulfilled { attempts, external, .. } = fulfilled {
        assert_eq!(attempts, 3);
        assert!(!external);
    }
    assert_eq!(bridge.push_count(), 3);
    assert_eq!(retry_delays.len(), 2);
    assert!(
        retry_delays[0] <= retry_delays[1],
        "backoff must not shrink: {:?}",
        retry_delays
    );
}

#[tokio::test(start_paused = true)]
async fn test_externally_rendered_content_reconciles_without_a_push() {
    let page = PageState::new(vec![banner("r-deep", 1500.0)]);
    let bridge = TestBridge::new(page.clone());
    let visibility = ManualVisibility::new();

    let orch = Orchestrator::new(
        EngineConfig::default(),
        bridge.clone(),
        page.clone(),
        visibility,
    );
    let mut events = orch.subscribe();
    orch.start().await.unwrap();

    // Host auto-placement fills the region behind the engine's back
    page.mark_rendered(&RegionHandle::from("r-deep"));

    let report = orch.force_reconcile().await;
    assert_eq!(report.examined, 1);
    assert_eq!(report.external, 1);
    assert_eq!(report.forced, 0);

    let fulfilled = wait_for(&mut events, |e| {
        matches!(e, AdliftEvent::SlotFulfilled { .. })
    })
    .await;
    if let AdliftEvent::SlotFulfilled { attempts, external, .. } = fulfilled {
        assert!(external);
        assert_eq!(attempts, 0);
    }

    assert_eq!(bridge.push_count(), 0);
    assert_eq!(orch.status().await.fulfilled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_leaves_the_engine_inert() {
    let page = PageState::new(vec![banner("r-top", 50.0), banner("r-deep", 1500.0)]);
    let bridge = TestBridge::new(page.clone());
    let visibility = ManualVisibility::new();

    let orch = Orchestrator::new(
        EngineConfig::default(),
        bridge.clone(),
        page.clone(),
        visibility.clone(),
    );
    let mut events = orch.subscribe();
    orch.start().await.unwrap();

    wait_for(&mut events, |e| {
        matches!(e, AdliftEvent::SlotFulfilled { .. })
    })
    .await;

    orch.reset().await;
    let status = orch.status().await;
    assert_eq!(status.total, 0);
    assert_eq!(status.bridge_session, BridgeSessionState::Unloaded);
    assert_eq!(visibility.watched_count(), 0);

    // Visibility events after reset trigger nothing
    let pushes = bridge.push_count();
    visibility.show(&RegionHandle::from("r-deep"), 1.0);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(bridge.push_count(), pushes);
}

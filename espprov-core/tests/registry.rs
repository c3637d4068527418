mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{FakeTransport, callback, device, drain, next_event};
use espprov_core::{CallbackChannel, DEFAULT_PROVIDER, DeviceRegistry, TransportError};

fn new_registry(transport: Arc<FakeTransport>) -> (DeviceRegistry, common::Events) {
    let (tx, rx) = callback();
    let registry = DeviceRegistry::new(
        transport,
        Some(CallbackChannel::new(tx, DEFAULT_PROVIDER)),
        Duration::from_secs(120),
        25,
    );
    (registry, rx)
}

fn names(event: &serde_json::Value) -> Vec<String> {
    event["devices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn device_lists_are_unique_and_only_grow() {
    let transport = FakeTransport::new();
    transport.push_scan_round(Ok(vec![device("PROV_A")]));
    transport.push_scan_round(Ok(vec![device("PROV_A"), device("PROV_B")]));
    transport.push_scan_round(Ok(vec![device("PROV_B")]));
    transport.push_scan_round(Ok(vec![device("PROV_C"), device("PROV_A")]));
    let (registry, mut events) = new_registry(transport);
    registry.enable();
    registry.start_devices_scan(Some("PROV_"));
    assert!(registry.is_scanning());

    let mut previous: Vec<String> = Vec::new();
    for expected in [1, 2, 3] {
        let event = next_event(&mut events, "START_BLE_SCAN").await;
        assert_eq!(event["provider"], "espprovision");
        let current = names(&event);
        assert_eq!(current.len(), expected);
        let unique: HashSet<_> = current.iter().collect();
        assert_eq!(unique.len(), current.len(), "duplicate in {current:?}");
        assert!(previous.iter().all(|n| current.contains(n)), "{previous:?} -> {current:?}");
        previous = current;
    }
    assert_eq!(previous, vec!["PROV_A", "PROV_B", "PROV_C"]);

    let ids: HashSet<_> = registry.devices().iter().map(|d| d.id).collect();
    assert_eq!(ids.len(), 3);
    let b = &registry.devices()[1];
    assert_eq!(registry.get_device_with_id(&b.id).unwrap().name, "PROV_B");
    assert!(registry.get_device_with_id(&uuid::Uuid::new_v4()).is_none());
}

#[tokio::test(start_paused = true)]
async fn scan_times_out_after_max_iterations() {
    let transport = FakeTransport::new();
    let (registry, mut events) = new_registry(transport.clone());
    registry.enable();
    registry.start_devices_scan(None);

    let event = next_event(&mut events, "STOP_BLE_SCAN").await;
    assert_eq!(event["errorCode"], 600);
    assert!(!registry.is_scanning());
    assert_eq!(transport.stop_scan_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_registry_refuses_to_scan() {
    let (registry, mut events) = new_registry(FakeTransport::new());
    registry.start_devices_scan(None);

    let event = next_event(&mut events, "STOP_BLE_SCAN").await;
    assert_eq!(event["errorCode"], 200);
    assert!(!registry.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn failed_round_ends_the_scan() {
    let transport = FakeTransport::new();
    transport.push_scan_round(Err(TransportError::Scan("adapter went away".to_string())));
    let (registry, mut events) = new_registry(transport);
    registry.enable();
    registry.start_devices_scan(None);

    let event = next_event(&mut events, "STOP_BLE_SCAN").await;
    assert_eq!(event["errorCode"], 10000);
    assert_eq!(event["errorMessage"], "scan failed: adapter went away");
    assert!(!registry.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn stopped_scan_ignores_late_rounds() {
    let transport = FakeTransport::new();
    transport.push_scan_round(Ok(vec![device("PROV_A")]));
    let (registry, mut events) = new_registry(transport.clone());
    registry.enable();
    registry.start_devices_scan(None);
    next_event(&mut events, "START_BLE_SCAN").await;

    transport.push_scan_round(Ok(vec![device("PROV_B")]));
    registry.stop_devices_scan(true).await;
    let event = next_event(&mut events, "STOP_BLE_SCAN").await;
    assert!(event.get("errorCode").is_none());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(registry.devices().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn round_failing_after_stop_is_not_reported() {
    let transport = FakeTransport::new();
    transport.push_scan_round(Err(TransportError::Scan("late failure".to_string())));
    let (registry, mut events) = new_registry(transport);
    registry.enable();
    registry.start_devices_scan(None);
    // let the round get in flight
    tokio::time::sleep(Duration::from_millis(50)).await;

    registry.stop_devices_scan(true).await;
    let event = next_event(&mut events, "STOP_BLE_SCAN").await;
    assert!(event.get("errorCode").is_none());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(drain(&mut events).is_empty());
    assert!(!registry.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn restart_replaces_the_device_set() {
    let transport = FakeTransport::new();
    transport.push_scan_round(Ok(vec![device("PROV_A")]));
    let (registry, mut events) = new_registry(transport.clone());
    registry.enable();
    registry.start_devices_scan(None);
    next_event(&mut events, "START_BLE_SCAN").await;
    let first = registry.devices()[0].id;

    registry.stop_devices_scan(false).await;
    // the stopped scan may still consume one round
    transport.push_scan_round(Ok(vec![device("PROV_A")]));
    transport.push_scan_round(Ok(vec![device("PROV_A")]));
    registry.start_devices_scan(None);
    assert!(registry.devices().is_empty());
    next_event(&mut events, "START_BLE_SCAN").await;

    let second = registry.devices()[0].id;
    assert_ne!(first, second);
    assert!(registry.get_device_with_id(&first).is_none());
}

#[tokio::test(start_paused = true)]
async fn disable_stops_an_active_scan() {
    let (registry, mut events) = new_registry(FakeTransport::new());
    registry.enable();
    registry.start_devices_scan(None);
    registry.disable().await;

    let event = next_event(&mut events, "STOP_BLE_SCAN").await;
    assert!(event.get("errorCode").is_none());
    assert!(!registry.is_scanning());
    assert!(!registry.is_enabled());
}

mod common;

use std::time::Duration;

use common::{FakeTransport, Session, ap, drain, next_event};
use espprov_core::{ProvisionFailureReason, TransportError, WifiProvisionError, WifiProvisioner};

fn provisioner(session: &Session, dedupe: bool) -> WifiProvisioner {
    WifiProvisioner::new(
        session.connection.clone(),
        Some(session.callback.clone()),
        Duration::from_secs(120),
        25,
        dedupe,
    )
}

fn ssids(event: &serde_json::Value) -> Vec<(String, i64)> {
    event["networks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| {
            (
                n["ssid"].as_str().unwrap().to_string(),
                n["signalStrength"].as_i64().unwrap(),
            )
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn scan_requires_a_connection() {
    let mut session = Session::discovered(FakeTransport::new()).await;
    let wifi = provisioner(&session, false);

    wifi.start_wifi_scan();
    let event = next_event(&mut session.events, "STOP_WIFI_SCAN").await;
    assert_eq!(event["errorCode"], 300);
    assert_eq!(event["id"], "N/A");
    assert!(!wifi.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn networks_accumulate_across_rounds() {
    let transport = FakeTransport::new();
    transport.push_wifi_round(Ok(vec![ap("home", -40)]));
    transport.push_wifi_round(Ok(vec![ap("home", -45), ap("office", -70)]));
    let mut session = Session::connected(transport).await;
    let wifi = provisioner(&session, false);

    wifi.start_wifi_scan();
    let first = next_event(&mut session.events, "START_WIFI_SCAN").await;
    assert_eq!(ssids(&first), vec![("home".to_string(), -40)]);
    let second = next_event(&mut session.events, "START_WIFI_SCAN").await;
    assert_eq!(
        ssids(&second),
        vec![
            ("home".to_string(), -40),
            ("home".to_string(), -45),
            ("office".to_string(), -70)
        ]
    );
    wifi.stop_wifi_scan(true);
    let stop = next_event(&mut session.events, "STOP_WIFI_SCAN").await;
    assert!(stop.get("errorCode").is_none());
}

#[tokio::test(start_paused = true)]
async fn dedupe_keeps_latest_signal_per_ssid() {
    let transport = FakeTransport::new();
    transport.push_wifi_round(Ok(vec![ap("home", -40)]));
    transport.push_wifi_round(Ok(vec![ap("home", -45), ap("office", -70)]));
    let mut session = Session::connected(transport).await;
    let wifi = provisioner(&session, true);

    wifi.start_wifi_scan();
    next_event(&mut session.events, "START_WIFI_SCAN").await;
    let second = next_event(&mut session.events, "START_WIFI_SCAN").await;
    assert_eq!(
        ssids(&second),
        vec![("home".to_string(), -45), ("office".to_string(), -70)]
    );
    wifi.stop_wifi_scan(false);
}

#[tokio::test(start_paused = true)]
async fn scan_times_out() {
    let mut session = Session::connected(FakeTransport::new()).await;
    let wifi = provisioner(&session, false);

    wifi.start_wifi_scan();
    let event = next_event(&mut session.events, "STOP_WIFI_SCAN").await;
    assert_eq!(event["errorCode"], 600);
    assert_eq!(event["id"], session.device.to_string());
    assert!(!wifi.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn failed_round_stops_the_scan() {
    let transport = FakeTransport::new();
    transport.push_wifi_round(Err(TransportError::Io("write failed".to_string())));
    let mut session = Session::connected(transport).await;
    let wifi = provisioner(&session, false);

    wifi.start_wifi_scan();
    let event = next_event(&mut session.events, "STOP_WIFI_SCAN").await;
    assert_eq!(event["errorCode"], 501);
    assert!(!wifi.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn round_failing_after_stop_is_not_reported() {
    let transport = FakeTransport::new();
    transport.push_wifi_round(Err(TransportError::Io("late failure".to_string())));
    let mut session = Session::connected(transport).await;
    let wifi = provisioner(&session, false);

    wifi.start_wifi_scan();
    tokio::time::sleep(Duration::from_millis(50)).await;
    wifi.stop_wifi_scan(true);
    let stop = next_event(&mut session.events, "STOP_WIFI_SCAN").await;
    assert!(stop.get("errorCode").is_none());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(drain(&mut session.events).is_empty());
    assert!(!wifi.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn configuration_reports_the_scan_stop_first() {
    let mut session = Session::connected(FakeTransport::new()).await;
    let wifi = provisioner(&session, false);
    drain(&mut session.events);

    wifi.send_wifi_configuration("home", "hunter22").await;
    let actions: Vec<_> = drain(&mut session.events)
        .iter()
        .map(|e| e["action"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(actions, vec!["STOP_WIFI_SCAN", "SEND_WIFI_CONFIGURATION"]);
}

#[tokio::test(start_paused = true)]
async fn configuration_success_stops_scan() {
    let mut session = Session::connected(FakeTransport::new()).await;
    let wifi = provisioner(&session, false);
    wifi.start_wifi_scan();
    assert!(wifi.is_scanning());

    wifi.send_wifi_configuration("home", "hunter22").await;
    let event = next_event(&mut session.events, "SEND_WIFI_CONFIGURATION").await;
    assert_eq!(event["connected"], true);
    assert!(event.get("errorCode").is_none());
    assert!(!wifi.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn device_failure_reason_is_mapped() {
    let transport = FakeTransport::new();
    transport.set_wifi_result(Err(WifiProvisionError::FailedFromDevice(
        ProvisionFailureReason::NetworkNotFound,
    )));
    let mut session = Session::connected(transport).await;
    let wifi = provisioner(&session, false);

    wifi.send_wifi_configuration("nowhere", "x").await;
    let event = next_event(&mut session.events, "SEND_WIFI_CONFIGURATION").await;
    assert_eq!(event["connected"], false);
    assert_eq!(event["errorCode"], 503);
}

#[tokio::test(start_paused = true)]
async fn configuration_requires_a_connection() {
    let mut session = Session::discovered(FakeTransport::new()).await;
    let wifi = provisioner(&session, false);

    wifi.send_wifi_configuration("home", "hunter22").await;
    let event = next_event(&mut session.events, "SEND_WIFI_CONFIGURATION").await;
    assert_eq!(event["connected"], false);
    assert_eq!(event["errorCode"], 300);
}

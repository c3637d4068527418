//! Wi-Fi network discovery and credential submission on a connected device

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value as JsonValue, json};

use crate::callback::with_error;
use crate::{
    AccessPoint, Action, CallbackChannel, DeviceConnection, ErrorCode, LoopDetector,
    ProvisionFailureReason, WifiProvisionError,
};

/// Canonical error for a failure reason reported by the device
pub fn map_provision_failure_reason(reason: ProvisionFailureReason) -> ErrorCode {
    match reason {
        ProvisionFailureReason::AuthFailed => ErrorCode::WifiAuthenticationError,
        ProvisionFailureReason::NetworkNotFound => ErrorCode::WifiNetworkNotFound,
        ProvisionFailureReason::DeviceDisconnected => ErrorCode::NotConnected,
        ProvisionFailureReason::Unknown => ErrorCode::GenericError,
    }
}

fn map_provision_error(e: WifiProvisionError) -> (ErrorCode, Option<String>) {
    match e {
        WifiProvisionError::ConfigFailed(m) => (ErrorCode::WifiConfigurationError, Some(m)),
        WifiProvisionError::FailedFromDevice(reason) => {
            (map_provision_failure_reason(reason), None)
        }
        WifiProvisionError::CreateSessionFailed(m)
        | WifiProvisionError::ConfigApplyFailed(m)
        | WifiProvisionError::ProvisioningFailed(m) => (ErrorCode::GenericError, Some(m)),
    }
}

struct WifiState {
    scanning: bool,
    scan_session: u64,
    networks: Vec<AccessPoint>,
    loop_detector: LoopDetector,
}

struct WifiInner {
    connection: DeviceConnection,
    callback: Option<CallbackChannel>,
    /// keep one entry per SSID instead of accumulating every round
    dedupe_networks: bool,
    state: Mutex<WifiState>,
}

#[derive(Clone)]
pub struct WifiProvisioner {
    inner: Arc<WifiInner>,
}

impl WifiProvisioner {
    pub fn new(
        connection: DeviceConnection,
        callback: Option<CallbackChannel>,
        search_timeout: Duration,
        search_max_iterations: u32,
        dedupe_networks: bool,
    ) -> Self {
        Self {
            inner: Arc::new(WifiInner {
                connection,
                callback,
                dedupe_networks,
                state: Mutex::new(WifiState {
                    scanning: false,
                    scan_session: 0,
                    networks: Vec::new(),
                    loop_detector: LoopDetector::new(search_timeout, search_max_iterations),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, WifiState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    /// Networks accumulated by the current scan
    pub fn networks(&self) -> Vec<AccessPoint> {
        self.state().networks.clone()
    }

    pub fn start_wifi_scan(&self) {
        if !self.inner.connection.is_connected() {
            self.send_wifi_scan_error(ErrorCode::NotConnected, None);
            return;
        }
        let session = {
            let mut state = self.state();
            state.scanning = true;
            state.scan_session += 1;
            state.networks.clear();
            state.loop_detector.reset();
            state.scan_session
        };
        log::info!("starting wifi scan");
        tokio::spawn(self.clone().wifi_scan(session));
    }

    pub fn stop_wifi_scan(&self, send_message: bool) {
        self.state().scanning = false;
        if send_message {
            self.send_message(Action::StopWifiScan, None);
        }
    }

    async fn wifi_scan(self, session: u64) {
        let transport = self.inner.connection.transport();
        loop {
            let tripped = {
                let mut state = self.state();
                if !state.scanning || state.scan_session != session {
                    return;
                }
                state.loop_detector.detect_loop()
            };
            if tripped {
                log::info!("wifi scan stopped, loop bound reached");
                self.stop_wifi_scan(false);
                self.send_wifi_scan_error(ErrorCode::TimeoutError, None);
                return;
            }

            match transport.scan_networks().await {
                Ok(found) => self.register_round(found, session),
                Err(e) => {
                    log::warn!("wifi scan failed: {e}");
                    {
                        let mut state = self.state();
                        if !state.scanning || state.scan_session != session {
                            return;
                        }
                        state.scanning = false;
                    }
                    self.send_wifi_scan_error(ErrorCode::WifiCommunicationError, Some(e.to_string()));
                    return;
                }
            }
        }
    }

    fn register_round(&self, found: Vec<AccessPoint>, session: u64) {
        let networks = {
            let mut state = self.state();
            if !state.scanning || state.scan_session != session {
                return;
            }
            for ap in found {
                if self.inner.dedupe_networks {
                    if let Some(known) = state.networks.iter_mut().find(|n| n.ssid == ap.ssid) {
                        known.rssi = ap.rssi;
                        continue;
                    }
                }
                state.networks.push(ap);
            }
            state.networks.clone()
        };

        let mut data = Map::new();
        data.insert("networks".to_string(), json!(networks));
        self.send_message(Action::StartWifiScan, Some(data));
    }

    /// Submit credentials and report the outcome under SEND_WIFI_CONFIGURATION
    pub async fn send_wifi_configuration(&self, ssid: &str, password: &str) {
        if !self.inner.connection.is_connected() {
            self.send_configuration_status(false, Some(ErrorCode::NotConnected), None);
            return;
        }
        self.stop_wifi_scan(true);

        log::info!("sending wifi configuration for {ssid:?}");
        let transport = self.inner.connection.transport();
        match transport.provision_wifi(ssid, password).await {
            Ok(()) => self.send_configuration_status(true, None, None),
            Err(e) => {
                log::warn!("wifi provisioning failed: {e}");
                let (code, message) = map_provision_error(e);
                self.send_configuration_status(false, Some(code), message);
            }
        }
    }

    fn send_configuration_status(
        &self,
        connected: bool,
        error: Option<ErrorCode>,
        message: Option<String>,
    ) {
        let mut data = Map::new();
        data.insert("connected".to_string(), json!(connected));
        self.send_message(Action::SendWifiConfiguration, Some(with_error(data, error, message)));
    }

    fn send_wifi_scan_error(&self, error: ErrorCode, message: Option<String>) {
        let id = self
            .inner
            .connection
            .device_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let mut data = Map::new();
        data.insert("id".to_string(), json!(id));
        self.send_message(Action::StopWifiScan, Some(with_error(data, Some(error), message)));
    }

    fn send_message(&self, action: Action, data: Option<Map<String, JsonValue>>) {
        if let Some(callback) = &self.inner.callback {
            callback.send_message(action, data);
        }
    }
}

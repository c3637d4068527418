//! BLE discovery of provisionable devices
//!
//! A scan runs as a background task issuing discovery rounds until it is
//! stopped or the loop detector trips. Devices are de-duplicated by name and
//! get a session-scoped id the host uses to pick one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value as JsonValue, json};
use uuid::Uuid;

use crate::callback::with_error;
use crate::{Action, CallbackChannel, DeviceTransport, ErrorCode, LoopDetector, ScannedDevice};

/// A device discovered during the current scan session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: Uuid,
    pub name: String,
    pub service_uuid: String,
    pub device: ScannedDevice,
}

impl DiscoveredDevice {
    fn new(device: ScannedDevice) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: device.name.clone(),
            service_uuid: device.service_uuid.clone(),
            device,
        }
    }

    /// What the host sees for this device
    pub fn info(&self) -> JsonValue {
        json!({ "id": self.id.to_string(), "name": self.name })
    }
}

struct RegistryState {
    enabled: bool,
    scanning: bool,
    /// Bumped on every start, a scan task only acts while it owns the current round
    scan_session: u64,
    devices: Vec<DiscoveredDevice>,
    devices_index: HashMap<Uuid, DiscoveredDevice>,
    loop_detector: LoopDetector,
}

struct RegistryInner {
    transport: Arc<dyn DeviceTransport>,
    callback: Option<CallbackChannel>,
    state: Mutex<RegistryState>,
}

/// Owns device discovery and the set of discovered devices
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        callback: Option<CallbackChannel>,
        search_timeout: Duration,
        search_max_iterations: u32,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                callback,
                state: Mutex::new(RegistryState {
                    enabled: false,
                    scanning: false,
                    scan_session: 0,
                    devices: Vec::new(),
                    devices_index: HashMap::new(),
                    loop_detector: LoopDetector::new(search_timeout, search_max_iterations),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn transport(&self) -> Arc<dyn DeviceTransport> {
        self.inner.transport.clone()
    }

    pub fn enable(&self) {
        self.state().enabled = true;
    }

    pub async fn disable(&self) {
        if self.is_scanning() {
            self.stop_devices_scan(true).await;
        }
        self.state().enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    /// Reset the device list and start discovery rounds in the background
    pub fn start_devices_scan(&self, prefix: Option<&str>) {
        let prefix = prefix.unwrap_or_default().to_string();
        let session = {
            let mut state = self.state();
            if !state.enabled {
                drop(state);
                log::warn!("device scan requested while provider is disabled");
                self.send_device_scan_error(
                    ErrorCode::BleCommunicationError,
                    Some("Bluetooth provider is not enabled".to_string()),
                );
                return;
            }
            state.scanning = true;
            state.scan_session += 1;
            state.devices.clear();
            state.devices_index.clear();
            state.loop_detector.reset();
            state.scan_session
        };
        log::info!("starting device scan, prefix {prefix:?}");
        tokio::spawn(self.clone().devices_scan(prefix, session));
    }

    pub async fn stop_devices_scan(&self, send_message: bool) {
        self.state().scanning = false;
        self.inner.transport.stop_scan().await;
        if send_message {
            self.send_message(Action::StopBleScan, None);
        }
    }

    pub fn get_device_with_id(&self, id: &Uuid) -> Option<DiscoveredDevice> {
        self.state().devices_index.get(id).cloned()
    }

    /// Devices discovered in the current scan session, in discovery order
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.state().devices.clone()
    }

    async fn devices_scan(self, prefix: String, session: u64) {
        loop {
            let tripped = {
                let mut state = self.state();
                if !state.scanning || state.scan_session != session {
                    return;
                }
                state.loop_detector.detect_loop()
            };
            if tripped {
                log::info!("device scan stopped, loop bound reached");
                self.stop_devices_scan(false).await;
                self.send_device_scan_error(ErrorCode::TimeoutError, None);
                return;
            }

            match self.inner.transport.scan(&prefix).await {
                Ok(found) => self.register_round(found, session),
                Err(e) => {
                    log::warn!("error during device scan: {e}");
                    {
                        let mut state = self.state();
                        // a stopped or restarted scan does not report this round
                        if !state.scanning || state.scan_session != session {
                            return;
                        }
                        state.scanning = false;
                    }
                    self.send_device_scan_error(ErrorCode::GenericError, Some(e.to_string()));
                    return;
                }
            }
        }
    }

    fn register_round(&self, found: Vec<ScannedDevice>, session: u64) {
        let devices = {
            let mut state = self.state();
            // stale round from a scan that was stopped meanwhile
            if !state.scanning || state.scan_session != session {
                return;
            }
            let mut changed = false;
            for device in found {
                if state.devices.iter().any(|d| d.name == device.name) {
                    continue;
                }
                let device = DiscoveredDevice::new(device);
                log::debug!("discovered {} ({})", device.name, device.id);
                state.devices_index.insert(device.id, device.clone());
                state.devices.push(device);
                changed = true;
            }
            if !changed || state.devices.is_empty() {
                return;
            }
            state.devices.iter().map(DiscoveredDevice::info).collect::<Vec<_>>()
        };

        let mut data = Map::new();
        data.insert("devices".to_string(), JsonValue::Array(devices));
        self.send_message(Action::StartBleScan, Some(data));
    }

    fn send_device_scan_error(&self, error: ErrorCode, message: Option<String>) {
        let data = with_error(Map::new(), Some(error), message);
        self.send_message(Action::StopBleScan, Some(data));
    }

    fn send_message(&self, action: Action, data: Option<Map<String, JsonValue>>) {
        if let Some(callback) = &self.inner.callback {
            callback.send_message(action, data);
        }
    }
}

//! btleplug device transport
//!
//! Discovers advertising ESP devices, connects to one and resolves its
//! provisioning endpoints by their GATT user description (`or-cfg`,
//! `proto-ver`, ...). Endpoint exchanges are a write followed by a read of
//! the same characteristic.
//!
//! Only unsecured (Security0) sessions are handled here. Secured sessions and
//! the Wi-Fi scan/config endpoints need the ESP protocomm protobuf layer and
//! are reported as unsupported.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use uuid::Uuid;

use espprov_core::{
    AccessPoint, ConnectionEvent, ConnectionEvents, DeviceTransport, ScannedDevice, SecurityType,
    SessionCredentials, TransportError, WifiProvisionError,
};
use espprov_proto::ble::{USER_DESCRIPTION_UUID, VERSION_ENDPOINT};

/// Payload written to `proto-ver` to get the version info back
const VERSION_QUERY: &[u8] = b"ESP";

fn parse_uuid(s: &str) -> Result<Uuid, TransportError> {
    Uuid::parse_str(s).map_err(|e| TransportError::Io(format!("invalid UUID {s}: {e}")))
}

fn io_error(e: btleplug::Error) -> TransportError {
    TransportError::Io(e.to_string())
}

/// Await `setup`, running `undo` before handing back its error
async fn undo_on_error<T>(
    setup: impl Future<Output = Result<T, TransportError>>,
    undo: impl Future<Output = ()>,
) -> Result<T, TransportError> {
    match setup.await {
        Ok(v) => Ok(v),
        Err(e) => {
            undo.await;
            Err(e)
        }
    }
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new()
        .await
        .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
    let adapters = manager
        .adapters()
        .await
        .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::AdapterUnavailable("No Bluetooth adapter found".to_string()))
}

struct Session {
    peripheral: Peripheral,
    endpoints: HashMap<String, Characteristic>,
    security: SecurityType,
    watcher: tokio::task::JoinHandle<()>,
}

pub struct BleTransport {
    adapter: Adapter,
    scan_duration: Duration,
    session: Arc<Mutex<Option<Session>>>,
}

impl BleTransport {
    /// Transport on the default adapter, each discovery round lasts `scan_duration`
    pub async fn new(scan_duration: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            adapter: get_adapter().await?,
            scan_duration,
            session: Arc::new(Mutex::new(None)),
        })
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, TransportError> {
        let peripherals = self.adapter.peripherals().await.map_err(io_error)?;
        peripherals
            .into_iter()
            .find(|p| p.address().to_string() == address)
            .ok_or_else(|| TransportError::UnknownDevice(address.to_string()))
    }

    /// Map endpoint names to characteristics by reading their user description
    async fn resolve_endpoints(
        peripheral: &Peripheral,
    ) -> Result<HashMap<String, Characteristic>, TransportError> {
        let user_description = parse_uuid(USER_DESCRIPTION_UUID)?;
        let mut endpoints = HashMap::new();
        for characteristic in peripheral.characteristics() {
            let Some(descriptor) = characteristic
                .descriptors
                .iter()
                .find(|d| d.uuid == user_description)
            else {
                continue;
            };
            let name = peripheral.read_descriptor(descriptor).await.map_err(io_error)?;
            let name = String::from_utf8_lossy(&name).trim_end_matches('\0').to_string();
            log::debug!("endpoint {name} -> {}", characteristic.uuid);
            endpoints.insert(name, characteristic);
        }
        Ok(endpoints)
    }

    /// Forward the adapter's disconnect notifications for `peripheral`
    async fn watch_disconnect(
        &self,
        peripheral: &Peripheral,
        events: ConnectionEvents,
    ) -> Result<tokio::task::JoinHandle<()>, TransportError> {
        let mut stream = self.adapter.events().await.map_err(io_error)?;
        let id = peripheral.id();
        let session = self.session.clone();
        Ok(tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        log::info!("device disconnected");
                        session.lock().unwrap_or_else(PoisonError::into_inner).take();
                        let _ = events.send(ConnectionEvent::Disconnected);
                        break;
                    }
                }
            }
        }))
    }

    /// Discover services, resolve endpoints and start the disconnect watcher
    async fn open_session(
        &self,
        peripheral: &Peripheral,
        events: ConnectionEvents,
    ) -> Result<(HashMap<String, Characteristic>, tokio::task::JoinHandle<()>), TransportError> {
        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let endpoints = Self::resolve_endpoints(peripheral).await?;
        let watcher = self.watch_disconnect(peripheral, events).await?;
        Ok((endpoints, watcher))
    }

    fn endpoint(&self, name: &str) -> Result<(Peripheral, Characteristic, SecurityType), TransportError> {
        let session = self.session();
        let session = session.as_ref().ok_or(TransportError::NotConnected)?;
        let characteristic = session
            .endpoints
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::EndpointNotFound(name.to_string()))?;
        Ok((session.peripheral.clone(), characteristic, session.security))
    }

    async fn exchange(&self, name: &str, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let (peripheral, characteristic, _) = self.endpoint(name)?;
        peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await
            .map_err(io_error)?;
        peripheral.read(&characteristic).await.map_err(io_error)
    }
}

#[async_trait::async_trait]
impl DeviceTransport for BleTransport {
    async fn scan(&self, prefix: &str) -> Result<Vec<ScannedDevice>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        tokio::time::sleep(self.scan_duration).await;

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        let mut devices = Vec::new();
        for peripheral in peripherals {
            let Some(props) = peripheral.properties().await.map_err(io_error)? else {
                continue;
            };
            let Some(name) = props.local_name else { continue };
            if !name.starts_with(prefix) {
                continue;
            }
            devices.push(ScannedDevice {
                name,
                address: peripheral.address().to_string(),
                service_uuid: props.services.first().map(Uuid::to_string).unwrap_or_default(),
            });
        }
        Ok(devices)
    }

    async fn stop_scan(&self) {
        if let Err(e) = self.adapter.stop_scan().await {
            log::warn!("failed to stop scan: {e}");
        }
    }

    async fn connect(
        &self,
        device: &ScannedDevice,
        credentials: SessionCredentials,
        events: ConnectionEvents,
    ) -> Result<(), TransportError> {
        let peripheral = self.find_peripheral(&device.address).await?;
        log::info!("connecting to {} ({})", device.name, device.address);
        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (endpoints, watcher) = undo_on_error(
            self.open_session(&peripheral, events.clone()),
            async {
                log::warn!("session setup with {} failed, disconnecting", device.name);
                if let Err(e) = peripheral.disconnect().await {
                    log::warn!("disconnect failed: {e}");
                }
            },
        )
        .await?;
        log::debug!(
            "session for {} as {:?}, {} endpoints",
            device.name,
            credentials.username,
            endpoints.len()
        );

        let previous = self.session().replace(Session {
            peripheral,
            endpoints,
            security: SecurityType::Security0,
            watcher,
        });
        if let Some(previous) = previous {
            previous.watcher.abort();
        }
        let _ = events.send(ConnectionEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        let peripheral = self.session().as_ref().map(|s| s.peripheral.clone());
        if let Some(peripheral) = peripheral {
            if let Err(e) = peripheral.disconnect().await {
                log::warn!("disconnect failed: {e}");
            }
        }
    }

    async fn version_info(&self) -> Option<String> {
        match self.exchange(VERSION_ENDPOINT, VERSION_QUERY).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).to_string()),
            Err(e) => {
                log::debug!("no version info: {e}");
                None
            }
        }
    }

    async fn set_security_type(&self, security: SecurityType) {
        if let Some(session) = self.session().as_mut() {
            session.security = security;
        }
    }

    async fn send_data(&self, endpoint: &str, data: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let (_, _, security) = self.endpoint(endpoint)?;
        if security != SecurityType::Security0 {
            return Err(TransportError::Unsupported(format!(
                "{security:?} sessions need the protocomm security layer"
            )));
        }
        self.exchange(endpoint, &data).await
    }

    async fn scan_networks(&self) -> Result<Vec<AccessPoint>, TransportError> {
        Err(TransportError::Unsupported(
            "wifi scan needs the protocomm wifi endpoints".to_string(),
        ))
    }

    async fn provision_wifi(&self, _ssid: &str, _password: &str) -> Result<(), WifiProvisionError> {
        Err(WifiProvisionError::ConfigFailed(
            "wifi config needs the protocomm wifi endpoints".to_string(),
        ))
    }
}

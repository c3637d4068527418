//! Device transport abstraction
//!
//! The radio side of provisioning lives outside this crate. A transport
//! discovers devices, opens a secured session to one of them and exchanges
//! raw bytes with named endpoints. `espprov-ble` implements it on top of
//! btleplug; tests use scripted fakes.

use serde::Serialize;
use tokio::sync::mpsc;

/// A device seen during one discovery round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    /// Advertised name, unique within a scan session
    pub name: String,
    /// Opaque transport handle (e.g. a peripheral id)
    pub address: String,
    /// First advertised service UUID, empty if none
    pub service_uuid: String,
}

/// Wi-Fi access point reported by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPoint {
    pub ssid: String,
    #[serde(rename = "signalStrength")]
    pub rssi: i32,
}

/// Session security scheme negotiated with the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityType {
    Security0,
    Security1,
    Security2,
}

/// Credentials used to establish the secured session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub proof_of_possession: String,
    pub username: String,
}

/// Connection lifecycle events published by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    ConnectionFailed(String),
}

/// Sender handed to the transport for the lifetime of a connection
pub type ConnectionEvents = mpsc::UnboundedSender<ConnectionEvent>;

/// Why the device gave up applying Wi-Fi credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionFailureReason {
    AuthFailed,
    NetworkNotFound,
    DeviceDisconnected,
    Unknown,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("not connected")]
    NotConnected,
    #[error("endpoint {0} not found")]
    EndpointNotFound(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Terminal failure of a Wi-Fi credential submission
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WifiProvisionError {
    #[error("session creation failed: {0}")]
    CreateSessionFailed(String),
    #[error("sending wifi config failed: {0}")]
    ConfigFailed(String),
    #[error("applying wifi config failed: {0}")]
    ConfigApplyFailed(String),
    #[error("device reported failure: {0:?}")]
    FailedFromDevice(ProvisionFailureReason),
    #[error("provisioning failed: {0}")]
    ProvisioningFailed(String),
}

#[async_trait::async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Run one bounded discovery round, returning devices whose name starts with `prefix`
    async fn scan(&self, prefix: &str) -> Result<Vec<ScannedDevice>, TransportError>;

    /// Cancel an in-flight discovery round
    async fn stop_scan(&self);

    /// Start connecting; the outcome arrives on `events`
    async fn connect(
        &self,
        device: &ScannedDevice,
        credentials: SessionCredentials,
        events: ConnectionEvents,
    ) -> Result<(), TransportError>;

    /// Request a disconnect; `Disconnected` arrives on the events channel
    async fn disconnect(&self);

    /// Version info JSON published by the connected device
    async fn version_info(&self) -> Option<String> {
        None
    }

    async fn set_security_type(&self, _security: SecurityType) {}

    /// Send bytes to a named endpoint and wait for the device's reply
    async fn send_data(&self, endpoint: &str, data: Vec<u8>) -> Result<Vec<u8>, TransportError>;

    /// Ask the device for one round of Wi-Fi scan results
    async fn scan_networks(&self) -> Result<Vec<AccessPoint>, TransportError>;

    /// Submit Wi-Fi credentials and wait for the device's verdict
    async fn provision_wifi(&self, ssid: &str, password: &str) -> Result<(), WifiProvisionError>;
}

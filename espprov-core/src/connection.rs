//! Connection to a single selected device
//!
//! Lifecycle transitions are driven only by [`ConnectionEvent`]s the transport
//! publishes on a channel created here; a pump task applies them and keeps the
//! config channel in step with the BLE state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use espprov_proto::DeviceInfo;
use serde_json::{Map, Value as JsonValue, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::callback::with_error;
use crate::{
    Action, BackendConnectionStatus, CallbackChannel, ChannelError, ConfigChannel,
    ConnectionEvent, DeviceRegistry, DeviceTransport, ErrorCode, ProviderError, SecurityType,
    SessionCredentials,
};

pub const DEFAULT_PROOF_OF_POSSESSION: &str = "abcd1234";
pub const DEFAULT_USERNAME: &str = "UNUSED";

/// BLE link state of the selected device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Status values reported under CONNECT_TO_DEVICE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Connected,
    Disconnected,
    ConnectionError,
}

impl ConnectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectStatus::Connected => "connected",
            ConnectStatus::Disconnected => "disconnected",
            ConnectStatus::ConnectionError => "connectionError",
        }
    }
}

/// Pick the session security from the device's version info JSON
///
/// `prov.sec_ver` 0, 1 and 2 map directly, other values mean Security2 and a
/// missing `sec_ver` means Security1. Returns `None` when the JSON carries no
/// `prov` object or cannot be parsed.
pub fn security_type_from_version_info(version_info: &str) -> Option<SecurityType> {
    let info: JsonValue = match serde_json::from_str(version_info) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("capabilities JSON not available: {e}");
            return None;
        }
    };
    let Some(prov) = info.get("prov").filter(|p| p.is_object()) else {
        log::error!("proto-ver info is not available");
        return None;
    };
    let security = match prov.get("sec_ver") {
        None => SecurityType::Security1,
        Some(v) => match v.as_i64() {
            Some(0) => SecurityType::Security0,
            Some(1) => SecurityType::Security1,
            _ => SecurityType::Security2,
        },
    };
    log::debug!("security version {security:?}");
    Some(security)
}

struct ConnectionState {
    status: DeviceConnectionState,
    device_id: Option<Uuid>,
    channel: Option<Arc<ConfigChannel>>,
}

struct ConnectionInner {
    registry: DeviceRegistry,
    transport: Arc<dyn DeviceTransport>,
    callback: Option<CallbackChannel>,
    state: Mutex<ConnectionState>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Connect/disconnect state machine and the config channel it owns
///
/// Must be created inside a tokio runtime: construction spawns the task that
/// applies transport events. The task ends once every handle is dropped.
#[derive(Clone)]
pub struct DeviceConnection {
    inner: Arc<ConnectionInner>,
}

impl DeviceConnection {
    pub fn new(registry: DeviceRegistry, callback: Option<CallbackChannel>) -> Self {
        let (events, mut rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ConnectionInner {
            transport: registry.transport(),
            registry,
            callback,
            state: Mutex::new(ConnectionState {
                status: DeviceConnectionState::Disconnected,
                device_id: None,
                channel: None,
            }),
            events,
        });

        let weak: Weak<ConnectionInner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                DeviceConnection { inner }.on_device_connection_event(event).await;
            }
        });

        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connection_state(&self) -> DeviceConnectionState {
        self.state().status
    }

    /// Session id of the device selected by the last `connect_to`
    pub fn device_id(&self) -> Option<Uuid> {
        self.state().device_id
    }

    pub fn is_connected(&self) -> bool {
        let state = self.state();
        state.status == DeviceConnectionState::Connected && state.channel.is_some()
    }

    pub(crate) fn transport(&self) -> Arc<dyn DeviceTransport> {
        self.inner.transport.clone()
    }

    /// Connect to a device found by the registry
    ///
    /// Unknown ids are ignored. The outcome is reported asynchronously as a
    /// CONNECT_TO_DEVICE event.
    pub async fn connect_to(
        &self,
        device_id: &Uuid,
        proof_of_possession: Option<&str>,
        username: Option<&str>,
    ) {
        if self.inner.registry.is_scanning() {
            self.inner.registry.stop_devices_scan(true).await;
        }

        let Some(device) = self.inner.registry.get_device_with_id(device_id) else {
            log::warn!("connect requested for unknown device {device_id}");
            return;
        };

        {
            let mut state = self.state();
            state.device_id = Some(*device_id);
            state.status = DeviceConnectionState::Connecting;
        }

        let credentials = SessionCredentials {
            proof_of_possession: proof_of_possession
                .unwrap_or(DEFAULT_PROOF_OF_POSSESSION)
                .to_string(),
            username: username.unwrap_or(DEFAULT_USERNAME).to_string(),
        };
        log::info!("connecting to {} ({})", device.name, device.id);
        if let Err(e) = self
            .inner
            .transport
            .connect(&device.device, credentials, self.inner.events.clone())
            .await
        {
            log::warn!("connect to {} failed: {e}", device.name);
            let _ = self.inner.events.send(ConnectionEvent::ConnectionFailed(e.to_string()));
        }
    }

    /// Ask the transport to disconnect; the state follows the Disconnected event
    pub async fn disconnect_from_device(&self) {
        self.inner.transport.disconnect().await;
    }

    fn channel(&self) -> Result<Arc<ConfigChannel>, ProviderError> {
        let state = self.state();
        match (&state.status, &state.channel) {
            (DeviceConnectionState::Connected, Some(channel)) => Ok(channel.clone()),
            _ => Err(ProviderError::not_connected()),
        }
    }

    pub async fn get_device_info(&self) -> Result<DeviceInfo, ProviderError> {
        let channel = self.channel()?;
        channel.get_device_info().await.map_err(communication_error)
    }

    pub async fn send_open_remote_config(
        &self,
        mqtt_broker_url: &str,
        mqtt_user: &str,
        mqtt_password: &str,
        asset_id: &str,
    ) -> Result<(), ProviderError> {
        let channel = self.channel()?;
        channel
            .send_open_remote_config(mqtt_broker_url, mqtt_user, mqtt_password, None, asset_id)
            .await
            .map_err(communication_error)
    }

    pub async fn get_backend_connection_status(
        &self,
    ) -> Result<BackendConnectionStatus, ProviderError> {
        let channel = self.channel()?;
        channel.get_backend_connection_status().await.map_err(communication_error)
    }

    pub async fn exit_provisioning(&self) -> Result<(), ProviderError> {
        let channel = self.channel()?;
        channel.exit_provisioning().await.map_err(communication_error)
    }

    async fn on_device_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                log::debug!("device connected event received");
                if let Some(info) = self.inner.transport.version_info().await {
                    if let Some(security) = security_type_from_version_info(&info) {
                        self.inner.transport.set_security_type(security).await;
                    }
                }
                {
                    let mut state = self.state();
                    state.status = DeviceConnectionState::Connected;
                    state.channel = Some(Arc::new(ConfigChannel::new(self.inner.transport.clone())));
                }
                self.send_connect_to_device_status(ConnectStatus::Connected, None, None);
            }
            ConnectionEvent::Disconnected => {
                {
                    let mut state = self.state();
                    state.status = DeviceConnectionState::Disconnected;
                    state.channel = None;
                }
                self.send_connect_to_device_status(ConnectStatus::Disconnected, None, None);
            }
            ConnectionEvent::ConnectionFailed(reason) => {
                {
                    let mut state = self.state();
                    state.status = DeviceConnectionState::Disconnected;
                    state.channel = None;
                }
                self.send_connect_to_device_status(
                    ConnectStatus::ConnectionError,
                    Some(ErrorCode::BleCommunicationError),
                    Some(reason),
                );
            }
        }
    }

    fn send_connect_to_device_status(
        &self,
        status: ConnectStatus,
        error: Option<ErrorCode>,
        message: Option<String>,
    ) {
        let Some(callback) = &self.inner.callback else { return };
        let id = self.device_id().map(|id| id.to_string()).unwrap_or_default();
        let mut data = Map::new();
        data.insert("id".to_string(), json!(id));
        data.insert("status".to_string(), json!(status.as_str()));
        callback.send_message(Action::ConnectToDevice, Some(with_error(data, error, message)));
    }
}

fn communication_error(e: ChannelError) -> ProviderError {
    ProviderError::new(ErrorCode::CommunicationError, e.to_string())
}

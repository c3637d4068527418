//! Request/response channel over the device's `or-cfg` endpoint

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use espprov_proto::ble::CONFIG_ENDPOINT;
use espprov_proto::{
    BACKEND_CONNECTED, BACKEND_CONNECTING, BACKEND_DISCONNECTED, BACKEND_FAILED,
    CONFIG_STATUS_SUCCESS, DeviceInfo, OpenRemoteConfig, Request, RequestBody, Response,
    ResponseBody, ResponseResult,
};

use crate::DeviceTransport;

pub const DEFAULT_REALM: &str = "master";

/// Backend connection state reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("message out of order")]
    MessageOutOfOrder,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("operation failed")]
    OperationFailure,
    #[error("another request is still outstanding")]
    RequestPending,
    #[error("channel error: {0}")]
    Generic(String),
}

/// Config channel bound to one connected device
///
/// At most one request is outstanding; a second send while one is in flight
/// is rejected with [`ChannelError::RequestPending`].
pub struct ConfigChannel {
    transport: Arc<dyn DeviceTransport>,
    message_id: AtomicU64,
    pending: Mutex<Option<String>>,
}

/// Clears the pending slot when the exchange ends, including on cancellation
struct PendingSlot<'a> {
    pending: &'a Mutex<Option<String>>,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl ConfigChannel {
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            transport,
            message_id: AtomicU64::new(0),
            pending: Mutex::new(None),
        }
    }

    fn next_id(&self) -> String {
        self.message_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    pub async fn get_device_info(&self) -> Result<DeviceInfo, ChannelError> {
        let response = self.send_request(RequestBody::DeviceInfo).await?;
        match response.body {
            ResponseBody::DeviceInfo(info) => Ok(info),
            _ => Err(ChannelError::InvalidResponse("Invalid response type".to_string())),
        }
    }

    pub async fn send_open_remote_config(
        &self,
        mqtt_broker_url: &str,
        mqtt_user: &str,
        mqtt_password: &str,
        realm: Option<&str>,
        asset_id: &str,
    ) -> Result<(), ChannelError> {
        let config = OpenRemoteConfig {
            mqtt_broker_url: mqtt_broker_url.to_string(),
            user: mqtt_user.to_string(),
            mqtt_password: mqtt_password.to_string(),
            asset_id: asset_id.to_string(),
            realm: realm.unwrap_or(DEFAULT_REALM).to_string(),
        };
        let response = self.send_request(RequestBody::OpenRemoteConfig(config)).await?;
        match response.body {
            ResponseBody::OpenRemoteConfig { status } if status == CONFIG_STATUS_SUCCESS => Ok(()),
            _ => Err(ChannelError::OperationFailure),
        }
    }

    pub async fn get_backend_connection_status(
        &self,
    ) -> Result<BackendConnectionStatus, ChannelError> {
        let response = self.send_request(RequestBody::BackendConnectionStatus).await?;
        let ResponseBody::BackendConnectionStatus { status } = response.body else {
            return Err(ChannelError::InvalidResponse("Invalid response type".to_string()));
        };
        match status {
            BACKEND_DISCONNECTED => Ok(BackendConnectionStatus::Disconnected),
            BACKEND_CONNECTING => Ok(BackendConnectionStatus::Connecting),
            BACKEND_CONNECTED => Ok(BackendConnectionStatus::Connected),
            BACKEND_FAILED => Ok(BackendConnectionStatus::Failed),
            _ => Err(ChannelError::InvalidResponse("Unrecognized status".to_string())),
        }
    }

    /// Tell the device provisioning is over; any acknowledged response will do
    pub async fn exit_provisioning(&self) -> Result<(), ChannelError> {
        self.send_request(RequestBody::ExitProvisioning).await.map(|_| ())
    }

    async fn send_request(&self, body: RequestBody) -> Result<Response, ChannelError> {
        let (request, _slot) = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.is_some() {
                return Err(ChannelError::RequestPending);
            }
            let request = Request::new(self.next_id(), body);
            *pending = Some(request.id.clone());
            (request, PendingSlot { pending: &self.pending })
        };

        let data = request
            .encode()
            .map_err(|e| ChannelError::InvalidRequest(e.to_string()))?;
        log::debug!("or-cfg request {} (0x{:04x})", request.id, request.msg_type());

        let reply = self
            .transport
            .send_data(CONFIG_ENDPOINT, data)
            .await
            .map_err(|e| ChannelError::Generic(e.to_string()))?;

        let response = Response::decode(&reply)
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;
        if response.id != request.id {
            log::warn!("or-cfg response id {} does not match request {}", response.id, request.id);
            return Err(ChannelError::MessageOutOfOrder);
        }
        if response.result != ResponseResult::Success {
            return Err(ChannelError::InvalidResponse(
                "Response result was not success".to_string(),
            ));
        }
        Ok(response)
    }
}

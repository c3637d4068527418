//! End-to-end onboarding of a connected device with the backend
//!
//! Fetches the device identity, registers it with the backend under the
//! caller's token, pushes the MQTT parameters over the config channel and
//! waits for the device to report a live backend connection.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{Map, json};
use tokio::time::Instant;

use crate::callback::with_error;
use crate::{
    Action, ApiError, BackendConnectionStatus, BatteryProvisionApi, CallbackChannel,
    DeviceConnection, ErrorCode, ProviderError,
};

pub const PASSWORD_LENGTH: usize = 16;
pub const MQTT_PORT: u16 = 8883;
pub const DEFAULT_BACKEND_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BACKEND_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome reported under PROVISION_DEVICE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionStatus {
    pub connected: bool,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl ProvisionStatus {
    pub fn connected() -> Self {
        Self {
            connected: true,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(code: ErrorCode, message: Option<String>) -> Self {
        Self {
            connected: false,
            error_code: Some(code),
            error_message: message,
        }
    }
}

impl From<ProviderError> for ProvisionStatus {
    fn from(e: ProviderError) -> Self {
        ProvisionStatus::failed(e.code, Some(e.message))
    }
}

impl From<ApiError> for ProvisionStatus {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Unauthorized => ProvisionStatus::failed(ErrorCode::SecurityError, None),
            ApiError::BusinessError => {
                ProvisionStatus::failed(ErrorCode::GenericError, Some(e.to_string()))
            }
            ApiError::UnknownError => ProvisionStatus::failed(ErrorCode::GenericError, None),
            ApiError::GenericError(m) => ProvisionStatus::failed(ErrorCode::GenericError, Some(m)),
            ApiError::CommunicationError(m) => {
                ProvisionStatus::failed(ErrorCode::CommunicationError, Some(m))
            }
        }
    }
}

/// Random credential for the device's MQTT account, `[A-Za-z0-9]{16}`
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Broker the device should use, on the same host as the API
pub fn mqtt_url(api_url: &hyper::Uri) -> String {
    format!("mqtts://{}:{MQTT_PORT}", api_url.host().unwrap_or("localhost"))
}

pub struct BatteryProvision {
    connection: DeviceConnection,
    callback: Option<CallbackChannel>,
    api: Arc<dyn BatteryProvisionApi>,
    api_url: hyper::Uri,
    backend_connection_timeout: Duration,
    poll_interval: Duration,
}

impl BatteryProvision {
    pub fn new(
        connection: DeviceConnection,
        callback: Option<CallbackChannel>,
        api: Arc<dyn BatteryProvisionApi>,
        api_url: hyper::Uri,
    ) -> Self {
        Self {
            connection,
            callback,
            api,
            api_url,
            backend_connection_timeout: DEFAULT_BACKEND_CONNECTION_TIMEOUT,
            poll_interval: DEFAULT_BACKEND_POLL_INTERVAL,
        }
    }

    pub fn with_backend_connection_timeout(mut self, timeout: Duration) -> Self {
        self.backend_connection_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run the whole sequence and report the outcome under PROVISION_DEVICE
    pub async fn provision(&self, user_token: &str) -> ProvisionStatus {
        let status = if self.connection.is_connected() {
            self.run(user_token).await
        } else {
            ProvisionStatus::from(ProviderError::not_connected())
        };
        if let Some(code) = status.error_code {
            log::warn!("provisioning failed: {code} {:?}", status.error_message);
        } else {
            log::info!("device provisioned");
        }
        self.send_provision_device_status(&status);
        status
    }

    async fn run(&self, user_token: &str) -> ProvisionStatus {
        let info = match self.connection.get_device_info().await {
            Ok(info) => info,
            Err(e) => return e.into(),
        };
        log::info!("provisioning {} ({})", info.device_id, info.model_name);

        let password = generate_password();
        let asset_id = match self.api.provision(&info.device_id, &password, user_token).await {
            Ok(asset_id) => asset_id,
            Err(e) => return e.into(),
        };
        log::debug!("backend asset {asset_id}");

        if let Err(e) = self
            .connection
            .send_open_remote_config(
                &mqtt_url(&self.api_url),
                &info.device_id.to_lowercase(),
                &password,
                &asset_id,
            )
            .await
        {
            return e.into();
        }

        self.wait_for_backend_connection().await
    }

    async fn wait_for_backend_connection(&self) -> ProvisionStatus {
        let start = Instant::now();
        loop {
            if start.elapsed() > self.backend_connection_timeout {
                return ProvisionStatus::failed(
                    ErrorCode::TimeoutError,
                    Some("Timeout waiting for backend to get connected".to_string()),
                );
            }
            match self.connection.get_backend_connection_status().await {
                Ok(BackendConnectionStatus::Connected) => return ProvisionStatus::connected(),
                Ok(status) => log::debug!("backend connection status {status:?}"),
                Err(e) => return e.into(),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn send_provision_device_status(&self, status: &ProvisionStatus) {
        let Some(callback) = &self.callback else { return };
        let mut data = Map::new();
        data.insert("connected".to_string(), json!(status.connected));
        let data = with_error(data, status.error_code, status.error_message.clone());
        callback.send_message(Action::ProvisionDevice, Some(data));
    }
}

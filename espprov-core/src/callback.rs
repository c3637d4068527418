//! Outbound events to the embedding host

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue, json};
use tokio::sync::mpsc;

use crate::ErrorCode;

pub const DEFAULT_PROVIDER: &str = "espprovision";

/// Action names tagged onto every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ProviderInit,
    ProviderEnable,
    ProviderDisable,
    StartBleScan,
    StopBleScan,
    ConnectToDevice,
    DisconnectFromDevice,
    StartWifiScan,
    StopWifiScan,
    SendWifiConfiguration,
    ProvisionDevice,
    ExitProvisioning,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ProviderInit => "PROVIDER_INIT",
            Action::ProviderEnable => "PROVIDER_ENABLE",
            Action::ProviderDisable => "PROVIDER_DISABLE",
            Action::StartBleScan => "START_BLE_SCAN",
            Action::StopBleScan => "STOP_BLE_SCAN",
            Action::ConnectToDevice => "CONNECT_TO_DEVICE",
            Action::DisconnectFromDevice => "DISCONNECT_FROM_DEVICE",
            Action::StartWifiScan => "START_WIFI_SCAN",
            Action::StopWifiScan => "STOP_WIFI_SCAN",
            Action::SendWifiConfiguration => "SEND_WIFI_CONFIGURATION",
            Action::ProvisionDevice => "PROVISION_DEVICE",
            Action::ExitProvisioning => "EXIT_PROVISIONING",
        }
    }
}

/// Implemented by the host to receive events
pub trait ProvisionCallback: Send + Sync {
    fn accept(&self, event: JsonValue);
}

impl ProvisionCallback for mpsc::UnboundedSender<JsonValue> {
    fn accept(&self, event: JsonValue) {
        // the host dropped its receiver, nobody is listening anymore
        let _ = self.send(event);
    }
}

/// Fan-out adapter tagging events with action and provider
#[derive(Clone)]
pub struct CallbackChannel {
    callback: Arc<dyn ProvisionCallback>,
    provider: String,
}

impl CallbackChannel {
    pub fn new(callback: Arc<dyn ProvisionCallback>, provider: impl Into<String>) -> Self {
        Self { callback, provider: provider.into() }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Build the event without delivering it
    pub fn event(&self, action: Action, data: Option<Map<String, JsonValue>>) -> JsonValue {
        let mut payload = Map::new();
        payload.insert("action".to_string(), json!(action.as_str()));
        payload.insert("provider".to_string(), json!(self.provider));
        if let Some(data) = data {
            payload.extend(data);
        }
        JsonValue::Object(payload)
    }

    pub fn send_message(&self, action: Action, data: Option<Map<String, JsonValue>>) {
        let event = self.event(action, data);
        log::debug!("event {event}");
        self.callback.accept(event);
    }
}

/// Insert `errorCode`/`errorMessage` when present
pub(crate) fn with_error(
    mut data: Map<String, JsonValue>,
    error: Option<ErrorCode>,
    message: Option<String>,
) -> Map<String, JsonValue> {
    if let Some(code) = error {
        data.insert("errorCode".to_string(), json!(code.code()));
    }
    if let Some(message) = message {
        data.insert("errorMessage".to_string(), json!(message));
    }
    data
}

//! Host-facing facade wiring registry, connection, Wi-Fi and onboarding

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue, json};
use uuid::Uuid;

use crate::callback::with_error;
use crate::{
    Action, BatteryProvision, BatteryProvisionApi, CallbackChannel, ConfigError,
    DeviceConnection, DeviceRegistry, DeviceTransport, ProviderConfig, ProvisionCallback,
    ProvisionStatus, RestBatteryProvisionApi, WifiProvisioner,
};

pub const PROVIDER_VERSION: &str = "beta";

/// Must be created inside a tokio runtime
pub struct EspProvisionProvider {
    config: ProviderConfig,
    callback: CallbackChannel,
    registry: DeviceRegistry,
    connection: DeviceConnection,
    wifi: WifiProvisioner,
    battery: BatteryProvision,
    disabled: AtomicBool,
}

impl EspProvisionProvider {
    pub fn new(
        config: ProviderConfig,
        transport: Arc<dyn DeviceTransport>,
        api: Arc<dyn BatteryProvisionApi>,
        callback: Arc<dyn ProvisionCallback>,
    ) -> Result<Self, ConfigError> {
        let api_url = config.api_uri()?;
        let callback = CallbackChannel::new(callback, config.provider.clone());
        let registry = DeviceRegistry::new(
            transport,
            Some(callback.clone()),
            config.device_search_timeout(),
            config.device_search_max_iterations,
        );
        let connection = DeviceConnection::new(registry.clone(), Some(callback.clone()));
        let wifi = WifiProvisioner::new(
            connection.clone(),
            Some(callback.clone()),
            config.wifi_search_timeout(),
            config.wifi_search_max_iterations,
            config.dedupe_wifi_networks,
        );
        let battery = BatteryProvision::new(connection.clone(), Some(callback.clone()), api, api_url)
            .with_backend_connection_timeout(config.backend_connection_timeout())
            .with_poll_interval(config.backend_poll_interval());

        Ok(Self {
            config,
            callback,
            registry,
            connection,
            wifi,
            battery,
            disabled: AtomicBool::new(false),
        })
    }

    /// Provider talking to the backend at `config.api_url`
    pub fn with_rest_api(
        config: ProviderConfig,
        transport: Arc<dyn DeviceTransport>,
        callback: Arc<dyn ProvisionCallback>,
    ) -> Result<Self, ConfigError> {
        let api_url = config.api_uri()?;
        let api = RestBatteryProvisionApi::new(&api_url, config.backend_request_timeout())
            .map_err(|_| ConfigError::InvalidUrl(config.api_url.clone()))?;
        Self::new(config, transport, Arc::new(api), callback)
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn connection(&self) -> &DeviceConnection {
        &self.connection
    }

    pub fn wifi(&self) -> &WifiProvisioner {
        &self.wifi
    }

    pub fn initialize(&self) -> JsonValue {
        let mut data = Map::new();
        data.insert("version".to_string(), json!(PROVIDER_VERSION));
        data.insert("requiresPermission".to_string(), json!(false));
        data.insert("hasPermission".to_string(), json!(true));
        data.insert("success".to_string(), json!(true));
        data.insert("enabled".to_string(), json!(false));
        data.insert("disabled".to_string(), json!(self.disabled.load(Ordering::SeqCst)));
        self.callback.event(Action::ProviderInit, Some(data))
    }

    pub fn enable(&self) {
        self.registry.enable();
        self.disabled.store(false, Ordering::SeqCst);
        let mut data = Map::new();
        data.insert("hasPermission".to_string(), json!(true));
        data.insert("success".to_string(), json!(true));
        data.insert("enabled".to_string(), json!(true));
        data.insert("disabled".to_string(), json!(false));
        self.callback.send_message(Action::ProviderEnable, Some(data));
    }

    pub async fn disable(&self) -> JsonValue {
        self.registry.disable().await;
        self.disabled.store(true, Ordering::SeqCst);
        self.callback.event(Action::ProviderDisable, None)
    }

    pub fn start_devices_scan(&self, prefix: Option<&str>) {
        self.registry.start_devices_scan(prefix);
    }

    pub async fn stop_devices_scan(&self) {
        self.registry.stop_devices_scan(true).await;
    }

    /// Connect using the configured credentials unless overridden
    pub async fn connect_to(
        &self,
        device_id: &Uuid,
        proof_of_possession: Option<&str>,
        username: Option<&str>,
    ) {
        let pop = proof_of_possession.unwrap_or(&self.config.proof_of_possession);
        let username = username.unwrap_or(&self.config.username);
        self.connection.connect_to(device_id, Some(pop), Some(username)).await;
    }

    pub async fn disconnect_from_device(&self) {
        self.wifi.stop_wifi_scan(true);
        self.connection.disconnect_from_device().await;
    }

    pub fn start_wifi_scan(&self) {
        self.wifi.start_wifi_scan();
    }

    pub fn stop_wifi_scan(&self) {
        self.wifi.stop_wifi_scan(true);
    }

    pub async fn send_wifi_configuration(&self, ssid: &str, password: &str) {
        self.wifi.send_wifi_configuration(ssid, password).await;
    }

    pub async fn provision_device(&self, user_token: &str) -> ProvisionStatus {
        self.battery.provision(user_token).await
    }

    pub async fn exit_provisioning(&self) {
        let mut data = Map::new();
        let data = match self.connection.exit_provisioning().await {
            Ok(()) => {
                data.insert("exit".to_string(), json!(true));
                data
            }
            Err(e) => {
                log::warn!("exit provisioning failed: {e}");
                data.insert("exit".to_string(), json!(false));
                with_error(data, Some(e.code), Some(e.message))
            }
        };
        self.callback.send_message(Action::ExitProvisioning, Some(data));
    }
}

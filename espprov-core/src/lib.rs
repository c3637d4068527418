//! ESP device provisioning core
//!
//! Discovers provisionable devices over a [`DeviceTransport`], connects to
//! one, configures its Wi-Fi and onboards it with the backend over the
//! `or-cfg` config channel. Every outcome is reported to the host as a JSON
//! event through a [`CallbackChannel`].

mod api;
mod battery;
mod callback;
mod channel;
mod config;
mod connection;
mod error;
mod loop_detector;
mod provider;
mod registry;
mod transport;
mod wifi;

pub use api::{ApiError, BatteryProvisionApi, RestBatteryProvisionApi};
pub use battery::{BatteryProvision, ProvisionStatus, generate_password, mqtt_url};
pub use callback::{Action, CallbackChannel, DEFAULT_PROVIDER, ProvisionCallback};
pub use channel::{BackendConnectionStatus, ChannelError, ConfigChannel, DEFAULT_REALM};
pub use config::{ConfigError, DEFAULT_API_URL, ProviderConfig};
pub use connection::{
    ConnectStatus, DEFAULT_PROOF_OF_POSSESSION, DEFAULT_USERNAME, DeviceConnection,
    DeviceConnectionState, security_type_from_version_info,
};
pub use error::{ErrorCode, ProviderError};
pub use loop_detector::LoopDetector;
pub use provider::{EspProvisionProvider, PROVIDER_VERSION};
pub use registry::{DeviceRegistry, DiscoveredDevice};
pub use transport::{
    AccessPoint, ConnectionEvent, ConnectionEvents, DeviceTransport, ProvisionFailureReason,
    ScannedDevice, SecurityType, SessionCredentials, TransportError, WifiProvisionError,
};
pub use wifi::{WifiProvisioner, map_provision_failure_reason};

pub use espprov_proto::DeviceInfo;
pub use serde_json::{Value as JsonValue, json};

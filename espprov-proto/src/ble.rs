//! BLE constants shared by the provisioning host and transports

/// Custom provisioning endpoint carrying the config channel
pub const CONFIG_ENDPOINT: &str = "or-cfg";

/// Endpoint the device answers with its version info JSON
pub const VERSION_ENDPOINT: &str = "proto-ver";

/// Endpoint used to establish the provisioning session
pub const SESSION_ENDPOINT: &str = "prov-session";

/// GATT "Characteristic User Description" descriptor, names an endpoint
pub const USER_DESCRIPTION_UUID: &str = "00002901-0000-1000-8000-00805f9b34fb";

/// Default advertised name prefix of provisionable devices
pub const DEVICE_NAME_PREFIX: &str = "PROV_";

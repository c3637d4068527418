//! Error taxonomy reported to the host

use std::fmt;

/// Canonical error categories, stable numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnknownDevice,
    BleCommunicationError,
    NotConnected,
    CommunicationError,
    SecurityError,
    WifiConfigurationError,
    WifiCommunicationError,
    WifiAuthenticationError,
    WifiNetworkNotFound,
    TimeoutError,
    GenericError,
}

impl ErrorCode {
    pub fn code(&self) -> u32 {
        match self {
            ErrorCode::UnknownDevice => 100,
            ErrorCode::BleCommunicationError => 200,
            ErrorCode::NotConnected => 300,
            ErrorCode::CommunicationError => 301,
            ErrorCode::SecurityError => 400,
            ErrorCode::WifiConfigurationError => 500,
            ErrorCode::WifiCommunicationError => 501,
            ErrorCode::WifiAuthenticationError => 502,
            ErrorCode::WifiNetworkNotFound => 503,
            ErrorCode::TimeoutError => 600,
            ErrorCode::GenericError => 10000,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            100 => ErrorCode::UnknownDevice,
            200 => ErrorCode::BleCommunicationError,
            300 => ErrorCode::NotConnected,
            301 => ErrorCode::CommunicationError,
            400 => ErrorCode::SecurityError,
            500 => ErrorCode::WifiConfigurationError,
            501 => ErrorCode::WifiCommunicationError,
            502 => ErrorCode::WifiAuthenticationError,
            503 => ErrorCode::WifiNetworkNotFound,
            600 => ErrorCode::TimeoutError,
            10000 => ErrorCode::GenericError,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::UnknownDevice => "UNKNOWN_DEVICE",
            ErrorCode::BleCommunicationError => "BLE_COMMUNICATION_ERROR",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::CommunicationError => "COMMUNICATION_ERROR",
            ErrorCode::SecurityError => "SECURITY_ERROR",
            ErrorCode::WifiConfigurationError => "WIFI_CONFIGURATION_ERROR",
            ErrorCode::WifiCommunicationError => "WIFI_COMMUNICATION_ERROR",
            ErrorCode::WifiAuthenticationError => "WIFI_AUTHENTICATION_ERROR",
            ErrorCode::WifiNetworkNotFound => "WIFI_NETWORK_NOT_FOUND",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::GenericError => "GENERIC_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Failure of a provider operation, already mapped onto the taxonomy
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn not_connected() -> Self {
        Self::new(ErrorCode::NotConnected, "No connection established to device")
    }
}

//! ESP provisioning over BLE
//!
//! [`BleTransport`] implements [`espprov_core::DeviceTransport`] on top of
//! btleplug for desktop hosts.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = espprov_ble::BleTransport::new(Duration::from_secs(3)).await?;
//!     let (tx, mut events) = tokio::sync::mpsc::unbounded_channel::<espprov_core::JsonValue>();
//!     let provider = espprov_core::EspProvisionProvider::with_rest_api(
//!         Default::default(),
//!         Arc::new(transport),
//!         Arc::new(tx),
//!     )?;
//!     provider.enable();
//!     provider.start_devices_scan(Some("PROV_"));
//!     while let Some(event) = events.recv().await {
//!         println!("{event}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod ble;

pub use ble::BleTransport;

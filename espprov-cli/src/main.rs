//! Provision ESP devices over BLE from the command line
//!
//! Every event the provider reports is printed as one JSON line on stdout.
//! Configuration is read from `$ESPPROV_HOME/config.json` (default
//! `~/.espprov`), written with defaults on first run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use espprov_ble::BleTransport;
use espprov_core::{EspProvisionProvider, JsonValue, ProviderConfig};
use espprov_proto::ble::DEVICE_NAME_PREFIX;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser)]
#[command(name = "espprov")]
#[command(about = "BLE provisioning tool for ESP devices")]
struct Cli {
    /// Backend API url, overrides the config file
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Duration of one BLE discovery round in seconds
    #[arg(long, global = true, default_value = "3")]
    round: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for provisionable devices
    Scan {
        /// Advertised name prefix
        #[arg(short, long, default_value = DEVICE_NAME_PREFIX)]
        prefix: String,
    },
    /// Connect to a device and onboard it with the backend
    Provision {
        /// Advertised device name, the first one found if omitted
        #[arg(short, long)]
        device: Option<String>,
        /// Bearer token for the backend
        #[arg(short, long)]
        token: String,
        /// Wi-Fi network to configure first
        #[arg(long)]
        ssid: Option<String>,
        /// Wi-Fi password
        #[arg(long, default_value = "")]
        password: String,
        /// Proof of possession, overrides the config file
        #[arg(long)]
        pop: Option<String>,
    },
    /// Tell a device to leave provisioning mode
    Exit {
        /// Advertised device name, the first one found if omitted
        #[arg(short, long)]
        device: Option<String>,
    },
}

fn espprov_home() -> Result<PathBuf, Box<dyn std::error::Error>> {
    match std::env::var("ESPPROV_HOME") {
        Ok(home) => Ok(PathBuf::from(home)),
        Err(_) => Ok(dirs::home_dir().ok_or("no home directory")?.join(".espprov")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = ProviderConfig::load(&espprov_home()?.join("config.json"))?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }

    let transport = BleTransport::new(Duration::from_secs(cli.round)).await?;
    let (tx, mut events) = tokio::sync::mpsc::unbounded_channel::<JsonValue>();
    let provider = EspProvisionProvider::with_rest_api(config, Arc::new(transport), Arc::new(tx))?;
    println!("{}", provider.initialize());
    provider.enable();

    match cli.command {
        Commands::Scan { prefix } => {
            provider.start_devices_scan(Some(&prefix));
            wait_for(&mut events, "STOP_BLE_SCAN", |_| true).await;
        }
        Commands::Provision {
            device,
            token,
            ssid,
            password,
            pop,
        } => {
            connect(&provider, &mut events, device.as_deref(), pop.as_deref()).await?;
            if let Some(ssid) = ssid {
                provider.send_wifi_configuration(&ssid, &password).await;
                let event = wait_for(&mut events, "SEND_WIFI_CONFIGURATION", |_| true).await;
                if event["connected"] != true {
                    provider.disconnect_from_device().await;
                    return Err("wifi configuration failed".into());
                }
            }
            let status = provider.provision_device(&token).await;
            wait_for(&mut events, "PROVISION_DEVICE", |_| true).await;
            provider.disconnect_from_device().await;
            if !status.connected {
                return Err(format!("provisioning failed: {:?}", status.error_code).into());
            }
        }
        Commands::Exit { device } => {
            connect(&provider, &mut events, device.as_deref(), None).await?;
            provider.exit_provisioning().await;
            wait_for(&mut events, "EXIT_PROVISIONING", |_| true).await;
            provider.disconnect_from_device().await;
        }
    }

    Ok(())
}

/// Scan until `name` (or any device) shows up and connect to it
async fn connect(
    provider: &EspProvisionProvider,
    events: &mut UnboundedReceiver<JsonValue>,
    name: Option<&str>,
    pop: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    provider.start_devices_scan(Some(DEVICE_NAME_PREFIX));
    let event = wait_for(events, "START_BLE_SCAN", |e| find_device(e, name).is_some()).await;
    let event = match event["action"].as_str() {
        Some("START_BLE_SCAN") => event,
        _ => return Err("device not found".into()),
    };
    let id: uuid::Uuid = find_device(&event, name).ok_or("device not found")?.parse()?;

    provider.connect_to(&id, pop, None).await;
    let event = wait_for(events, "CONNECT_TO_DEVICE", |_| true).await;
    if event["status"] != "connected" {
        return Err(format!("connection failed: {}", event["status"]).into());
    }
    Ok(())
}

fn find_device(event: &JsonValue, name: Option<&str>) -> Option<String> {
    event["devices"]
        .as_array()?
        .iter()
        .find(|d| name.is_none_or(|n| d["name"] == n))
        .and_then(|d| d["id"].as_str())
        .map(str::to_string)
}

/// Print events until one for `action` satisfies `done`
///
/// A STOP_BLE_SCAN carrying an error also ends the wait so callers waiting for
/// discovery do not hang once the scan gave up.
async fn wait_for(
    events: &mut UnboundedReceiver<JsonValue>,
    action: &str,
    done: impl Fn(&JsonValue) -> bool,
) -> JsonValue {
    while let Some(event) = events.recv().await {
        println!("{event}");
        if event["action"] == action && done(&event) {
            return event;
        }
        if event["action"] == "STOP_BLE_SCAN" && event.get("errorCode").is_some() {
            return event;
        }
    }
    JsonValue::Null
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use espprov_core::{
    AccessPoint, ApiError, BatteryProvisionApi, CallbackChannel, ConnectionEvent,
    ConnectionEvents, DEFAULT_PROVIDER, DeviceConnection, DeviceRegistry, DeviceTransport,
    JsonValue, ScannedDevice, SecurityType, SessionCredentials, TransportError,
    WifiProvisionError,
};
use espprov_proto::{
    BACKEND_CONNECTED, BACKEND_CONNECTING, CONFIG_STATUS_SUCCESS, DeviceInfo, Request,
    RequestBody, Response, ResponseBody,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

pub const ROUND: Duration = Duration::from_millis(100);

pub fn device(name: &str) -> ScannedDevice {
    ScannedDevice {
        name: name.to_string(),
        address: format!("addr-{name}"),
        service_uuid: "021a9004-0382-4aea-bff4-6b3f1c5adfb4".to_string(),
    }
}

pub fn ap(ssid: &str, rssi: i32) -> AccessPoint {
    AccessPoint {
        ssid: ssid.to_string(),
        rssi,
    }
}

#[derive(Default)]
struct FakeState {
    scan_rounds: VecDeque<Result<Vec<ScannedDevice>, TransportError>>,
    wifi_rounds: VecDeque<Result<Vec<AccessPoint>, TransportError>>,
    wifi_result: Option<Result<(), WifiProvisionError>>,
    connect_error: Option<TransportError>,
    refuse_session: Option<String>,
    events: Option<ConnectionEvents>,
    credentials: Vec<SessionCredentials>,
    security: Vec<SecurityType>,
    version_info: Option<String>,
    requests: Vec<RequestBody>,
    config_received_at: Option<Instant>,
    backend_connected_after: Option<Duration>,
    stop_scan_calls: usize,
}

/// Scripted device transport simulating one ESP device
///
/// Scan rounds and Wi-Fi rounds are served from queues, an empty queue
/// yields an empty round. The config endpoint answers like the firmware
/// does, reporting Connecting until `backend_connected_after` has passed
/// since the OpenRemoteConfig request.
pub struct FakeTransport {
    state: Mutex<FakeState>,
    send_calls: AtomicUsize,
    device_id: String,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                version_info: Some(r#"{"prov":{"ver":"v1.1","sec_ver":0}}"#.to_string()),
                ..Default::default()
            }),
            send_calls: AtomicUsize::new(0),
            device_id: "A0B1C2D3E4F5".to_string(),
        })
    }

    pub fn push_scan_round(&self, round: Result<Vec<ScannedDevice>, TransportError>) {
        self.state.lock().unwrap().scan_rounds.push_back(round);
    }

    pub fn push_wifi_round(&self, round: Result<Vec<AccessPoint>, TransportError>) {
        self.state.lock().unwrap().wifi_rounds.push_back(round);
    }

    pub fn set_wifi_result(&self, result: Result<(), WifiProvisionError>) {
        self.state.lock().unwrap().wifi_result = Some(result);
    }

    pub fn fail_connect(&self, error: TransportError) {
        self.state.lock().unwrap().connect_error = Some(error);
    }

    /// Accept the connect call but report a failed session asynchronously
    pub fn refuse_session(&self, reason: &str) {
        self.state.lock().unwrap().refuse_session = Some(reason.to_string());
    }

    pub fn backend_connected_after(&self, after: Option<Duration>) {
        self.state.lock().unwrap().backend_connected_after = after;
    }

    /// Simulate the device dropping the link
    pub fn drop_link(&self) {
        if let Some(events) = &self.state.lock().unwrap().events {
            let _ = events.send(ConnectionEvent::Disconnected);
        }
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn stop_scan_calls(&self) -> usize {
        self.state.lock().unwrap().stop_scan_calls
    }

    pub fn credentials(&self) -> Vec<SessionCredentials> {
        self.state.lock().unwrap().credentials.clone()
    }

    pub fn security(&self) -> Vec<SecurityType> {
        self.state.lock().unwrap().security.clone()
    }

    pub fn requests(&self) -> Vec<RequestBody> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn respond(&self, request: Request) -> Response {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.body.clone());
        let body = match request.body {
            RequestBody::DeviceInfo => ResponseBody::DeviceInfo(DeviceInfo {
                device_id: self.device_id.clone(),
                model_name: "battery-v2".to_string(),
            }),
            RequestBody::OpenRemoteConfig(_) => {
                state.config_received_at = Some(Instant::now());
                ResponseBody::OpenRemoteConfig {
                    status: CONFIG_STATUS_SUCCESS,
                }
            }
            RequestBody::BackendConnectionStatus => {
                let connected = match (state.config_received_at, state.backend_connected_after) {
                    (Some(at), Some(after)) => at.elapsed() >= after,
                    _ => false,
                };
                ResponseBody::BackendConnectionStatus {
                    status: if connected {
                        BACKEND_CONNECTED
                    } else {
                        BACKEND_CONNECTING
                    },
                }
            }
            RequestBody::ExitProvisioning => ResponseBody::Ack,
        };
        Response::success(request.id, body)
    }
}

#[async_trait::async_trait]
impl DeviceTransport for FakeTransport {
    async fn scan(&self, _prefix: &str) -> Result<Vec<ScannedDevice>, TransportError> {
        tokio::time::sleep(ROUND).await;
        let round = self.state.lock().unwrap().scan_rounds.pop_front();
        round.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn stop_scan(&self) {
        self.state.lock().unwrap().stop_scan_calls += 1;
    }

    async fn connect(
        &self,
        _device: &ScannedDevice,
        credentials: SessionCredentials,
        events: ConnectionEvents,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.connect_error.clone() {
            return Err(e);
        }
        state.credentials.push(credentials);
        let event = match &state.refuse_session {
            Some(reason) => ConnectionEvent::ConnectionFailed(reason.clone()),
            None => ConnectionEvent::Connected,
        };
        let _ = events.send(event);
        state.events = Some(events);
        Ok(())
    }

    async fn disconnect(&self) {
        self.drop_link();
    }

    async fn version_info(&self) -> Option<String> {
        self.state.lock().unwrap().version_info.clone()
    }

    async fn set_security_type(&self, security: SecurityType) {
        self.state.lock().unwrap().security.push(security);
    }

    async fn send_data(&self, endpoint: &str, data: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if endpoint != "or-cfg" {
            return Err(TransportError::EndpointNotFound(endpoint.to_string()));
        }
        let request = Request::decode(&data).map_err(|e| TransportError::Io(e.to_string()))?;
        self.respond(request)
            .encode()
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn scan_networks(&self) -> Result<Vec<AccessPoint>, TransportError> {
        tokio::time::sleep(ROUND).await;
        let round = self.state.lock().unwrap().wifi_rounds.pop_front();
        round.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn provision_wifi(&self, _ssid: &str, _password: &str) -> Result<(), WifiProvisionError> {
        self.state.lock().unwrap().wifi_result.clone().unwrap_or(Ok(()))
    }
}

/// Backend stand-in returning a fixed result
pub struct FakeApi {
    result: Result<String, ApiError>,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl FakeApi {
    pub fn new(result: Result<String, ApiError>) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// `(device_id, password, token)` of every call
    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl BatteryProvisionApi for FakeApi {
    async fn provision(
        &self,
        device_id: &str,
        password: &str,
        token: &str,
    ) -> Result<String, ApiError> {
        self.calls.lock().unwrap().push((
            device_id.to_string(),
            password.to_string(),
            token.to_string(),
        ));
        self.result.clone()
    }
}

pub type Events = mpsc::UnboundedReceiver<JsonValue>;

pub fn callback() -> (Arc<mpsc::UnboundedSender<JsonValue>>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

/// Next event carrying `action`, skipping others
pub async fn next_event(events: &mut Events, action: &str) -> JsonValue {
    let wait = async {
        loop {
            let event = events.recv().await.expect("callback channel closed");
            if event["action"] == action {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .unwrap_or_else(|_| panic!("no {action} event"))
}

/// Drain whatever has been delivered so far
pub fn drain(events: &mut Events) -> Vec<JsonValue> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Registry and connection sharing one callback, with `PROV_A` discovered
pub struct Session {
    pub transport: Arc<FakeTransport>,
    pub callback: CallbackChannel,
    pub registry: DeviceRegistry,
    pub connection: DeviceConnection,
    pub device: Uuid,
    pub events: Events,
}

impl Session {
    pub async fn discovered(transport: Arc<FakeTransport>) -> Self {
        let (tx, mut events) = callback();
        let callback = CallbackChannel::new(tx, DEFAULT_PROVIDER);
        let registry = DeviceRegistry::new(
            transport.clone(),
            Some(callback.clone()),
            Duration::from_secs(120),
            25,
        );
        let connection = DeviceConnection::new(registry.clone(), Some(callback.clone()));

        transport.push_scan_round(Ok(vec![device("PROV_A")]));
        registry.enable();
        registry.start_devices_scan(Some("PROV_"));
        next_event(&mut events, "START_BLE_SCAN").await;
        let device = registry.devices()[0].id;

        Self {
            transport,
            callback,
            registry,
            connection,
            device,
            events,
        }
    }

    pub async fn connected(transport: Arc<FakeTransport>) -> Self {
        let mut session = Self::discovered(transport).await;
        session.connection.connect_to(&session.device, None, None).await;
        let event = next_event(&mut session.events, "CONNECT_TO_DEVICE").await;
        assert_eq!(event["status"], "connected");
        session
    }
}

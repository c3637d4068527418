//! Config channel wire protocol - message types and framing
//!
//! Requests and responses exchanged with a connected device over the
//! `or-cfg` custom endpoint. Every message travels as one [`Frame`]:
//!
//! ```text
//! msg_type: u16 BE | len: u32 BE | payload[len]
//! ```
//!
//! Strings inside a payload are `u16 BE length + UTF-8 bytes`.

use std::io::{self, Read, Write};

pub mod ble;

// Request message types
pub const MSG_DEVICE_INFO: u16 = 0x0001;
pub const MSG_OPEN_REMOTE_CONFIG: u16 = 0x0002;
pub const MSG_BACKEND_CONNECTION_STATUS: u16 = 0x0003;
pub const MSG_EXIT_PROVISIONING: u16 = 0x0004;

// Response message types
pub const MSG_ACK: u16 = 0x8000;
pub const MSG_DEVICE_INFO_RESPONSE: u16 = 0x8001;
pub const MSG_OPEN_REMOTE_CONFIG_RESPONSE: u16 = 0x8002;
pub const MSG_BACKEND_CONNECTION_STATUS_RESPONSE: u16 = 0x8003;

// Response result codes
pub const RESULT_SUCCESS: u8 = 0;
pub const RESULT_FAILURE: u8 = 1;

// OpenRemoteConfig response status
pub const CONFIG_STATUS_SUCCESS: u8 = 0;
pub const CONFIG_STATUS_FAIL: u8 = 1;

// BackendConnectionStatus response status
pub const BACKEND_DISCONNECTED: u8 = 0;
pub const BACKEND_CONNECTING: u8 = 1;
pub const BACKEND_CONNECTED: u8 = 2;
pub const BACKEND_FAILED: u8 = 3;

/// Largest payload accepted in a single frame
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string field too long"))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Sequential reader over a message payload
struct PayloadReader<'a> {
    data: &'a [u8],
    what: &'static str,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, what }
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(invalid_data(format!("{} truncated", self.what)));
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn str(&mut self) -> io::Result<String> {
        let len = self.take(2)?;
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| invalid_data(format!("{} contains invalid UTF-8", self.what)))
    }

    fn finish(self) -> io::Result<()> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(invalid_data(format!("{} has trailing bytes", self.what)))
        }
    }
}

/// MQTT connection parameters pushed to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRemoteConfig {
    pub mqtt_broker_url: String,
    pub user: String,
    pub mqtt_password: String,
    pub asset_id: String,
    pub realm: String,
}

/// Request variants understood by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    DeviceInfo,
    OpenRemoteConfig(OpenRemoteConfig),
    BackendConnectionStatus,
    ExitProvisioning,
}

/// Config channel request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: String,
    pub body: RequestBody,
}

impl Request {
    pub fn new(id: impl Into<String>, body: RequestBody) -> Self {
        Self { id: id.into(), body }
    }

    pub fn msg_type(&self) -> u16 {
        match self.body {
            RequestBody::DeviceInfo => MSG_DEVICE_INFO,
            RequestBody::OpenRemoteConfig(_) => MSG_OPEN_REMOTE_CONFIG,
            RequestBody::BackendConnectionStatus => MSG_BACKEND_CONNECTION_STATUS,
            RequestBody::ExitProvisioning => MSG_EXIT_PROVISIONING,
        }
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(2 + self.id.len());
        put_str(&mut buf, &self.id)?;
        if let RequestBody::OpenRemoteConfig(config) = &self.body {
            put_str(&mut buf, &config.mqtt_broker_url)?;
            put_str(&mut buf, &config.user)?;
            put_str(&mut buf, &config.mqtt_password)?;
            put_str(&mut buf, &config.asset_id)?;
            put_str(&mut buf, &config.realm)?;
        }
        Ok(buf)
    }

    pub fn from_bytes(msg_type: u16, data: &[u8]) -> io::Result<Self> {
        let mut reader = PayloadReader::new(data, "request");
        let id = reader.str()?;
        let body = match msg_type {
            MSG_DEVICE_INFO => RequestBody::DeviceInfo,
            MSG_OPEN_REMOTE_CONFIG => RequestBody::OpenRemoteConfig(OpenRemoteConfig {
                mqtt_broker_url: reader.str()?,
                user: reader.str()?,
                mqtt_password: reader.str()?,
                asset_id: reader.str()?,
                realm: reader.str()?,
            }),
            MSG_BACKEND_CONNECTION_STATUS => RequestBody::BackendConnectionStatus,
            MSG_EXIT_PROVISIONING => RequestBody::ExitProvisioning,
            other => return Err(invalid_data(format!("unknown request type 0x{other:04x}"))),
        };
        reader.finish()?;
        Ok(Self { id, body })
    }

    /// Serialize into a complete frame, ready for the endpoint
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        Frame::new(self.msg_type(), self.to_bytes()?).to_bytes()
    }

    pub fn decode(data: &[u8]) -> io::Result<Self> {
        let frame = Frame::from_bytes(data)?;
        Self::from_bytes(frame.msg_type, &frame.payload)
    }
}

/// Outcome the device attaches to every response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseResult {
    Success,
    Failure,
}

impl ResponseResult {
    pub fn from_byte(b: u8) -> Self {
        if b == RESULT_SUCCESS {
            Self::Success
        } else {
            Self::Failure
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Success => RESULT_SUCCESS,
            Self::Failure => RESULT_FAILURE,
        }
    }
}

/// Device identity reported by the DeviceInfo response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub model_name: String,
}

/// Response variants sent back by the device
///
/// Status fields are kept as raw bytes; mapping them onto typed values (and
/// rejecting unknown ones) is the caller's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Ack,
    DeviceInfo(DeviceInfo),
    OpenRemoteConfig { status: u8 },
    BackendConnectionStatus { status: u8 },
}

/// Config channel response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: String,
    pub result: ResponseResult,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(id: impl Into<String>, result: ResponseResult, body: ResponseBody) -> Self {
        Self { id: id.into(), result, body }
    }

    pub fn success(id: impl Into<String>, body: ResponseBody) -> Self {
        Self::new(id, ResponseResult::Success, body)
    }

    pub fn msg_type(&self) -> u16 {
        match self.body {
            ResponseBody::Ack => MSG_ACK,
            ResponseBody::DeviceInfo(_) => MSG_DEVICE_INFO_RESPONSE,
            ResponseBody::OpenRemoteConfig { .. } => MSG_OPEN_REMOTE_CONFIG_RESPONSE,
            ResponseBody::BackendConnectionStatus { .. } => MSG_BACKEND_CONNECTION_STATUS_RESPONSE,
        }
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(3 + self.id.len());
        put_str(&mut buf, &self.id)?;
        buf.push(self.result.as_byte());
        match &self.body {
            ResponseBody::Ack => {}
            ResponseBody::DeviceInfo(info) => {
                put_str(&mut buf, &info.device_id)?;
                put_str(&mut buf, &info.model_name)?;
            }
            ResponseBody::OpenRemoteConfig { status }
            | ResponseBody::BackendConnectionStatus { status } => buf.push(*status),
        }
        Ok(buf)
    }

    pub fn from_bytes(msg_type: u16, data: &[u8]) -> io::Result<Self> {
        let mut reader = PayloadReader::new(data, "response");
        let id = reader.str()?;
        let result = ResponseResult::from_byte(reader.u8()?);
        let body = match msg_type {
            MSG_ACK => ResponseBody::Ack,
            MSG_DEVICE_INFO_RESPONSE => ResponseBody::DeviceInfo(DeviceInfo {
                device_id: reader.str()?,
                model_name: reader.str()?,
            }),
            MSG_OPEN_REMOTE_CONFIG_RESPONSE => ResponseBody::OpenRemoteConfig { status: reader.u8()? },
            MSG_BACKEND_CONNECTION_STATUS_RESPONSE => {
                ResponseBody::BackendConnectionStatus { status: reader.u8()? }
            }
            other => return Err(invalid_data(format!("unknown response type 0x{other:04x}"))),
        };
        reader.finish()?;
        Ok(Self { id, result, body })
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        Frame::new(self.msg_type(), self.to_bytes()?).to_bytes()
    }

    pub fn decode(data: &[u8]) -> io::Result<Self> {
        let frame = Frame::from_bytes(data)?;
        Self::from_bytes(frame.msg_type, &frame.payload)
    }
}

/// Frame: wraps any message with type and length
#[derive(Debug, Clone)]
pub struct Frame {
    pub msg_type: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: u16, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    /// Write frame to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        if self.payload.len() > MAX_FRAME_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large"));
        }
        let len = self.payload.len() as u32;
        writer.write_all(&self.msg_type.to_be_bytes())?;
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(&self.payload)?;
        Ok(())
    }

    /// Read frame from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut header = [0u8; 6];
        reader.read_exact(&mut header)?;

        let msg_type = u16::from_be_bytes([header[0], header[1]]);
        let len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(invalid_data("frame too large"));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;

        Ok(Self { msg_type, payload })
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(6 + self.payload.len());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Parse exactly one frame; short input or trailing bytes are errors
    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        let mut reader = data;
        let frame = Self::read_from(&mut reader).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => invalid_data("frame truncated"),
            _ => e,
        })?;
        if !reader.is_empty() {
            return Err(invalid_data("trailing bytes after frame"));
        }
        Ok(frame)
    }
}

//! Backend asset registration

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("communication error: {0}")]
    CommunicationError(String),
    #[error("Business logic error")]
    BusinessError,
    #[error("{0}")]
    GenericError(String),
    #[error("unknown error")]
    UnknownError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatteryRequest<'a> {
    device_id: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatteryResponse {
    asset_id: String,
}

/// Registers a device with the backend and returns its asset id
#[async_trait::async_trait]
pub trait BatteryProvisionApi: Send + Sync {
    async fn provision(
        &self,
        device_id: &str,
        password: &str,
        token: &str,
    ) -> Result<String, ApiError>;
}

pub type HttpClient = hyper_util::client::legacy::Client<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    http_body_util::Full<hyper::body::Bytes>,
>;

/// `POST <api_url>/rest/battery`, over TLS for `https://` urls
pub struct RestBatteryProvisionApi {
    endpoint: hyper::Uri,
    timeout: Duration,
    client: HttpClient,
}

impl RestBatteryProvisionApi {
    pub fn new(api_url: &hyper::Uri, timeout: Duration) -> Result<Self, ApiError> {
        let endpoint = format!("{}/rest/battery", api_url.to_string().trim_end_matches('/'))
            .parse::<hyper::Uri>()
            .map_err(|e| ApiError::GenericError(format!("invalid api url {api_url}: {e}")))?;
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = hyper_util::client::legacy::Client::builder(
            hyper_util::rt::TokioExecutor::new(),
        )
        .build(connector);
        Ok(Self {
            endpoint,
            timeout,
            client,
        })
    }

    pub fn endpoint(&self) -> &hyper::Uri {
        &self.endpoint
    }

    async fn post(&self, body: Vec<u8>, token: &str) -> Result<String, ApiError> {
        let request = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri(self.endpoint.clone())
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .header(hyper::header::AUTHORIZATION, format!("Bearer {token}"))
            .body(http_body_util::Full::new(hyper::body::Bytes::from(body)))
            .map_err(|e| ApiError::GenericError(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ApiError::GenericError(e.to_string()))?;

        let status = response.status();
        log::debug!("POST {} -> {status}", self.endpoint);
        match status {
            s if s.is_success() => {}
            hyper::StatusCode::UNAUTHORIZED => return Err(ApiError::Unauthorized),
            hyper::StatusCode::CONFLICT => return Err(ApiError::BusinessError),
            _ => return Err(ApiError::UnknownError),
        }

        let bytes = http_body_util::BodyExt::collect(response.into_body())
            .await
            .map_err(|e| ApiError::GenericError(e.to_string()))?
            .to_bytes();
        let parsed: BatteryResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::GenericError(format!("invalid response body: {e}")))?;
        Ok(parsed.asset_id)
    }
}

#[async_trait::async_trait]
impl BatteryProvisionApi for RestBatteryProvisionApi {
    async fn provision(
        &self,
        device_id: &str,
        password: &str,
        token: &str,
    ) -> Result<String, ApiError> {
        let body = serde_json::to_vec(&BatteryRequest {
            device_id,
            password,
        })
        .map_err(|e| ApiError::GenericError(e.to_string()))?;

        match tokio::time::timeout(self.timeout, self.post(body, token)).await {
            Ok(r) => r,
            Err(_) => Err(ApiError::CommunicationError(format!(
                "no response from {} within {:?}",
                self.endpoint, self.timeout
            ))),
        }
    }
}

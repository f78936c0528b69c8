//! # Cloud REST API
//!
//! Request/response calls against the cloud, separate from the realtime
//! channel.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST /api/v1/edge/register                    NodeIdentity → data.id   │
//! │  POST /api/v1/edge/heartbeat                   load, quality, latency   │
//! │  POST /api/v1/edge/{node_id}/printers          { printers: [...] }      │
//! │  PUT  /api/v1/edge/{node_id}/printers/{name}/status                     │
//! │  HEAD /api/v1/health                           latency probe            │
//! │  GET  <file_url>                               job artifact             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every call carries the bearer header when a token can be had. The only
//! exception is a pre-signed artifact URL, which must be fetched without it.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use flyprint_core::{CloudPrinterStatus, DeviceDescriptor, NodeIdentity, NodeLoadLevel};

use crate::auth::TokenManager;
use crate::error::{SyncError, SyncResult};

/// Heartbeat request timeout.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// Query keys that together mark a pre-signed artifact URL.
const PRESIGNED_ALGORITHM: &str = "X-Amz-Algorithm";
const PRESIGNED_SIGNATURE: &str = "X-Amz-Signature";

/// Body of `POST /api/v1/edge/heartbeat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatReport {
    pub node_id: String,
    pub status: NodeLoadLevel,
    pub connection_quality: u8,
    /// Probe round trip in milliseconds, 0 when unmeasured.
    pub latency: u64,
    /// Unix seconds.
    pub timestamp: i64,
}

/// The cloud's REST surface as seen by the edge node.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Registers the node and returns the id the cloud assigned.
    async fn register_node(&self, identity: &NodeIdentity) -> SyncResult<String>;

    async fn send_heartbeat(&self, report: &HeartbeatReport) -> SyncResult<()>;

    async fn register_devices(
        &self,
        node_id: &str,
        devices: &[DeviceDescriptor],
    ) -> SyncResult<()>;

    async fn update_device_status(
        &self,
        node_id: &str,
        device_name: &str,
        status: CloudPrinterStatus,
        job_count: u32,
    ) -> SyncResult<()>;

    /// Health probe round trip in milliseconds; `None` if it failed.
    async fn probe_latency(&self) -> Option<u64>;

    /// Fetches a job artifact.
    async fn download_artifact(&self, url: &str) -> SyncResult<Vec<u8>>;
}

/// Returns true if the URL carries a pre-signed query-string credential.
pub fn is_presigned(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let mut algorithm = false;
    let mut signature = false;
    for (key, _) in parsed.query_pairs() {
        match key.as_ref() {
            PRESIGNED_ALGORITHM => algorithm = true,
            PRESIGNED_SIGNATURE => signature = true,
            _ => {}
        }
    }
    algorithm && signature
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// `reqwest` implementation of [`CloudApi`].
pub struct HttpCloudApi {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    probe_timeout: Duration,
    download_timeout: Duration,
}

impl HttpCloudApi {
    pub fn new(http: reqwest::Client, base_url: &str, tokens: Arc<TokenManager>) -> Self {
        HttpCloudApi {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            probe_timeout: Duration::from_secs(3),
            download_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.auth_header().await {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }

    /// Maps a response outside `accepted` to `UnexpectedStatus`.
    async fn check(endpoint: &str, resp: Response, accepted: &[u16]) -> SyncResult<Response> {
        let status = resp.status().as_u16();
        if accepted.contains(&status) {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SyncError::UnexpectedStatus {
            endpoint: endpoint.to_string(),
            status,
            body,
        })
    }
}

#[async_trait]
impl CloudApi for HttpCloudApi {
    async fn register_node(&self, identity: &NodeIdentity) -> SyncResult<String> {
        let endpoint = "/api/v1/edge/register";
        debug!(name = %identity.name, mac = %identity.mac_address, "Registering node");

        let request = self.authorized(self.http.post(self.url(endpoint))).await;
        let resp = request.json(identity).send().await?;
        let resp = Self::check(endpoint, resp, &[200, 201]).await?;

        let body: Value = resp.json().await?;
        let node_id = match &body["data"]["id"] {
            Value::String(id) if !id.is_empty() => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => {
                return Err(SyncError::InvalidMessage(
                    "registration response has no data.id".into(),
                ))
            }
        };

        info!(node_id = %node_id, "Node registered");
        Ok(node_id)
    }

    async fn send_heartbeat(&self, report: &HeartbeatReport) -> SyncResult<()> {
        let endpoint = "/api/v1/edge/heartbeat";
        let request = self
            .authorized(self.http.post(self.url(endpoint)).timeout(HEARTBEAT_TIMEOUT))
            .await;
        let resp = request.json(report).send().await?;
        Self::check(endpoint, resp, &[200]).await?;
        debug!(node_id = %report.node_id, status = %report.status, "Heartbeat accepted");
        Ok(())
    }

    async fn register_devices(
        &self,
        node_id: &str,
        devices: &[DeviceDescriptor],
    ) -> SyncResult<()> {
        let endpoint = format!("/api/v1/edge/{}/printers", node_id);
        let request = self.authorized(self.http.post(self.url(&endpoint))).await;
        let resp = request.json(&json!({ "printers": devices })).send().await?;
        Self::check(&endpoint, resp, &[200, 201]).await?;
        info!(node_id = %node_id, count = devices.len(), "Devices registered");
        Ok(())
    }

    async fn update_device_status(
        &self,
        node_id: &str,
        device_name: &str,
        status: CloudPrinterStatus,
        job_count: u32,
    ) -> SyncResult<()> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["api", "v1", "edge", node_id, "printers", device_name, "status"]);
        let endpoint = url.path().to_string();

        let body = json!({
            "status": status,
            "job_count": job_count,
            "timestamp": chrono::Utc::now().timestamp(),
        });
        let request = self.authorized(self.http.put(url).timeout(HEARTBEAT_TIMEOUT)).await;
        let resp = request.json(&body).send().await?;
        Self::check(&endpoint, resp, &[200]).await?;
        debug!(device = %device_name, %status, job_count, "Device status pushed");
        Ok(())
    }

    async fn probe_latency(&self) -> Option<u64> {
        let started = Instant::now();
        let result = self
            .http
            .head(self.url("/api/v1/health"))
            .timeout(self.probe_timeout)
            .send()
            .await;
        match result {
            Ok(_) => Some(started.elapsed().as_millis() as u64),
            Err(e) => {
                warn!(error = %e, "Latency probe failed");
                None
            }
        }
    }

    async fn download_artifact(&self, url: &str) -> SyncResult<Vec<u8>> {
        let request = self.http.get(url).timeout(self.download_timeout);
        let request = if is_presigned(url) {
            debug!("Downloading pre-signed artifact without credentials");
            request
        } else {
            self.authorized(request).await
        };

        let resp = request
            .send()
            .await
            .map_err(|e| SyncError::DownloadFailed(e.to_string()))?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(SyncError::DownloadFailed(format!("HTTP {}", status.as_u16())));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SyncError::DownloadFailed(e.to_string()))?;
        debug!(size = bytes.len(), "Artifact downloaded");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presigned_detection() {
        assert!(is_presigned(
            "https://bucket.s3.amazonaws.com/a.pdf?X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Signature=abc"
        ));
        // Both keys are required
        assert!(!is_presigned("https://bucket/a.pdf?X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(!is_presigned("https://cloud/files/a.pdf?token=1"));
        assert!(!is_presigned("not a url"));
    }

    #[test]
    fn test_heartbeat_body_shape() {
        let report = HeartbeatReport {
            node_id: "n1".into(),
            status: NodeLoadLevel::Moderate,
            connection_quality: 80,
            latency: 12,
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            json!({
                "node_id": "n1",
                "status": "moderate",
                "connection_quality": 80,
                "latency": 12,
                "timestamp": 1_700_000_000
            })
        );
    }
}

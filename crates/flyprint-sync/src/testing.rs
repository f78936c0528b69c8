//! In-memory fakes for the sync seams, shared by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use flyprint_core::{CloudPrinterStatus, DeviceDescriptor, ManagedDevice, NodeIdentity, NodeLoad};

use crate::api::{CloudApi, HeartbeatReport};
use crate::backend::{BackendJobState, DeviceState, PrintBackend, SubmitRequest, Submission};
use crate::devices::DeviceStore;
use crate::error::{SyncError, SyncResult};
use crate::metrics::LoadSampler;
use crate::protocol::{JobUpdate, OutboundMessage, PrinterStatusUpdate};
use crate::transport::MessageSink;

// =============================================================================
// Cloud
// =============================================================================

#[derive(Default)]
pub struct FakeCloudApi {
    pub assigned_id: Mutex<Option<String>>,
    pub fail_register: AtomicBool,
    pub registered: Mutex<Vec<NodeIdentity>>,
    pub heartbeats: Mutex<Vec<HeartbeatReport>>,
    pub fail_heartbeats: AtomicBool,
    pub latency: Mutex<Option<u64>>,
    pub device_batches: Mutex<Vec<(String, Vec<DeviceDescriptor>)>>,
    pub status_pushes: Mutex<Vec<(String, String, CloudPrinterStatus, u32)>>,
    /// URL → body. Unknown URLs fail like a 404.
    pub artifacts: Mutex<HashMap<String, Vec<u8>>>,
    pub downloads: Mutex<Vec<String>>,
    /// Time each download takes.
    pub download_delay: Mutex<Option<Duration>>,
}

impl FakeCloudApi {
    pub fn with_artifact(self, url: &str, body: &[u8]) -> Self {
        self.artifacts.lock().unwrap().insert(url.to_string(), body.to_vec());
        self
    }

    pub fn with_download_delay(self, delay: Duration) -> Self {
        *self.download_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.lock().unwrap().len()
    }
}

#[async_trait]
impl CloudApi for FakeCloudApi {
    async fn register_node(&self, identity: &NodeIdentity) -> SyncResult<String> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(SyncError::UnexpectedStatus {
                endpoint: "/api/v1/edge/register".into(),
                status: 500,
                body: "boom".into(),
            });
        }
        self.registered.lock().unwrap().push(identity.clone());
        Ok(self
            .assigned_id
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "node-1".to_string()))
    }

    async fn send_heartbeat(&self, report: &HeartbeatReport) -> SyncResult<()> {
        self.heartbeats.lock().unwrap().push(report.clone());
        if self.fail_heartbeats.load(Ordering::SeqCst) {
            return Err(SyncError::ConnectionFailed("refused".into()));
        }
        Ok(())
    }

    async fn register_devices(
        &self,
        node_id: &str,
        devices: &[DeviceDescriptor],
    ) -> SyncResult<()> {
        self.device_batches
            .lock()
            .unwrap()
            .push((node_id.to_string(), devices.to_vec()));
        Ok(())
    }

    async fn update_device_status(
        &self,
        node_id: &str,
        device_name: &str,
        status: CloudPrinterStatus,
        job_count: u32,
    ) -> SyncResult<()> {
        self.status_pushes.lock().unwrap().push((
            node_id.to_string(),
            device_name.to_string(),
            status,
            job_count,
        ));
        Ok(())
    }

    async fn probe_latency(&self) -> Option<u64> {
        *self.latency.lock().unwrap()
    }

    async fn download_artifact(&self, url: &str) -> SyncResult<Vec<u8>> {
        self.downloads.lock().unwrap().push(url.to_string());
        let delay = *self.download_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.artifacts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| SyncError::DownloadFailed("HTTP 404".into()))
    }
}

// =============================================================================
// Print Backend
// =============================================================================

pub struct FakeBackend {
    pub devices: Mutex<HashMap<String, DeviceState>>,
    /// Local handle to hand out, or the backend's rejection message.
    pub submit_result: Mutex<Result<Option<String>, String>>,
    pub submissions: Mutex<Vec<SubmitRequest>>,
    /// Scripted answers to `job_state`; `Queued` once exhausted.
    pub job_states: Mutex<VecDeque<SyncResult<BackendJobState>>>,
    pub job_state_calls: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        FakeBackend {
            devices: Mutex::new(HashMap::new()),
            submit_result: Mutex::new(Ok(None)),
            submissions: Mutex::new(Vec::new()),
            job_states: Mutex::new(VecDeque::new()),
            job_state_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeBackend {
    pub fn with_device(self, name: &str, native_status: &str, queue_length: u32) -> Self {
        self.set_device(name, native_status, queue_length);
        self
    }

    pub fn set_device(&self, name: &str, native_status: &str, queue_length: u32) {
        self.devices.lock().unwrap().insert(
            name.to_string(),
            DeviceState {
                native_status: native_status.to_string(),
                queue_length,
                error_code: None,
            },
        );
    }

    pub fn with_handle(self, local_job_id: &str) -> Self {
        *self.submit_result.lock().unwrap() = Ok(Some(local_job_id.to_string()));
        self
    }

    pub fn rejecting(self, message: &str) -> Self {
        *self.submit_result.lock().unwrap() = Err(message.to_string());
        self
    }

    pub fn script_states(self, states: Vec<SyncResult<BackendJobState>>) -> Self {
        *self.job_states.lock().unwrap() = states.into();
        self
    }

    pub fn polls(&self) -> usize {
        self.job_state_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrintBackend for FakeBackend {
    async fn device_status(&self, device_name: &str) -> SyncResult<DeviceState> {
        self.devices
            .lock()
            .unwrap()
            .get(device_name)
            .cloned()
            .ok_or_else(|| SyncError::Backend(format!("unknown device {}", device_name)))
    }

    async fn capabilities(&self, _device_name: &str) -> SyncResult<serde_json::Value> {
        Ok(serde_json::json!({ "duplex": true }))
    }

    async fn submit(&self, request: SubmitRequest) -> SyncResult<Submission> {
        self.submissions.lock().unwrap().push(request);
        match self.submit_result.lock().unwrap().clone() {
            Ok(local_job_id) => Ok(Submission { local_job_id }),
            Err(message) => Err(SyncError::SubmissionFailed(message)),
        }
    }

    async fn job_state(
        &self,
        _device_name: &str,
        _local_job_id: &str,
    ) -> SyncResult<BackendJobState> {
        self.job_state_calls.fetch_add(1, Ordering::SeqCst);
        self.job_states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(BackendJobState::Queued))
    }
}

// =============================================================================
// Sink and Sampler
// =============================================================================

#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    pub fn job_updates(&self) -> Vec<JobUpdate> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::JobUpdate { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn printer_updates(&self) -> Vec<PrinterStatusUpdate> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::PrinterStatus { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }
}

impl MessageSink for RecordingSink {
    fn send(&self, message: OutboundMessage) -> SyncResult<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Returns a fixed load, or fails when `None`.
pub struct FixedSampler(pub Option<NodeLoad>);

#[async_trait]
impl LoadSampler for FixedSampler {
    async fn sample(&self) -> SyncResult<NodeLoad> {
        self.0
            .ok_or_else(|| SyncError::Internal("sampler unavailable".into()))
    }
}

// =============================================================================
// Devices
// =============================================================================

pub struct StaticDevices(pub Vec<ManagedDevice>);

impl DeviceStore for StaticDevices {
    fn managed_devices(&self) -> SyncResult<Vec<ManagedDevice>> {
        Ok(self.0.clone())
    }
}

pub fn device(name: &str, enabled: bool) -> ManagedDevice {
    ManagedDevice {
        id: format!("id-{}", name),
        name: name.into(),
        kind: "local".into(),
        location: String::new(),
        make_model: String::new(),
        enabled,
        added_at: None,
    }
}

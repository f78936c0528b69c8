//! Placeholder spooler for hosts without a linked print backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use flyprint_sync::{
    BackendJobState, DeviceState, PrintBackend, SubmitRequest, Submission, SyncError, SyncResult,
};

/// Reports every device offline and refuses every job.
///
/// Lets the node register, heartbeat and report status while the spooler
/// integration is missing.
pub struct UnavailableBackend;

#[async_trait]
impl PrintBackend for UnavailableBackend {
    async fn device_status(&self, _device_name: &str) -> SyncResult<DeviceState> {
        Ok(DeviceState {
            native_status: "offline".into(),
            queue_length: 0,
            error_code: None,
        })
    }

    async fn capabilities(&self, _device_name: &str) -> SyncResult<Value> {
        Ok(json!({}))
    }

    async fn submit(&self, request: SubmitRequest) -> SyncResult<Submission> {
        warn!(printer = %request.printer_name, "No print backend linked, rejecting job");
        if let Err(e) = tokio::fs::remove_file(&request.file_path).await {
            warn!(path = ?request.file_path, error = %e, "Artifact not removed");
        }
        Err(SyncError::SubmissionFailed(format!(
            "no print backend available for {}",
            request.printer_name
        )))
    }

    async fn job_state(
        &self,
        _device_name: &str,
        _local_job_id: &str,
    ) -> SyncResult<BackendJobState> {
        Ok(BackendJobState::Absent)
    }
}

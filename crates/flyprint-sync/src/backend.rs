//! # Print Backend Boundary
//!
//! The local spooler is an opaque collaborator. The sync layer only needs
//! four things from it, captured by [`PrintBackend`]:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   StatusReporter ──► device_status(name)      native word + queue depth │
//! │   device registration ──► capabilities(name)  JSON blob for the cloud   │
//! │   JobPipeline    ──► submit(request)          local handle (optional)   │
//! │   job monitor    ──► job_state(printer, id)   queued/printing/done/gone │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::SyncResult;

/// What the backend reports about one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    /// Backend vocabulary, mapped later by `CloudPrinterStatus::from_native`.
    pub native_status: String,
    pub queue_length: u32,
    pub error_code: Option<String>,
}

/// A downloaded artifact ready for the spooler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub printer_name: String,
    pub file_path: PathBuf,
    pub job_name: String,
    pub options: BTreeMap<String, String>,
    /// The backend removes `file_path` once it is done with it.
    pub cleanup_after_completion: bool,
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Submission {
    /// Spooler handle for status polling, if the backend produced one.
    pub local_job_id: Option<String>,
}

/// Spooler-side state of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendJobState {
    Queued,
    Printing,
    Completed,
    /// No longer in the queue (finished, cancelled or purged).
    Absent,
}

impl BackendJobState {
    /// Returns true once the job no longer needs watching.
    pub fn is_finished(self) -> bool {
        matches!(self, BackendJobState::Completed | BackendJobState::Absent)
    }
}

/// Local print spooler.
///
/// A rejected submission is reported as `SyncError::SubmissionFailed`
/// carrying the backend's own message.
#[async_trait]
pub trait PrintBackend: Send + Sync {
    async fn device_status(&self, device_name: &str) -> SyncResult<DeviceState>;

    async fn capabilities(&self, device_name: &str) -> SyncResult<serde_json::Value>;

    async fn submit(&self, request: SubmitRequest) -> SyncResult<Submission>;

    async fn job_state(&self, device_name: &str, local_job_id: &str)
        -> SyncResult<BackendJobState>;
}

//! # Job Ingestion Pipeline
//!
//! Turns `print_job` messages into local print jobs and reports their
//! outcome as `job_update` messages.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  print_job ──► validate ──► download ──► submit ──► spawn monitor       │
//! │                  │            │            │              │             │
//! │          missing │     error  │     error  │              ▼             │
//! │           fields │            ▼            ▼     ┌──────────────────┐   │
//! │                  ▼    failed: "file    failed:   │ no handle:       │   │
//! │               dropped  download        backend   │  wait 10s → done │   │
//! │               (no id   failed"         message   │ handle:          │   │
//! │               to       progress 0      progress 0│  poll every 10s  │   │
//! │               report)                            │  ≤ 600s → done   │   │
//! │                                                  └──────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Monitors run under [`JobMonitors`]: bounded concurrency, all cancelled
//! together on shutdown. A cancelled monitor reports nothing. Handlers run
//! under the same tracker, so shutdown waits for them. A job cut short
//! before reaching the backend is reported failed; requests arriving after
//! shutdown are dropped. A second request for a job still in progress is
//! ignored.
//!
//! A monitor that hits the polling ceiling or fails to query the backend
//! reports `completed`. The cloud expects every accepted job to resolve, and
//! the backend owns the spooled file by then.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use url::Url;

use flyprint_core::{JobOutcome, JobPhase, PrintJob};

use crate::api::CloudApi;
use crate::backend::{PrintBackend, SubmitRequest};
use crate::config::JobSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{OutboundMessage, PrintJobRequest};
use crate::transport::{MessageSink, PrintJobHandler};

/// Failure reason reported when the artifact cannot be fetched.
pub const DOWNLOAD_FAILED_REASON: &str = "file download failed";

/// Failure reason for accepted jobs cut short by shutdown.
pub const SHUTDOWN_REASON: &str = "edge node shutting down";

/// Extension used when the artifact URL has none.
const DEFAULT_EXTENSION: &str = "pdf";

// =============================================================================
// Monitor Scheduler
// =============================================================================

/// Tracks completion monitors and in-progress job handlers.
#[derive(Clone)]
pub struct JobMonitors {
    tracker: TaskTracker,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
}

impl JobMonitors {
    pub fn new(max_concurrent: usize) -> Self {
        JobMonitors {
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Spawns a monitor. It waits for a permit before running; `monitor`
    /// receives the shared cancellation token.
    pub fn spawn<F, Fut>(&self, monitor: F) -> SyncResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(SyncError::ShuttingDown);
        }

        let permits = self.permits.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = cancel.cancelled() => return,
            };
            monitor(cancel).await;
        });
        Ok(())
    }

    /// Runs `work` as tracked work: shutdown waits for it to return.
    pub async fn track<Fut>(&self, work: Fut) -> Fut::Output
    where
        Fut: std::future::Future,
    {
        self.tracker.track_future(work).await
    }

    /// Tracker shutdown waits on; tasks spawned on it are waited for too.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// True once [`shutdown`](Self::shutdown) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when shutdown starts.
    pub async fn shutting_down(&self) {
        self.cancel.cancelled().await
    }

    /// Monitors and tracked handlers not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Cancels every monitor and waits for them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Timing of completion monitors.
#[derive(Debug, Clone, Copy)]
pub struct MonitorTiming {
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub no_handle_grace: Duration,
}

impl From<&JobSettings> for MonitorTiming {
    fn from(settings: &JobSettings) -> Self {
        MonitorTiming {
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            max_wait: Duration::from_secs(settings.max_wait_secs),
            no_handle_grace: Duration::from_secs(settings.no_handle_grace_secs),
        }
    }
}

/// State shared with monitor tasks.
struct Shared {
    node_id: String,
    backend: Arc<dyn PrintBackend>,
    sink: Arc<dyn MessageSink>,
    timing: MonitorTiming,
    active: RwLock<HashMap<String, JobPhase>>,
}

impl Shared {
    async fn set_phase(&self, job: &mut PrintJob, phase: JobPhase) {
        if let Err(e) = job.advance(phase) {
            warn!(error = %e, "Job phase not advanced");
            return;
        }
        let mut active = self.active.write().await;
        if phase.is_terminal() {
            active.remove(&job.cloud_job_id);
        } else {
            active.insert(job.cloud_job_id.clone(), phase);
        }
    }

    /// Records the outcome and reports it upstream.
    async fn finish(&self, job: &mut PrintJob, outcome: JobOutcome) {
        self.set_phase(job, outcome.phase()).await;

        match &outcome {
            JobOutcome::Completed => info!(job_id = %job.cloud_job_id, "Job completed"),
            JobOutcome::Failed { reason } => {
                error!(job_id = %job.cloud_job_id, reason = %reason, "Job failed")
            }
        }

        let message = OutboundMessage::job_update(&self.node_id, &job.cloud_job_id, &outcome);
        if let Err(e) = self.sink.send(message) {
            warn!(job_id = %job.cloud_job_id, error = %e, "Job update not sent");
        }
    }

    async fn watch(self: Arc<Self>, mut job: PrintJob, cancel: CancellationToken) {
        tokio::select! {
            _ = self.await_completion(&job) => {}
            _ = cancel.cancelled() => {
                debug!(job_id = %job.cloud_job_id, "Monitor cancelled");
                self.active.write().await.remove(&job.cloud_job_id);
                return;
            }
        }
        self.finish(&mut job, JobOutcome::Completed).await;
    }

    async fn await_completion(&self, job: &PrintJob) {
        let Some(local_id) = job.local_job_id.as_deref() else {
            tokio::time::sleep(self.timing.no_handle_grace).await;
            debug!(job_id = %job.cloud_job_id, "No local handle, treating submission as completion");
            return;
        };

        let deadline = Instant::now() + self.timing.max_wait;
        loop {
            tokio::time::sleep(self.timing.poll_interval).await;

            match self.backend.job_state(&job.printer_name, local_id).await {
                Ok(state) if state.is_finished() => {
                    debug!(job_id = %job.cloud_job_id, ?state, "Local job finished");
                    return;
                }
                Ok(state) => {
                    debug!(job_id = %job.cloud_job_id, ?state, "Local job still pending");
                }
                Err(e) => {
                    warn!(
                        job_id = %job.cloud_job_id,
                        error = %e,
                        "Job status query failed, reporting completed"
                    );
                    return;
                }
            }

            if Instant::now() >= deadline {
                warn!(
                    job_id = %job.cloud_job_id,
                    max_wait = ?self.timing.max_wait,
                    "Job not finished before the polling ceiling, reporting completed"
                );
                return;
            }
        }
    }
}

/// Handles `print_job` messages.
pub struct JobPipeline {
    shared: Arc<Shared>,
    api: Arc<dyn CloudApi>,
    monitors: JobMonitors,
    staging_dir: PathBuf,
}

impl JobPipeline {
    pub fn new(
        node_id: impl Into<String>,
        api: Arc<dyn CloudApi>,
        backend: Arc<dyn PrintBackend>,
        sink: Arc<dyn MessageSink>,
        settings: &JobSettings,
    ) -> Self {
        JobPipeline {
            shared: Arc::new(Shared {
                node_id: node_id.into(),
                backend,
                sink,
                timing: MonitorTiming::from(settings),
                active: RwLock::new(HashMap::new()),
            }),
            api,
            monitors: JobMonitors::new(settings.max_concurrent_monitors),
            staging_dir: std::env::temp_dir(),
        }
    }

    /// Directory downloaded artifacts are written to.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Processes one request. Returns once the job is submitted or failed;
    /// completion is watched in the background.
    ///
    /// Requests arriving after shutdown started are dropped. A job already
    /// accepted when shutdown starts is reported failed unless it reached
    /// the backend.
    pub async fn handle(&self, request: PrintJobRequest) {
        let mut job = match request.into_job() {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Dropping incomplete print job");
                return;
            }
        };
        if self.monitors.is_shutting_down() {
            warn!(job_id = %job.cloud_job_id, "Pipeline shutting down, dropping print job");
            return;
        }
        {
            let mut active = self.shared.active.write().await;
            if let Some(phase) = active.get(&job.cloud_job_id) {
                warn!(
                    job_id = %job.cloud_job_id,
                    phase = %phase,
                    "Print job already in progress, ignoring duplicate"
                );
                return;
            }
            active.insert(job.cloud_job_id.clone(), job.phase());
        }
        info!(
            job_id = %job.cloud_job_id,
            printer = %job.printer_name,
            "Print job received"
        );

        self.shared.set_phase(&mut job, JobPhase::Downloading).await;
        let file_path = match self.download(&job).await {
            Ok(path) => path,
            Err(SyncError::ShuttingDown) => {
                self.shared
                    .finish(&mut job, JobOutcome::failed(SHUTDOWN_REASON))
                    .await;
                return;
            }
            Err(e) => {
                error!(job_id = %job.cloud_job_id, error = %e, "Artifact download failed");
                self.shared
                    .finish(&mut job, JobOutcome::failed(DOWNLOAD_FAILED_REASON))
                    .await;
                return;
            }
        };
        self.shared.set_phase(&mut job, JobPhase::Downloaded).await;

        if self.monitors.is_shutting_down() {
            discard(&file_path).await;
            self.shared
                .finish(&mut job, JobOutcome::failed(SHUTDOWN_REASON))
                .await;
            return;
        }

        let request = SubmitRequest {
            printer_name: job.printer_name.clone(),
            file_path: file_path.clone(),
            job_name: job.display_name.clone(),
            options: job.options.clone(),
            cleanup_after_completion: true,
        };
        let submission = match self.shared.backend.submit(request).await {
            Ok(submission) => submission,
            Err(e) => {
                discard(&file_path).await;
                self.shared
                    .finish(&mut job, JobOutcome::failed(e.to_string()))
                    .await;
                return;
            }
        };
        self.shared.set_phase(&mut job, JobPhase::Submitted).await;
        info!(
            job_id = %job.cloud_job_id,
            local_job_id = ?submission.local_job_id,
            "Job submitted to backend"
        );

        job.local_job_id = submission.local_job_id;
        self.shared.set_phase(&mut job, JobPhase::Monitoring).await;

        if self.monitors.is_shutting_down() {
            // The backend owns the job now
            info!(job_id = %job.cloud_job_id, "Shutdown during submission, reporting completed");
            self.shared.finish(&mut job, JobOutcome::Completed).await;
            return;
        }
        let shared = self.shared.clone();
        let job_id = job.cloud_job_id.clone();
        if let Err(e) = self
            .monitors
            .spawn(move |cancel| shared.watch(job, cancel))
        {
            warn!(job_id = %job_id, error = %e, "Completion monitor not started");
            self.shared.active.write().await.remove(&job_id);
        }
    }

    /// Downloads the artifact next to other staged jobs. Gives up with
    /// [`SyncError::ShuttingDown`] when shutdown starts mid-transfer.
    async fn download(&self, job: &PrintJob) -> SyncResult<PathBuf> {
        let bytes = tokio::select! {
            bytes = self.api.download_artifact(&job.source_uri) => bytes?,
            _ = self.monitors.shutting_down() => return Err(SyncError::ShuttingDown),
        };

        let size = bytes.len();
        let dir = self.staging_dir.clone();
        let job_id = job.cloud_job_id.clone();
        let source_uri = job.source_uri.clone();
        let path = tokio::task::spawn_blocking(move || {
            stage_artifact(&dir, &job_id, &source_uri, bytes.as_slice())
        })
        .await
        .map_err(|e| SyncError::Internal(e.to_string()))??;

        debug!(job_id = %job.cloud_job_id, path = ?path, size, "Artifact staged");
        Ok(path)
    }

    /// Jobs received and not yet resolved, with their phase.
    pub async fn active_jobs(&self) -> HashMap<String, JobPhase> {
        self.shared.active.read().await.clone()
    }

    /// Tracker for handler tasks spawned on the pipeline's behalf.
    pub fn tracker(&self) -> TaskTracker {
        self.monitors.tracker()
    }

    pub fn monitors_in_flight(&self) -> usize {
        self.monitors.in_flight()
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Stops taking jobs, cancels outstanding monitors and waits for
    /// in-progress handlers. Cancelled monitors are not reported.
    pub async fn shutdown(&self) {
        let pending = self.monitors.in_flight();
        if pending > 0 {
            info!(pending, "Cancelling job handlers and monitors");
        }
        self.monitors.shutdown().await;

        // Monitors cancelled while waiting for a permit never ran
        self.shared
            .active
            .write()
            .await
            .retain(|_, phase| *phase != JobPhase::Monitoring);
    }
}

#[async_trait]
impl PrintJobHandler for JobPipeline {
    async fn handle_print_job(&self, request: PrintJobRequest) {
        self.monitors.track(self.handle(request)).await
    }
}

/// Writes `content` to a new file in `dir`. The file survives only once it
/// is fully written.
fn stage_artifact(
    dir: &Path,
    job_id: &str,
    source_uri: &str,
    mut content: impl Read,
) -> SyncResult<PathBuf> {
    let suffix = format!(".{}", artifact_extension(source_uri));
    let prefix = format!("cloud_job_{}_", sanitize(job_id));
    let mut file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(&suffix)
        .tempfile_in(dir)?;
    std::io::copy(&mut content, &mut file)?;
    let (_, path) = file.keep().map_err(|e| SyncError::Io(e.to_string()))?;
    Ok(path)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = ?path, error = %e, "Artifact not removed");
    }
}

/// Extension of the URL's last path segment, `pdf` if there is none.
fn artifact_extension(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let name = path.rsplit('/').next().unwrap_or_default();
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// Keeps job ids usable inside a file name.
fn sanitize(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

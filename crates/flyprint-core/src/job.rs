//! # Print Jobs
//!
//! A cloud print job as the edge node sees it, and the linear phase machine
//! it walks through between arrival and the final report upstream.
//!
//! ## Phase Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Job Phases                                     │
//! │                                                                         │
//! │  received ─► downloading ─► downloaded ─► submitted ─► monitoring       │
//! │      │            │              │             │            │           │
//! │      │            │              │             │            ├─► completed
//! │      └────────────┴──────────────┴─────────────┴────────────┴─► failed  │
//! │                                                                         │
//! │  • Transitions only move forward, one step at a time                    │
//! │  • `failed` is reachable from every non-terminal phase                  │
//! │  • `completed` and `failed` are terminal                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};

/// Prefix used for the display name when the cloud does not send one.
pub const DEFAULT_JOB_NAME_PREFIX: &str = "CloudJob_";

// =============================================================================
// Job Phase
// =============================================================================

/// Lifecycle phase of a print job on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Received,
    Downloading,
    Downloaded,
    Submitted,
    Monitoring,
    Completed,
    Failed,
}

impl JobPhase {
    /// Returns true for `completed` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    /// The single forward successor on the happy path.
    fn successor(self) -> Option<JobPhase> {
        match self {
            JobPhase::Received => Some(JobPhase::Downloading),
            JobPhase::Downloading => Some(JobPhase::Downloaded),
            JobPhase::Downloaded => Some(JobPhase::Submitted),
            JobPhase::Submitted => Some(JobPhase::Monitoring),
            JobPhase::Monitoring => Some(JobPhase::Completed),
            JobPhase::Completed | JobPhase::Failed => None,
        }
    }

    /// Returns true if `to` may follow `self`.
    pub fn can_transition_to(self, to: JobPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == JobPhase::Failed || self.successor() == Some(to)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Received => "received",
            JobPhase::Downloading => "downloading",
            JobPhase::Downloaded => "downloaded",
            JobPhase::Submitted => "submitted",
            JobPhase::Monitoring => "monitoring",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Job Outcome
// =============================================================================

/// Status value carried in a `job_update` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobResultStatus {
    Completed,
    Failed,
}

/// Final result of a job, as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed { reason: String },
}

impl JobOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        JobOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> JobResultStatus {
        match self {
            JobOutcome::Completed => JobResultStatus::Completed,
            JobOutcome::Failed { .. } => JobResultStatus::Failed,
        }
    }

    /// Progress percentage reported with the outcome.
    pub fn progress(&self) -> u8 {
        match self {
            JobOutcome::Completed => 100,
            JobOutcome::Failed { .. } => 0,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            JobOutcome::Completed => None,
            JobOutcome::Failed { reason } => Some(reason),
        }
    }

    /// Terminal phase matching this outcome.
    pub fn phase(&self) -> JobPhase {
        match self {
            JobOutcome::Completed => JobPhase::Completed,
            JobOutcome::Failed { .. } => JobPhase::Failed,
        }
    }
}

// =============================================================================
// Print Job
// =============================================================================

/// A print job received from the cloud.
///
/// `cloud_job_id`, `printer_name` and `source_uri` are mandatory; without a
/// job id nothing can be reported back, so incomplete requests never become
/// a `PrintJob`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub cloud_job_id: String,
    pub printer_name: String,
    pub source_uri: String,
    pub display_name: String,
    pub options: BTreeMap<String, String>,
    /// Handle assigned by the local print backend on submission.
    pub local_job_id: Option<String>,
    phase: JobPhase,
}

impl PrintJob {
    /// Builds a job from the raw fields of an inbound request.
    ///
    /// Empty strings count as missing.
    pub fn from_request(
        job_id: Option<String>,
        printer_name: Option<String>,
        file_url: Option<String>,
        name: Option<String>,
        options: BTreeMap<String, String>,
    ) -> Result<Self, ValidationError> {
        let cloud_job_id = required(job_id, "job_id")?;
        let printer_name = required(printer_name, "printer_name")?;
        let source_uri = required(file_url, "file_url")?;

        let display_name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{}{}", DEFAULT_JOB_NAME_PREFIX, cloud_job_id));

        Ok(PrintJob {
            cloud_job_id,
            printer_name,
            source_uri,
            display_name,
            options,
            local_job_id: None,
            phase: JobPhase::Received,
        })
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Moves the job to `to`, enforcing the phase machine.
    pub fn advance(&mut self, to: JobPhase) -> CoreResult<()> {
        if !self.phase.can_transition_to(to) {
            return Err(CoreError::InvalidPhaseTransition {
                job_id: self.cloud_job_id.clone(),
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::Required { field }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> PrintJob {
        PrintJob::from_request(
            Some("J1".into()),
            Some("HP1".into()),
            Some("https://x/doc.pdf".into()),
            Some("Invoice".into()),
            BTreeMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let err = PrintJob::from_request(
            Some("J1".into()),
            Some("HP1".into()),
            None,
            None,
            BTreeMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::Required { field: "file_url" });

        let err = PrintJob::from_request(
            Some("  ".into()),
            Some("HP1".into()),
            Some("https://x/doc.pdf".into()),
            None,
            BTreeMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::Required { field: "job_id" });
    }

    #[test]
    fn test_default_display_name() {
        let job = PrintJob::from_request(
            Some("J7".into()),
            Some("HP1".into()),
            Some("https://x/doc.pdf".into()),
            None,
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(job.display_name, "CloudJob_J7");
        assert_eq!(job.phase(), JobPhase::Received);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job();
        for phase in [
            JobPhase::Downloading,
            JobPhase::Downloaded,
            JobPhase::Submitted,
            JobPhase::Monitoring,
            JobPhase::Completed,
        ] {
            job.advance(phase).unwrap();
        }
        assert!(job.phase().is_terminal());
    }

    #[test]
    fn test_skipping_and_leaving_terminal_phases_fails() {
        let mut job = job();
        assert!(job.advance(JobPhase::Submitted).is_err());

        job.advance(JobPhase::Downloading).unwrap();
        job.advance(JobPhase::Failed).unwrap();
        assert!(job.advance(JobPhase::Downloaded).is_err());
        assert!(job.advance(JobPhase::Failed).is_err());
    }

    #[test]
    fn test_outcome_fields() {
        let ok = JobOutcome::Completed;
        assert_eq!(ok.progress(), 100);
        assert_eq!(ok.error_message(), None);
        assert_eq!(ok.phase(), JobPhase::Completed);

        let failed = JobOutcome::failed("file download failed");
        assert_eq!(failed.status(), JobResultStatus::Failed);
        assert_eq!(failed.progress(), 0);
        assert_eq!(failed.error_message(), Some("file download failed"));
    }
}

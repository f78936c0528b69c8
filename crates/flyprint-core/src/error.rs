//! # Error Types
//!
//! Domain-specific error types for flyprint-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  flyprint-core errors (this file)                                      │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Inbound record validation failures             │
//! │                                                                         │
//! │  flyprint-sync errors (separate crate)                                 │
//! │  └── SyncError        - Auth, transport, protocol, job failures        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → log / job_update      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::job::JobPhase;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A job was asked to move to a phase that does not follow its current one.
    ///
    /// ## When This Occurs
    /// ```text
    /// received → downloading → downloaded → submitted → monitoring → completed
    ///      │           │            │           │            │
    ///      └───────────┴────────────┴───────────┴────────────┴──► failed
    ///
    /// Anything else (skipping a phase, leaving a terminal phase) is rejected.
    /// ```
    #[error("Job {job_id}: illegal phase transition {from} -> {to}")]
    InvalidPhaseTransition {
        job_id: String,
        from: JobPhase,
        to: JobPhase,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Validation errors for records that arrive from outside the node.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: &'static str },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

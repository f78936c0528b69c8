//! # flyprint-core: Pure Domain Rules for the FlyPrint Edge Node
//!
//! Everything the edge node decides without touching the network, the disk
//! or the print spooler lives here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     FlyPrint Edge Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/edge-agent (flyprint-edge)                 │   │
//! │  │        load config ──► start orchestrator ──► Ctrl-C stop       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    flyprint-sync                                │   │
//! │  │   OAuth tokens, realtime channel, heartbeat, job pipeline,      │   │
//! │  │   status reporter, orchestrator                                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ flyprint-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │    job    │  │  status   │                  │   │
//! │  │   │ NodeIdent │  │ PrintJob  │  │ mapping   │                  │   │
//! │  │   │ Devices   │  │ JobPhase  │  │ load, QoS │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • PURE FUNCTIONS                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Node identity and managed device records
//! - [`job`] - Print job record and its phase machine
//! - [`status`] - Cloud status vocabulary, load level, connection quality
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use flyprint_core::status::{connection_quality, CloudPrinterStatus};
//!
//! assert_eq!(CloudPrinterStatus::from_native("idle"), CloudPrinterStatus::Ready);
//! assert_eq!(CloudPrinterStatus::from_native("on fire"), CloudPrinterStatus::Offline);
//! assert_eq!(connection_quality(2), 60);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod job;
pub mod status;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use job::{JobOutcome, JobPhase, JobResultStatus, PrintJob};
pub use status::{
    connection_quality, CloudPrinterStatus, DeviceStatusSnapshot, NodeLoad, NodeLoadLevel,
};
pub use types::*;

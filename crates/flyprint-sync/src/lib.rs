//! # flyprint-sync: Cloud Sync for FlyPrint Edge Nodes
//!
//! This crate connects an edge node (a host with local printers) to the
//! FlyPrint cloud: it registers the node, keeps it alive with heartbeats,
//! receives print jobs over a realtime channel and reports job results and
//! printer status back.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Edge Sync Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    EdgeAgent (Main Orchestrator)                 │  │
//! │  │                                                                  │  │
//! │  │  Ordered start, reverse stop, idempotent both ways              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │HeartbeatMonitor│  │RealtimeChannel │  │  JobPipeline           │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Load sampling  │  │ WebSocket with │  │ download → submit →    │    │
//! │  │ Latency probe  │  │ fixed-interval │  │ bounded completion     │    │
//! │  │ Failure count  │  │ reconnect and  │  │ monitors → job_update  │    │
//! │  │                │  │ ping/pong      │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ TokenManager   │  │ StatusReporter │  │  PrintBackend          │    │
//! │  │                │  │                │  │                        │    │
//! │  │ OAuth2 client  │  │ Diffs device   │  │ Local spooler seam     │    │
//! │  │ credentials,   │  │ status, emits  │  │ (status, submit,       │    │
//! │  │ single refresh │  │ printer_status │  │ job state)             │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `EdgeAgent` orchestrator and builder
//! - [`api`] - REST calls to the cloud (`CloudApi`)
//! - [`auth`] - OAuth2 client-credentials token cache
//! - [`backend`] - Print backend boundary
//! - [`config`] - Agent configuration (TOML + environment)
//! - [`devices`] - Managed-device list
//! - [`error`] - Sync error types
//! - [`heartbeat`] - Periodic liveness reports
//! - [`jobs`] - Job ingestion and completion monitors
//! - [`metrics`] - Host load sampling
//! - [`node_info`] - Host identity collection
//! - [`protocol`] - Realtime message types
//! - [`reporter`] - Printer status change reporting
//! - [`transport`] - Realtime WebSocket channel
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flyprint_sync::{AgentConfig, EdgeAgent};
//!
//! let config = AgentConfig::load_or_default(None);
//! let mut agent = EdgeAgent::builder(config)
//!     .with_backend(backend)
//!     .build()?;
//!
//! let node_id = agent.start().await?;
//! println!("Registered as {}", node_id);
//!
//! agent.stop().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
pub mod devices;
pub mod error;
pub mod heartbeat;
pub mod jobs;
pub mod metrics;
pub mod node_info;
pub mod protocol;
pub mod reporter;
pub mod transport;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AgentStatus, EdgeAgent, EdgeAgentBuilder};
pub use api::{CloudApi, HeartbeatReport, HttpCloudApi};
pub use auth::{AuthToken, ClientCredentials, IssuedToken, TokenManager, TokenProvider};
pub use backend::{BackendJobState, DeviceState, PrintBackend, SubmitRequest, Submission};
pub use config::{
    AgentConfig, CloudSettings, HeartbeatSettings, JobSettings, NodeSettings, RealtimeSettings,
    StatusSettings,
};
pub use devices::{DeviceStore, FileDeviceStore};
pub use error::{SyncError, SyncResult};
pub use heartbeat::{HeartbeatMonitor, HeartbeatStatus};
pub use jobs::{JobMonitors, JobPipeline};
pub use metrics::{LoadSampler, SystemLoadSampler};
pub use protocol::{InboundMessage, OutboundMessage, PrintJobRequest};
pub use reporter::{StatusPoller, StatusReporter};
pub use transport::{ChannelHandle, ChannelStatus, ConnectionState, MessageSink, RealtimeChannel};

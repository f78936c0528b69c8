//! # Edge Agent
//!
//! Orchestrator of the cloud sync subsystem. Owns every component and
//! starts/stops them in a fixed order.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        EdgeAgent Architecture                           │
//! │                                                                         │
//! │  start():                                  stop() (reverse):            │
//! │  ────────                                  ─────────────────            │
//! │  1. register node        (auto_register)   4. StatusReporter            │
//! │  2. HeartbeatMonitor                       3. channel intake closed     │
//! │  3. register devices     (auto_register_      JobPipeline drained       │
//! │                           printers)           RealtimeChannel (flush)   │
//! │                                            2. HeartbeatMonitor          │
//! │  3. RealtimeChannel + JobPipeline                                       │
//! │  4. StatusReporter                                                      │
//! │                                                                         │
//! │  ┌────────────────┐   print_job    ┌────────────────┐                   │
//! │  │RealtimeChannel │ ─────────────► │  JobPipeline   │                   │
//! │  │                │ ◄───────────── │                │  job_update       │
//! │  │  single writer │  OutboundSender└────────────────┘                   │
//! │  │  bounded queue │ ◄───────────── ┌────────────────┐                   │
//! │  └────────────────┘  printer_status│ StatusReporter │                   │
//! │                                    └────────────────┘                   │
//! │  ┌────────────────┐                                                     │
//! │  │HeartbeatMonitor│ ──── REST ────► CloudApi ◄──── TokenManager          │
//! │  └────────────────┘                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use flyprint_core::{
    CloudPrinterStatus, DeviceDescriptor, JobPhase, ManagedDevice, NodeIdentity,
};

use crate::api::{CloudApi, HttpCloudApi};
use crate::auth::{ClientCredentials, TokenManager, TokenProvider};
use crate::backend::PrintBackend;
use crate::config::AgentConfig;
use crate::devices::{DeviceStore, FileDeviceStore};
use crate::error::{SyncError, SyncResult};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatStatus};
use crate::jobs::JobPipeline;
use crate::metrics::{LoadSampler, SystemLoadSampler};
use crate::node_info::collect_identity;
use crate::reporter::{StatusPoller, StatusReporter};
use crate::transport::{
    outbound_queue, ChannelConfig, ChannelHandle, ChannelStatus, Handlers, OutboundSender,
    RealtimeChannel,
};

// =============================================================================
// Agent Status
// =============================================================================

/// Aggregate status for external queries.
#[derive(Debug, Clone, Default)]
pub struct AgentStatus {
    /// Cloud sync switched on in the configuration.
    pub enabled: bool,

    /// Started with a node id.
    pub registered: bool,

    pub node_id: Option<String>,

    pub heartbeat: Option<HeartbeatStatus>,

    pub realtime: Option<ChannelStatus>,

    /// Jobs received and not yet resolved.
    pub active_jobs: HashMap<String, JobPhase>,

    pub reporter_running: bool,
}

// =============================================================================
// Edge Agent
// =============================================================================

struct Realtime {
    channel: ChannelHandle,
    pipeline: Arc<JobPipeline>,
    sender: OutboundSender,
}

/// Components that exist while the agent runs.
struct Running {
    identity: NodeIdentity,
    heartbeat: HeartbeatMonitor,
    realtime: Option<Realtime>,
    reporter: StatusReporter,
}

/// Main agent that orchestrates the cloud sync components.
pub struct EdgeAgent {
    config: Arc<AgentConfig>,
    tokens: Arc<TokenManager>,
    api: Arc<dyn CloudApi>,
    backend: Arc<dyn PrintBackend>,
    devices: Arc<dyn DeviceStore>,
    sampler: Arc<dyn LoadSampler>,
    identity: Option<NodeIdentity>,
    staging_dir: Option<PathBuf>,
    running: Option<Running>,
}

impl EdgeAgent {
    pub fn builder(config: AgentConfig) -> EdgeAgentBuilder {
        EdgeAgentBuilder::new(config)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn token_manager(&self) -> Arc<TokenManager> {
        self.tokens.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.identity.node_id.as_str())
    }

    /// Starts every component and returns the node id.
    ///
    /// Calling it again while running returns the current id. A failure
    /// after some components started stops those again.
    pub async fn start(&mut self) -> SyncResult<String> {
        if !self.config.cloud.enabled {
            info!("Cloud service is disabled");
            return Err(SyncError::CloudDisabled);
        }
        if let Some(node_id) = self.node_id() {
            return Ok(node_id.to_string());
        }

        self.config.validate()?;

        // 1. Identity and registration
        let identity = self.resolve_identity().await?;
        let node_id = identity.node_id.clone();
        info!(node_id = %node_id, name = %identity.name, "Starting edge agent");

        // 2. Heartbeat
        let heartbeat = HeartbeatMonitor::new(
            node_id.clone(),
            self.api.clone(),
            self.sampler.clone(),
            self.config.heartbeat.max_failures,
        );
        heartbeat
            .start(Duration::from_secs(self.config.heartbeat.interval_secs))
            .await;
        self.running = Some(Running {
            identity,
            heartbeat,
            realtime: None,
            reporter: StatusReporter::new(),
        });

        // 3. Devices
        if self.config.cloud.auto_register_printers {
            if let Err(e) = self.register_managed_devices().await {
                warn!(error = %e, "Device registration failed");
            }
        }

        // 3. Realtime channel and job pipeline
        let realtime = match self.start_realtime(&node_id) {
            Ok(realtime) => realtime,
            Err(e) => {
                error!(error = %e, "Realtime channel not started");
                self.stop().await;
                return Err(e);
            }
        };

        // 4. Status reporter
        let poller = StatusPoller::new(
            node_id.clone(),
            self.backend.clone(),
            self.devices.clone(),
            Arc::new(realtime.sender.clone()),
        );
        if let Some(running) = self.running.as_mut() {
            running
                .reporter
                .start(
                    poller,
                    Duration::from_secs(self.config.status.check_interval_secs),
                )
                .await;
            running.realtime = Some(realtime);
        }

        info!(node_id = %node_id, "Edge agent started");
        Ok(node_id)
    }

    /// Stops everything in reverse start order. Idempotent.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!(node_id = %running.identity.node_id, "Stopping edge agent");

        running.reporter.stop().await;
        if let Some(realtime) = running.realtime {
            realtime.channel.close_intake();
            realtime.pipeline.shutdown().await;
            realtime.channel.stop().await;
        }
        running.heartbeat.stop().await;

        info!("Edge agent stopped");
    }

    async fn resolve_identity(&self) -> SyncResult<NodeIdentity> {
        let identity = match &self.identity {
            Some(identity) => identity.clone(),
            None => {
                let settings = self.config.node.clone();
                tokio::task::spawn_blocking(move || collect_identity(&settings))
                    .await
                    .map_err(|e| SyncError::Internal(e.to_string()))?
            }
        };

        if self.config.cloud.auto_register {
            let node_id = self.api.register_node(&identity).await?;
            return Ok(identity.registered(node_id));
        }

        Ok(match &self.config.node.id {
            Some(node_id) => identity.registered(node_id.clone()),
            None => identity,
        })
    }

    fn start_realtime(&self, node_id: &str) -> SyncResult<Realtime> {
        let url = self.config.websocket_url(node_id)?;
        let (sender, receiver) = outbound_queue(self.config.realtime.outbound_capacity);

        let mut pipeline = JobPipeline::new(
            node_id,
            self.api.clone(),
            self.backend.clone(),
            Arc::new(sender.clone()),
            &self.config.jobs,
        );
        if let Some(dir) = &self.staging_dir {
            pipeline = pipeline.with_staging_dir(dir);
        }
        let pipeline = Arc::new(pipeline);

        let channel = RealtimeChannel::spawn(
            ChannelConfig::new(url, &self.config.realtime),
            self.tokens.clone(),
            Handlers::new()
                .on_print_job(pipeline.clone())
                .with_tracker(pipeline.tracker()),
            sender.clone(),
            receiver,
        );

        Ok(Realtime {
            channel,
            pipeline,
            sender,
        })
    }

    fn running(&self) -> SyncResult<&Running> {
        self.running.as_ref().ok_or(SyncError::NotRunning)
    }

    // =========================================================================
    // Devices
    // =========================================================================

    async fn descriptor(&self, device: &ManagedDevice) -> DeviceDescriptor {
        let status = match self.backend.device_status(&device.name).await {
            Ok(state) => CloudPrinterStatus::from_native(&state.native_status),
            Err(_) => CloudPrinterStatus::Offline,
        };
        let capabilities = self
            .backend
            .capabilities(&device.name)
            .await
            .unwrap_or_else(|_| json!({}));
        device.descriptor(status, capabilities)
    }

    /// Registers every managed device. Returns how many were sent.
    pub async fn register_managed_devices(&self) -> SyncResult<usize> {
        let node_id = self.running()?.identity.node_id.clone();
        let devices = self.devices.managed_devices()?;
        if devices.is_empty() {
            info!("No managed devices to register");
            return Ok(0);
        }

        let mut descriptors = Vec::with_capacity(devices.len());
        for device in &devices {
            descriptors.push(self.descriptor(device).await);
        }
        self.api.register_devices(&node_id, &descriptors).await?;
        Ok(descriptors.len())
    }

    /// Registers a single device with the cloud.
    pub async fn register_device(&self, device: &ManagedDevice) -> SyncResult<()> {
        let node_id = self.running()?.identity.node_id.clone();
        if device.name.trim().is_empty() {
            return Err(SyncError::InvalidConfig("device name is required".into()));
        }
        let descriptor = self.descriptor(device).await;
        self.api.register_devices(&node_id, &[descriptor]).await
    }

    /// Pushes one device's current status over REST.
    pub async fn push_device_status(&self, device_name: &str) -> SyncResult<()> {
        let node_id = self.running()?.identity.node_id.clone();
        let (status, queue_length) = match self.backend.device_status(device_name).await {
            Ok(state) => (
                CloudPrinterStatus::from_native(&state.native_status),
                state.queue_length,
            ),
            Err(_) => (CloudPrinterStatus::Offline, 0),
        };
        self.api
            .update_device_status(&node_id, device_name, status, queue_length)
            .await
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Sends a heartbeat immediately.
    pub async fn force_heartbeat(&self) -> SyncResult<()> {
        self.running()?.heartbeat.force_heartbeat().await
    }

    pub async fn status(&self) -> AgentStatus {
        let mut status = AgentStatus {
            enabled: self.config.cloud.enabled,
            ..Default::default()
        };
        let Some(running) = &self.running else {
            return status;
        };

        status.registered = true;
        status.node_id = Some(running.identity.node_id.clone());
        status.heartbeat = Some(running.heartbeat.status().await);
        status.reporter_running = running.reporter.is_running().await;
        if let Some(realtime) = &running.realtime {
            status.realtime = Some(realtime.channel.status().await);
            status.active_jobs = realtime.pipeline.active_jobs().await;
        }
        status
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating an [`EdgeAgent`].
///
/// Only the print backend is required. Everything else defaults to the
/// production implementation built from the config.
pub struct EdgeAgentBuilder {
    config: AgentConfig,
    backend: Option<Arc<dyn PrintBackend>>,
    devices: Option<Arc<dyn DeviceStore>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    cloud_api: Option<Arc<dyn CloudApi>>,
    sampler: Option<Arc<dyn LoadSampler>>,
    identity: Option<NodeIdentity>,
    staging_dir: Option<PathBuf>,
}

impl EdgeAgentBuilder {
    pub fn new(config: AgentConfig) -> Self {
        EdgeAgentBuilder {
            config,
            backend: None,
            devices: None,
            token_provider: None,
            cloud_api: None,
            sampler: None,
            identity: None,
            staging_dir: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn PrintBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_devices(mut self, devices: Arc<dyn DeviceStore>) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn with_cloud_api(mut self, api: Arc<dyn CloudApi>) -> Self {
        self.cloud_api = Some(api);
        self
    }

    pub fn with_load_sampler(mut self, sampler: Arc<dyn LoadSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Uses a fixed identity instead of collecting host facts.
    pub fn with_identity(mut self, identity: NodeIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Directory for downloaded job artifacts (system temp dir otherwise).
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Builds the EdgeAgent.
    pub fn build(self) -> SyncResult<EdgeAgent> {
        let backend = self
            .backend
            .ok_or_else(|| SyncError::InvalidConfig("print backend required".into()))?;

        let devices: Arc<dyn DeviceStore> = match self.devices {
            Some(devices) => devices,
            None => {
                let path = self.config.devices_path().ok_or_else(|| {
                    SyncError::InvalidConfig("no managed-device file location".into())
                })?;
                Arc::new(FileDeviceStore::load(path)?)
            }
        };

        let http = reqwest::Client::builder()
            .timeout(self.config.request_timeout())
            .build()?;

        let provider = self
            .token_provider
            .unwrap_or_else(|| Arc::new(ClientCredentials::new(http.clone(), &self.config.cloud)));
        let tokens = Arc::new(TokenManager::new(provider));

        let api = match self.cloud_api {
            Some(api) => api,
            None => Arc::new(
                HttpCloudApi::new(http, self.config.base_url(), tokens.clone())
                    .with_probe_timeout(Duration::from_secs(self.config.heartbeat.probe_timeout_secs))
                    .with_download_timeout(Duration::from_secs(
                        self.config.jobs.download_timeout_secs,
                    )),
            ),
        };

        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(SystemLoadSampler::new()));

        Ok(EdgeAgent {
            config: Arc::new(self.config),
            tokens,
            api,
            backend,
            devices,
            sampler,
            identity: self.identity,
            staging_dir: self.staging_dir,
            running: None,
        })
    }
}

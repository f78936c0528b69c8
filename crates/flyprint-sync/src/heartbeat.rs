//! # Heartbeat Monitor
//!
//! Periodic liveness report to the cloud.
//!
//! ```text
//! every interval:
//!   sample load ──► online / moderate / busy   (unknown, quality 50 if sampling fails)
//!   failures    ──► connection_quality         (0:100  1:80  2:60  ≥3:40)
//!   HEAD /api/v1/health ──► latency ms         (0 if the probe fails)
//!   POST /api/v1/edge/heartbeat
//!        ok  → failures = 0, last_heartbeat = now
//!        err → failures += 1
//! ```
//!
//! Reaching `max_failures` only marks the monitor as degraded in
//! [`HeartbeatStatus`]; reacting to it is left to the owner.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flyprint_core::status::UNKNOWN_LOAD_QUALITY;
use flyprint_core::{connection_quality, NodeLoadLevel};

use crate::api::{CloudApi, HeartbeatReport};
use crate::error::SyncResult;
use crate::metrics::LoadSampler;

/// Heartbeat monitor state for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub failures: u32,
    pub max_failures: u32,
    /// `failures >= max_failures`.
    pub degraded: bool,
}

struct Beat {
    node_id: String,
    api: Arc<dyn CloudApi>,
    sampler: Arc<dyn LoadSampler>,
    max_failures: u32,
    failures: AtomicU32,
    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
}

impl Beat {
    async fn once(&self) -> SyncResult<()> {
        let failures = self.failures.load(Ordering::SeqCst);
        let (status, quality) = match self.sampler.sample().await {
            Ok(load) => (load.level(), connection_quality(failures)),
            Err(e) => {
                warn!(error = %e, "Load sampling failed");
                (NodeLoadLevel::Unknown, UNKNOWN_LOAD_QUALITY)
            }
        };
        let latency = self.api.probe_latency().await.unwrap_or(0);

        let report = HeartbeatReport {
            node_id: self.node_id.clone(),
            status,
            connection_quality: quality,
            latency,
            timestamp: Utc::now().timestamp(),
        };

        match self.api.send_heartbeat(&report).await {
            Ok(()) => {
                self.failures.store(0, Ordering::SeqCst);
                *self.last_heartbeat.write().await = Some(Utc::now());
                debug!(%status, quality, latency, "Heartbeat sent");
                Ok(())
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.max_failures {
                    warn!(
                        failures,
                        max_failures = self.max_failures,
                        error = %e,
                        "Heartbeat failing repeatedly, cloud link degraded"
                    );
                } else {
                    warn!(failures, error = %e, "Heartbeat failed");
                }
                Err(e)
            }
        }
    }
}

/// Sends heartbeats on a fixed period.
pub struct HeartbeatMonitor {
    beat: Arc<Beat>,
    interval: RwLock<Duration>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(
        node_id: impl Into<String>,
        api: Arc<dyn CloudApi>,
        sampler: Arc<dyn LoadSampler>,
        max_failures: u32,
    ) -> Self {
        HeartbeatMonitor {
            beat: Arc::new(Beat {
                node_id: node_id.into(),
                api,
                sampler,
                max_failures,
                failures: AtomicU32::new(0),
                last_heartbeat: RwLock::new(None),
            }),
            interval: RwLock::new(Duration::from_secs(30)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Starts the loop; the first heartbeat goes out immediately.
    ///
    /// Does nothing if already running.
    pub async fn start(&self, interval: Duration) {
        let mut cancel_slot = self.cancel.lock().await;
        if cancel_slot.is_some() {
            debug!("Heartbeat monitor already running");
            return;
        }

        *self.interval.write().await = interval;
        let cancel = CancellationToken::new();
        let beat = self.beat.clone();
        let stop = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Failures are counted and logged inside
                        let _ = beat.once().await;
                    }
                    _ = stop.cancelled() => break,
                }
            }
            debug!("Heartbeat loop exited");
        });

        *cancel_slot = Some(cancel);
        *self.task.lock().await = Some(task);
        info!(interval_secs = interval.as_secs(), "Heartbeat monitor started");
    }

    /// Stops the loop. Idempotent.
    pub async fn stop(&self) {
        let Some(cancel) = self.cancel.lock().await.take() else {
            return;
        };
        cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Heartbeat task ended abnormally");
            }
        }
        info!("Heartbeat monitor stopped");
    }

    /// Sends one heartbeat right now, outside the schedule.
    pub async fn force_heartbeat(&self) -> SyncResult<()> {
        self.beat.once().await
    }

    pub async fn is_running(&self) -> bool {
        self.cancel.lock().await.is_some()
    }

    pub fn failures(&self) -> u32 {
        self.beat.failures.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> HeartbeatStatus {
        let failures = self.failures();
        HeartbeatStatus {
            running: self.is_running().await,
            interval_secs: self.interval.read().await.as_secs(),
            last_heartbeat: *self.beat.last_heartbeat.read().await,
            failures,
            max_failures: self.beat.max_failures,
            degraded: failures >= self.beat.max_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCloudApi, FixedSampler};
    use flyprint_core::NodeLoad;

    fn monitor(api: Arc<FakeCloudApi>, load: Option<NodeLoad>) -> HeartbeatMonitor {
        HeartbeatMonitor::new("node-1", api, Arc::new(FixedSampler(load)), 3)
    }

    fn calm() -> Option<NodeLoad> {
        Some(NodeLoad {
            cpu_percent: 10.0,
            memory_percent: 20.0,
            disk_percent: 30.0,
        })
    }

    #[tokio::test]
    async fn test_quality_follows_failure_counter() {
        let api = Arc::new(FakeCloudApi::default());
        let monitor = monitor(api.clone(), calm());

        api.fail_heartbeats.store(true, Ordering::SeqCst);
        for expected_failures in 1..=4 {
            assert!(monitor.force_heartbeat().await.is_err());
            assert_eq!(monitor.failures(), expected_failures);
        }
        let status = monitor.status().await;
        assert!(status.degraded);
        assert!(status.last_heartbeat.is_none());

        api.fail_heartbeats.store(false, Ordering::SeqCst);
        monitor.force_heartbeat().await.unwrap();
        assert_eq!(monitor.failures(), 0);
        assert!(monitor.status().await.last_heartbeat.is_some());

        let qualities: Vec<u8> = api
            .heartbeats
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.connection_quality)
            .collect();
        assert_eq!(qualities, vec![100, 80, 60, 40, 40]);
    }

    #[tokio::test]
    async fn test_report_contents() {
        let api = Arc::new(FakeCloudApi::default());
        *api.latency.lock().unwrap() = Some(42);
        let monitor = HeartbeatMonitor::new(
            "node-7",
            api.clone(),
            Arc::new(FixedSampler(Some(NodeLoad {
                cpu_percent: 95.0,
                memory_percent: 10.0,
                disk_percent: 10.0,
            }))),
            3,
        );

        monitor.force_heartbeat().await.unwrap();
        let report = api.heartbeats.lock().unwrap()[0].clone();
        assert_eq!(report.node_id, "node-7");
        assert_eq!(report.status, NodeLoadLevel::Busy);
        assert_eq!(report.latency, 42);
        assert!(report.timestamp > 0);
    }

    #[tokio::test]
    async fn test_sampling_and_probe_failures() {
        let api = Arc::new(FakeCloudApi::default());
        let monitor = monitor(api.clone(), None);

        monitor.force_heartbeat().await.unwrap();
        let report = api.heartbeats.lock().unwrap()[0].clone();
        assert_eq!(report.status, NodeLoadLevel::Unknown);
        assert_eq!(report.connection_quality, UNKNOWN_LOAD_QUALITY);
        assert_eq!(report.latency, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_loop_and_idempotent_stop() {
        let api = Arc::new(FakeCloudApi::default());
        let monitor = monitor(api.clone(), calm());

        monitor.start(Duration::from_secs(30)).await;
        monitor.start(Duration::from_secs(1)).await;
        assert!(monitor.is_running().await);

        // Beats at t = 0, 30, 60
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(api.heartbeat_count(), 3);
        assert_eq!(monitor.status().await.interval_secs, 30);

        monitor.stop().await;
        monitor.stop().await;
        assert!(!monitor.status().await.running);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(api.heartbeat_count(), 3);
    }
}

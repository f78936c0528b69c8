//! # Status Reporter
//!
//! Polls every managed device and pushes a `printer_status` message when
//! its `(status, queue_length)` pair changes.
//!
//! ```text
//!  managed devices ──► backend.device_status ──► from_native ──► snapshot
//!                                                                   │
//!                               same as cached? ── yes ──► nothing  │
//!                                      │                            │
//!                                      no ──► printer_status, cache ◄┘
//! ```
//!
//! The cache belongs to the polling task alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flyprint_core::{CloudPrinterStatus, DeviceStatusSnapshot};

use crate::backend::PrintBackend;
use crate::devices::DeviceStore;
use crate::protocol::OutboundMessage;
use crate::transport::MessageSink;

/// One polling pass over the managed devices, with its change cache.
pub struct StatusPoller {
    node_id: String,
    backend: Arc<dyn PrintBackend>,
    devices: Arc<dyn DeviceStore>,
    sink: Arc<dyn MessageSink>,
    last_reported: HashMap<String, DeviceStatusSnapshot>,
}

impl StatusPoller {
    pub fn new(
        node_id: impl Into<String>,
        backend: Arc<dyn PrintBackend>,
        devices: Arc<dyn DeviceStore>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        StatusPoller {
            node_id: node_id.into(),
            backend,
            devices,
            sink,
            last_reported: HashMap::new(),
        }
    }

    /// Current snapshot of one device. Backend errors read as offline.
    pub async fn snapshot(&self, device_name: &str) -> DeviceStatusSnapshot {
        match self.backend.device_status(device_name).await {
            Ok(state) => DeviceStatusSnapshot {
                device_name: device_name.to_string(),
                status: CloudPrinterStatus::from_native(&state.native_status),
                queue_length: state.queue_length,
                error_code: state.error_code,
            },
            Err(e) => {
                debug!(device = %device_name, error = %e, "Device status unavailable");
                DeviceStatusSnapshot {
                    device_name: device_name.to_string(),
                    status: CloudPrinterStatus::Offline,
                    queue_length: 0,
                    error_code: None,
                }
            }
        }
    }

    /// Runs one pass. Returns the number of status messages emitted.
    pub async fn poll_once(&mut self) -> usize {
        let devices = match self.devices.managed_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "Managed devices unavailable");
                return 0;
            }
        };

        let mut emitted = 0;
        for device in devices.iter().filter(|d| d.enabled) {
            let snapshot = self.snapshot(&device.name).await;
            if !snapshot.differs_from(self.last_reported.get(&device.name)) {
                continue;
            }

            match self
                .sink
                .send(OutboundMessage::printer_status(&self.node_id, &snapshot))
            {
                Ok(()) => {
                    debug!(
                        device = %snapshot.device_name,
                        status = %snapshot.status,
                        queue = snapshot.queue_length,
                        "Device status changed"
                    );
                    self.last_reported.insert(device.name.clone(), snapshot);
                    emitted += 1;
                }
                // Cache untouched so the change is retried next pass
                Err(e) => warn!(device = %device.name, error = %e, "Status update not queued"),
            }
        }

        self.last_reported
            .retain(|name, _| devices.iter().any(|d| d.enabled && &d.name == name));
        emitted
    }

    pub fn last_reported(&self, device_name: &str) -> Option<&DeviceStatusSnapshot> {
        self.last_reported.get(device_name)
    }
}

/// Runs a [`StatusPoller`] on a fixed period.
#[derive(Default)]
pub struct StatusReporter {
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts polling; the first pass runs immediately. Does nothing if
    /// already running.
    pub async fn start(&self, mut poller: StatusPoller, interval: Duration) {
        let mut cancel_slot = self.cancel.lock().await;
        if cancel_slot.is_some() {
            debug!("Status reporter already running");
            return;
        }

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        poller.poll_once().await;
                    }
                    _ = stop.cancelled() => break,
                }
            }
        });

        *cancel_slot = Some(cancel);
        *self.task.lock().await = Some(task);
        info!(interval_secs = interval.as_secs(), "Status reporter started");
    }

    /// Stops polling. Idempotent.
    pub async fn stop(&self) {
        let Some(cancel) = self.cancel.lock().await.take() else {
            return;
        };
        cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Status reporter task ended abnormally");
            }
        }
        info!("Status reporter stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.cancel.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, FakeBackend, RecordingSink, StaticDevices};

    fn poller(backend: Arc<FakeBackend>, sink: Arc<RecordingSink>) -> StatusPoller {
        StatusPoller::new(
            "node-1",
            backend,
            Arc::new(StaticDevices(vec![
                device("HP1", true),
                device("Ghost", true),
                device("Off", false),
            ])),
            sink,
        )
    }

    #[tokio::test]
    async fn test_emits_only_on_change() {
        let backend = Arc::new(FakeBackend::default().with_device("HP1", "idle", 0));
        let sink = Arc::new(RecordingSink::default());
        let mut poller = poller(backend.clone(), sink.clone());

        // HP1 ready, Ghost unknown to the backend → offline
        assert_eq!(poller.poll_once().await, 2);
        assert_eq!(poller.poll_once().await, 0);

        // Different native word, same cloud status: no traffic
        backend.set_device("HP1", "online", 0);
        assert_eq!(poller.poll_once().await, 0);

        backend.set_device("HP1", "printing", 2);
        assert_eq!(poller.poll_once().await, 1);
        backend.set_device("HP1", "printing", 1);
        assert_eq!(poller.poll_once().await, 1);

        let updates = sink.printer_updates();
        let hp1: Vec<_> = updates
            .iter()
            .filter(|u| u.printer_id == "HP1")
            .map(|u| (u.status, u.queue_length))
            .collect();
        assert_eq!(
            hp1,
            vec![
                (CloudPrinterStatus::Ready, 0),
                (CloudPrinterStatus::Printing, 2),
                (CloudPrinterStatus::Printing, 1),
            ]
        );
        let ghost = updates.iter().find(|u| u.printer_id == "Ghost").unwrap();
        assert_eq!(ghost.status, CloudPrinterStatus::Offline);
        assert!(updates.iter().all(|u| u.printer_id != "Off"));
    }

    #[tokio::test]
    async fn test_unmapped_status_is_offline() {
        let backend = Arc::new(FakeBackend::default().with_device("HP1", "warming-up", 0));
        let sink = Arc::new(RecordingSink::default());
        let poller = poller(backend, sink);

        assert_eq!(
            poller.snapshot("HP1").await.status,
            CloudPrinterStatus::Offline
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_loop() {
        let backend = Arc::new(FakeBackend::default().with_device("HP1", "idle", 0));
        let sink = Arc::new(RecordingSink::default());
        let reporter = StatusReporter::new();

        reporter
            .start(poller(backend.clone(), sink.clone()), Duration::from_secs(30))
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.printer_updates().len(), 2);

        backend.set_device("HP1", "error", 0);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.printer_updates().len(), 3);

        reporter.stop().await;
        reporter.stop().await;
        assert!(!reporter.is_running().await);

        backend.set_device("HP1", "idle", 0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.printer_updates().len(), 3);
    }
}

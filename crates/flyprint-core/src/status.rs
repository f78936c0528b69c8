//! # Status Vocabulary
//!
//! Pure classification rules shared by the heartbeat and status reporters:
//!
//! - native spooler status → four-value cloud vocabulary
//! - per-device snapshot comparison
//! - node load level from CPU / memory / disk percentages
//! - connection quality from the heartbeat failure counter
//!
//! ## Device Status Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  native (case-insensitive)              cloud                           │
//! │  ─────────────────────────────────────  ────────                        │
//! │  idle, ready, online, enabled, accepting → ready                        │
//! │  printing, processing, busy              → printing                     │
//! │  error, disabled, stopped, paused, jam   → error                        │
//! │  offline, unknown, <anything else>       → offline                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Heartbeat failures after which the node is considered degraded.
pub const DEFAULT_MAX_HEARTBEAT_FAILURES: u32 = 3;

// =============================================================================
// Cloud Device Status
// =============================================================================

/// Device status as the cloud understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudPrinterStatus {
    Ready,
    Printing,
    Error,
    Offline,
}

const NATIVE_STATUS_TABLE: &[(&str, CloudPrinterStatus)] = &[
    ("idle", CloudPrinterStatus::Ready),
    ("ready", CloudPrinterStatus::Ready),
    ("online", CloudPrinterStatus::Ready),
    ("enabled", CloudPrinterStatus::Ready),
    ("accepting", CloudPrinterStatus::Ready),
    ("printing", CloudPrinterStatus::Printing),
    ("processing", CloudPrinterStatus::Printing),
    ("busy", CloudPrinterStatus::Printing),
    ("error", CloudPrinterStatus::Error),
    ("disabled", CloudPrinterStatus::Error),
    ("stopped", CloudPrinterStatus::Error),
    ("paused", CloudPrinterStatus::Error),
    ("jam", CloudPrinterStatus::Error),
    ("offline", CloudPrinterStatus::Offline),
    ("unknown", CloudPrinterStatus::Offline),
];

impl CloudPrinterStatus {
    /// Maps a backend status word onto the cloud vocabulary.
    ///
    /// Unmapped values become `offline`.
    pub fn from_native(native: &str) -> Self {
        let key = native.trim().to_lowercase();
        NATIVE_STATUS_TABLE
            .iter()
            .find(|(word, _)| *word == key)
            .map(|(_, status)| *status)
            .unwrap_or(CloudPrinterStatus::Offline)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudPrinterStatus::Ready => "ready",
            CloudPrinterStatus::Printing => "printing",
            CloudPrinterStatus::Error => "error",
            CloudPrinterStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for CloudPrinterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Device Status Snapshot
// =============================================================================

/// One poll result for one managed device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatusSnapshot {
    pub device_name: String,
    pub status: CloudPrinterStatus,
    pub queue_length: u32,
    pub error_code: Option<String>,
}

impl DeviceStatusSnapshot {
    /// Returns true if this snapshot must be pushed given the last one sent.
    ///
    /// Only `(status, queue_length)` participates; a changed error code on
    /// its own is not a change.
    pub fn differs_from(&self, previous: Option<&DeviceStatusSnapshot>) -> bool {
        match previous {
            None => true,
            Some(prev) => prev.status != self.status || prev.queue_length != self.queue_length,
        }
    }
}

// =============================================================================
// Node Load
// =============================================================================

/// Coarse load level reported in the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeLoadLevel {
    Online,
    Moderate,
    Busy,
    /// Load could not be sampled.
    Unknown,
}

impl fmt::Display for NodeLoadLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeLoadLevel::Online => write!(f, "online"),
            NodeLoadLevel::Moderate => write!(f, "moderate"),
            NodeLoadLevel::Busy => write!(f, "busy"),
            NodeLoadLevel::Unknown => write!(f, "unknown"),
        }
    }
}

/// Resource usage percentages of the host.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeLoad {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
}

impl NodeLoad {
    const BUSY_ABOVE: f32 = 90.0;
    const MODERATE_ABOVE: f32 = 70.0;

    /// Any metric above 90% is busy, above 70% moderate.
    pub fn level(&self) -> NodeLoadLevel {
        let peak = self
            .cpu_percent
            .max(self.memory_percent)
            .max(self.disk_percent);

        if peak > Self::BUSY_ABOVE {
            NodeLoadLevel::Busy
        } else if peak > Self::MODERATE_ABOVE {
            NodeLoadLevel::Moderate
        } else {
            NodeLoadLevel::Online
        }
    }
}

// =============================================================================
// Connection Quality
// =============================================================================

/// Connection quality score derived from consecutive heartbeat failures.
pub fn connection_quality(consecutive_failures: u32) -> u8 {
    match consecutive_failures {
        0 => 100,
        1 => 80,
        2 => 60,
        _ => 40,
    }
}

/// Quality reported alongside an `unknown` load level.
pub const UNKNOWN_LOAD_QUALITY: u8 = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_status_mapping() {
        assert_eq!(CloudPrinterStatus::from_native("idle"), CloudPrinterStatus::Ready);
        assert_eq!(CloudPrinterStatus::from_native(" Printing "), CloudPrinterStatus::Printing);
        assert_eq!(CloudPrinterStatus::from_native("DISABLED"), CloudPrinterStatus::Error);
        assert_eq!(CloudPrinterStatus::from_native("offline"), CloudPrinterStatus::Offline);
        assert_eq!(CloudPrinterStatus::from_native("warming-up"), CloudPrinterStatus::Offline);
        assert_eq!(CloudPrinterStatus::from_native(""), CloudPrinterStatus::Offline);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&CloudPrinterStatus::Printing).unwrap();
        assert_eq!(json, "\"printing\"");
    }

    #[test]
    fn test_snapshot_change_detection() {
        let first = DeviceStatusSnapshot {
            device_name: "HP1".into(),
            status: CloudPrinterStatus::Ready,
            queue_length: 0,
            error_code: None,
        };
        assert!(first.differs_from(None));
        assert!(!first.clone().differs_from(Some(&first)));

        let queued = DeviceStatusSnapshot {
            queue_length: 2,
            ..first.clone()
        };
        assert!(queued.differs_from(Some(&first)));

        let only_error_code = DeviceStatusSnapshot {
            error_code: Some("E42".into()),
            ..first.clone()
        };
        assert!(!only_error_code.differs_from(Some(&first)));
    }

    #[test]
    fn test_load_levels() {
        let load = |cpu, memory, disk| NodeLoad {
            cpu_percent: cpu,
            memory_percent: memory,
            disk_percent: disk,
        };
        assert_eq!(load(10.0, 20.0, 30.0).level(), NodeLoadLevel::Online);
        assert_eq!(load(70.0, 70.0, 70.0).level(), NodeLoadLevel::Online);
        assert_eq!(load(10.0, 71.0, 30.0).level(), NodeLoadLevel::Moderate);
        assert_eq!(load(10.0, 20.0, 85.0).level(), NodeLoadLevel::Moderate);
        assert_eq!(load(95.0, 20.0, 30.0).level(), NodeLoadLevel::Busy);
        assert_eq!(load(10.0, 20.0, 90.5).level(), NodeLoadLevel::Busy);
    }

    #[test]
    fn test_connection_quality_table() {
        assert_eq!(connection_quality(0), 100);
        assert_eq!(connection_quality(1), 80);
        assert_eq!(connection_quality(2), 60);
        assert_eq!(connection_quality(3), 40);
        assert_eq!(connection_quality(17), 40);
    }
}

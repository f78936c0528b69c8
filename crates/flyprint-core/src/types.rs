//! # Domain Types
//!
//! Records describing the edge node and the devices it manages.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  NodeIdentity   │   │  ManagedDevice  │   │ DeviceDescriptor│       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  node_id        │   │  id             │   │  name, type     │       │
//! │  │  name, location │   │  name, type     │   │  status (cloud) │       │
//! │  │  mac, os, cpu   │   │  location       │   │  capabilities   │       │
//! │  │  memory, disk   │   │  make_model     │   │  enabled        │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Node Id Lifecycle
//! A `NodeIdentity` is built locally with a provisional id (the MAC address
//! without separators). The id returned by the cloud on registration replaces
//! it, and the record is not changed after that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::CloudPrinterStatus;

// =============================================================================
// Node Identity
// =============================================================================

/// Facts about this edge node, sent as the registration body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub node_id: String,
    pub name: String,
    pub location: String,
    pub version: String,
    pub mac_address: String,
    pub network_interface: String,
    pub os_version: String,
    pub cpu_info: String,
    pub memory_info: String,
    pub disk_info: String,
}

impl NodeIdentity {
    /// Provisional node id derived from a MAC address.
    pub fn provisional_id(mac_address: &str) -> String {
        mac_address.replace([':', '-'], "").to_lowercase()
    }

    /// Returns the identity with the cloud-assigned node id.
    pub fn registered(self, node_id: impl Into<String>) -> Self {
        NodeIdentity {
            node_id: node_id.into(),
            ..self
        }
    }
}

// =============================================================================
// Managed Devices
// =============================================================================

/// A local printer the operator put under cloud management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedDevice {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default = "default_device_kind")]
    pub kind: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub make_model: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
}

fn default_device_kind() -> String {
    "local".to_string()
}

fn default_enabled() -> bool {
    true
}

impl ManagedDevice {
    /// Builds the registration descriptor using live backend data.
    pub fn descriptor(
        &self,
        status: CloudPrinterStatus,
        capabilities: serde_json::Value,
    ) -> DeviceDescriptor {
        DeviceDescriptor {
            name: self.name.clone(),
            kind: self.kind.clone(),
            location: self.location.clone(),
            make_model: self.make_model.clone(),
            status,
            capabilities,
            enabled: self.enabled,
        }
    }
}

/// Device entry in a `POST /printers` registration body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub location: String,
    pub make_model: String,
    pub status: CloudPrinterStatus,
    pub capabilities: serde_json::Value,
    pub enabled: bool,
}

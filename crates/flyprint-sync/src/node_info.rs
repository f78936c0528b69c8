//! Collection of the local facts sent in the node registration body.

use sysinfo::{Disks, System};
use tracing::{debug, warn};

use flyprint_core::NodeIdentity;

use crate::config::NodeSettings;
use crate::metrics::root_disk;

/// Used when no interface yields a MAC address.
pub const UNKNOWN_MAC: &str = "00:00:00:00:00:00";

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Builds the provisional identity of this host.
///
/// Blocking (enumerates interfaces, CPUs and disks); call it from
/// `spawn_blocking` inside async code.
pub fn collect_identity(settings: &NodeSettings) -> NodeIdentity {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    let mac_address = lookup_mac(settings.network_interface.as_deref());

    let mut sys = System::new_all();
    sys.refresh_all();

    let cpu_info = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let memory_info = format!("{:.1}GB RAM", sys.total_memory() as f64 / GIB);

    let disks = Disks::new_with_refreshed_list();
    let disk_info = format!(
        "{:.1}GB Disk",
        root_disk(&disks).map(|d| d.total_space()).unwrap_or(0) as f64 / GIB
    );

    let identity = NodeIdentity {
        node_id: NodeIdentity::provisional_id(&mac_address),
        name: settings
            .name
            .clone()
            .unwrap_or_else(|| format!("EdgeNode-{}", hostname)),
        location: settings.location.clone(),
        version: format!("v{}", env!("CARGO_PKG_VERSION")),
        mac_address,
        network_interface: settings
            .network_interface
            .clone()
            .unwrap_or_else(|| "auto".to_string()),
        os_version: System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string()),
        cpu_info,
        memory_info,
        disk_info,
    };

    debug!(node_id = %identity.node_id, name = %identity.name, "Collected node identity");
    identity
}

fn lookup_mac(interface: Option<&str>) -> String {
    let found = match interface {
        Some(name) => mac_address::mac_address_by_name(name),
        None => mac_address::get_mac_address(),
    };

    match found {
        Ok(Some(mac)) => mac.to_string(),
        Ok(None) => {
            warn!(?interface, "No MAC address found");
            UNKNOWN_MAC.to_string()
        }
        Err(e) => {
            warn!(?interface, error = %e, "MAC address lookup failed");
            UNKNOWN_MAC.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_identity_uses_settings() {
        let settings = NodeSettings {
            name: Some("EdgeNode-test".into()),
            location: "Lab".into(),
            network_interface: None,
            id: None,
        };
        let identity = collect_identity(&settings);

        assert_eq!(identity.name, "EdgeNode-test");
        assert_eq!(identity.location, "Lab");
        assert!(identity.memory_info.ends_with("GB RAM"));
        assert!(identity.disk_info.ends_with("GB Disk"));
        assert_eq!(
            identity.node_id,
            NodeIdentity::provisional_id(&identity.mac_address)
        );
    }

    #[test]
    fn test_unknown_interface_falls_back() {
        assert_eq!(lookup_mac(Some("definitely-not-an-interface0")), UNKNOWN_MAC);
    }
}

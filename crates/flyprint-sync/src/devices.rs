//! # Managed Device Store
//!
//! The list of local printers the operator placed under cloud management.
//! The sync layer reads it through [`DeviceStore`]; [`FileDeviceStore`]
//! keeps it in a TOML file:
//!
//! ```toml
//! [[devices]]
//! id = "5f0c..."
//! name = "HP1"
//! type = "local"
//! location = "Front desk"
//! make_model = "HP LaserJet M404"
//! enabled = true
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use flyprint_core::ManagedDevice;

use crate::error::{SyncError, SyncResult};

/// Read access to the managed-device list.
pub trait DeviceStore: Send + Sync {
    fn managed_devices(&self) -> SyncResult<Vec<ManagedDevice>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeviceFile {
    #[serde(default)]
    devices: Vec<ManagedDevice>,
}

/// TOML-file backed device list.
pub struct FileDeviceStore {
    path: PathBuf,
    devices: RwLock<Vec<ManagedDevice>>,
}

impl FileDeviceStore {
    /// Loads the list; a missing file is an empty list.
    pub fn load(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        let devices = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
            })?;
            let file: DeviceFile = toml::from_str(&contents)?;
            info!(?path, count = file.devices.len(), "Loaded managed devices");
            file.devices
        } else {
            debug!(?path, "Device file not found, starting empty");
            Vec::new()
        };

        Ok(FileDeviceStore {
            path,
            devices: RwLock::new(devices),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current list back to disk.
    pub fn save(&self) -> SyncResult<()> {
        let file = DeviceFile {
            devices: self.snapshot()?,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }
        let contents = toml::to_string_pretty(&file)?;
        std::fs::write(&self.path, contents)
            .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        debug!(path = ?self.path, "Managed devices saved");
        Ok(())
    }

    /// Adds a device by name. Returns `false` if it is already managed.
    pub fn add(&self, name: &str, location: &str, make_model: &str) -> SyncResult<bool> {
        {
            let mut devices = self.write()?;
            if devices.iter().any(|d| d.name == name) {
                return Ok(false);
            }
            devices.push(ManagedDevice {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                kind: "local".to_string(),
                location: location.to_string(),
                make_model: make_model.to_string(),
                enabled: true,
                added_at: Some(Utc::now()),
            });
        }
        self.save()?;
        Ok(true)
    }

    /// Removes a device by name. Returns `false` if it was not managed.
    pub fn remove(&self, name: &str) -> SyncResult<bool> {
        let removed = {
            let mut devices = self.write()?;
            let before = devices.len();
            devices.retain(|d| d.name != name);
            devices.len() != before
        };
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    fn snapshot(&self) -> SyncResult<Vec<ManagedDevice>> {
        self.devices
            .read()
            .map(|d| d.clone())
            .map_err(|_| SyncError::Internal("device list lock poisoned".into()))
    }

    fn write(&self) -> SyncResult<std::sync::RwLockWriteGuard<'_, Vec<ManagedDevice>>> {
        self.devices
            .write()
            .map_err(|_| SyncError::Internal("device list lock poisoned".into()))
    }
}

impl DeviceStore for FileDeviceStore {
    fn managed_devices(&self) -> SyncResult<Vec<ManagedDevice>> {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDeviceStore::load(dir.path().join("devices.toml")).unwrap();
        assert!(store.managed_devices().unwrap().is_empty());
    }

    #[test]
    fn test_add_remove_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("devices.toml");

        let store = FileDeviceStore::load(&path).unwrap();
        assert!(store.add("HP1", "Front desk", "HP M404").unwrap());
        assert!(!store.add("HP1", "Elsewhere", "").unwrap());
        assert!(store.add("Zebra", "Warehouse", "ZD420").unwrap());

        let reloaded = FileDeviceStore::load(&path).unwrap();
        let names: Vec<_> = reloaded
            .managed_devices()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["HP1", "Zebra"]);

        assert!(reloaded.remove("HP1").unwrap());
        assert!(!reloaded.remove("HP1").unwrap());
        let again = FileDeviceStore::load(&path).unwrap();
        assert_eq!(again.managed_devices().unwrap().len(), 1);
    }

    #[test]
    fn test_parses_hand_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.toml");
        std::fs::write(
            &path,
            r#"
                [[devices]]
                id = "printer_1"
                name = "HP1"
                type = "network"
                enabled = false
            "#,
        )
        .unwrap();

        let devices = FileDeviceStore::load(&path).unwrap().managed_devices().unwrap();
        assert_eq!(devices[0].kind, "network");
        assert!(!devices[0].enabled);
        assert_eq!(devices[0].location, "");
    }
}

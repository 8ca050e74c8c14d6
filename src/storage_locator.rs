//! Storage location selection.
//!
//! Recordings land under a single "current storage root". The root is either a
//! local directory or a network-mounted one; consumers only ever see the
//! resolved path through [`StorageLocator::current_storage_root`].

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::{debug, warn};

pub trait StorageLocator: Send + Sync {
    /// Returns the directory new recordings should be written under.
    fn current_storage_root(&self) -> PathBuf;
}

/// Which backing the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLocation {
    Local,
    Network,
}

/// Storage locator driven by configuration.
///
/// When the network location is selected but its mount point is missing or
/// is not a directory, the local root is returned instead so recording keeps
/// working while the share is down.
pub struct ConfiguredStorageLocator {
    local_root: PathBuf,
    network_root: Option<PathBuf>,
    selected: RwLock<StorageLocation>,
}

impl ConfiguredStorageLocator {
    pub fn new(local_root: PathBuf, network_root: Option<PathBuf>) -> Self {
        let selected = if network_root.is_some() {
            StorageLocation::Network
        } else {
            StorageLocation::Local
        };
        Self {
            local_root,
            network_root,
            selected: RwLock::new(selected),
        }
    }

    /// Switches the preferred location; selecting `Network` without a
    /// configured network root has no effect.
    pub fn select(&self, location: StorageLocation) {
        if location == StorageLocation::Network && self.network_root.is_none() {
            warn!("Network storage selected but no network root is configured");
            return;
        }
        if let Ok(mut selected) = self.selected.write() {
            *selected = location;
        }
    }

    pub fn selected(&self) -> StorageLocation {
        self.selected
            .read()
            .map(|s| *s)
            .unwrap_or(StorageLocation::Local)
    }

    fn network_available(root: &Path) -> bool {
        std::fs::metadata(root)
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

impl StorageLocator for ConfiguredStorageLocator {
    fn current_storage_root(&self) -> PathBuf {
        if self.selected() == StorageLocation::Network {
            if let Some(root) = &self.network_root {
                if Self::network_available(root) {
                    return root.clone();
                }
                warn!(
                    "Network storage {} unavailable, falling back to {}",
                    root.display(),
                    self.local_root.display()
                );
            }
        }
        debug!("Using local storage root {}", self.local_root.display());
        self.local_root.clone()
    }
}

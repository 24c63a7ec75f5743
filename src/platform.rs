// Host platform facts consulted while building provisioning requests

use anyhow::{Context, Result};
use nix::unistd::{Uid, User};
use std::fs;
use std::path::PathBuf;

/// Name of the privileged user
pub const ROOT_USER: &str = "root";

/// Read-only view of host capabilities
#[cfg_attr(test, mockall::automock)]
pub trait HostPlatform {
    /// Whether an IOMMU is active on the host
    fn iommu_enabled(&self) -> bool;

    /// NUMA node of a fabric interface, `None` when unknown
    fn fabric_numa_node(&self, iface: &str) -> Option<u32>;

    /// Name of the user the process runs as
    fn effective_user(&self) -> Result<String>;
}

/// Platform facts read from sysfs
#[derive(Debug, Clone)]
pub struct SysfsPlatform {
    sysfs_root: PathBuf,
}

impl SysfsPlatform {
    pub fn new() -> Self {
        Self::with_root("/sys")
    }

    /// Use an alternative sysfs mount point
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: root.into(),
        }
    }
}

impl Default for SysfsPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPlatform for SysfsPlatform {
    fn iommu_enabled(&self) -> bool {
        let iommu_dir = self.sysfs_root.join("class/iommu");

        // Any registered IOMMU unit means DMA remapping is on
        let enabled = fs::read_dir(&iommu_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);

        tracing::debug!(path = %iommu_dir.display(), enabled, "Checked IOMMU");
        enabled
    }

    fn fabric_numa_node(&self, iface: &str) -> Option<u32> {
        let path = self
            .sysfs_root
            .join("class/net")
            .join(iface)
            .join("device/numa_node");

        let raw = fs::read_to_string(&path).ok()?;

        // -1 is reported when the device has no NUMA affinity
        match raw.trim().parse::<i64>() {
            Ok(node) if node >= 0 => u32::try_from(node).ok(),
            _ => {
                tracing::debug!(iface, value = raw.trim(), "No NUMA affinity for interface");
                None
            }
        }
    }

    fn effective_user(&self) -> Result<String> {
        let uid = Uid::effective();
        let user = User::from_uid(uid)
            .with_context(|| format!("Failed to look up user for uid {}", uid))?
            .with_context(|| format!("No user entry for uid {}", uid))?;
        Ok(user.name)
    }
}

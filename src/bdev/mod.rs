// NVMe block device provisioning
//
// - request.rs: pure request construction and validation
// - provisioner.rs: prepare/reset execution against a backend
// - scan.rs: scan bracketed by automatic prepare and reset

pub mod provisioner;
pub mod request;
pub mod scan;

#[cfg(test)]
mod provisioner_tests;

pub use provisioner::NvmeProvisioner;
pub use request::{NvmeOptions, NvmeRequestBuilder, SCAN_MIN_HUGEPAGE_COUNT};
pub use scan::{NvmeScanCoordinator, ScanOptions};

use serde::{Deserialize, Serialize};

/// Request sent to the backend for NVMe prepare, reset and SPDK cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BdevPrepareRequest {
    pub target_user: String,
    pub hugepage_count: u32,
    /// Comma separated NUMA nodes to allocate hugepages on, empty for any
    pub huge_nodes: String,
    /// Space separated PCI addresses, empty means all devices
    pub pci_allow_list: String,
    pub pci_block_list: String,
    pub disable_vfio: bool,
    pub enable_vmd: bool,
    pub reset: bool,
    /// Only run the requested cleanup, skip driver binding
    pub clean_hugepages_only: bool,
    pub clean_spdk_hugepages: bool,
    pub clean_spdk_lockfiles: bool,
    pub clean_spdk_lockfiles_any: bool,
}

/// Backend response to a prepare or reset request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BdevPrepareResponse {
    /// Set when VMD devices were handled and a second reset pass is needed
    #[serde(default)]
    pub vmd_prepared: bool,
    #[serde(default)]
    pub nr_hugepages_removed: u32,
    #[serde(default)]
    pub lockfiles_removed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BdevScanRequest {
    /// Space separated PCI addresses to restrict the scan to, empty for all
    pub device_list: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvmeNamespace {
    pub id: u32,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvmeController {
    pub pci_addr: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub fw_rev: String,
    #[serde(default)]
    pub socket_id: Option<u32>,
    #[serde(default)]
    pub namespaces: Vec<NvmeNamespace>,
}

impl NvmeController {
    /// Total capacity of all namespaces in bytes
    pub fn capacity(&self) -> u64 {
        self.namespaces.iter().map(|ns| ns.size).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BdevScanResponse {
    #[serde(default)]
    pub controllers: Vec<NvmeController>,
}

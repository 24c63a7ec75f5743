// NVMe request construction
//
// Everything here is pure apart from reading host facts through
// `HostPlatform`: no backend is touched, so every decision the provisioner
// makes about a request can be checked without I/O.

use super::BdevPrepareRequest;
use crate::capability::{validate_capability, VmdPolicy};
use crate::config::{ConfigDeviceResolver, ServerConfig};
use crate::pci::sanitize_address_list;
use crate::platform::HostPlatform;
use crate::{ProvisionError, ProvisionResult};

/// Hugepage floor applied to every prepare.
///
/// Sizing hugepages per NUMA node needs engine affinity that is not known
/// at provisioning time, so a count large enough for scanning is used.
pub const SCAN_MIN_HUGEPAGE_COUNT: u32 = 128;

/// Caller supplied NVMe options, as given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NvmeOptions {
    /// Comma or space separated PCI addresses
    pub pci_allow_list: String,
    pub pci_block_list: String,
    pub hugepages: Option<u32>,
    pub huge_nodes: String,
    /// Defaults to the effective user
    pub target_user: Option<String>,
    pub disable_vfio: bool,
    pub disable_vmd: bool,
}

impl NvmeOptions {
    /// Options used for the automatic prepare around a scan: device
    /// filters come from config only
    pub fn for_scan(disable_vmd: bool) -> Self {
        Self {
            disable_vmd,
            ..Default::default()
        }
    }
}

/// Requests for one prepare or reset invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmePlan {
    /// Best-effort SPDK resource cleanup issued first
    pub cleanup: BdevPrepareRequest,
    /// The prepare or reset request proper
    pub request: BdevPrepareRequest,
}

/// Builds backend requests from caller options, config and host facts
pub struct NvmeRequestBuilder<'a, P: HostPlatform + ?Sized> {
    cfg: Option<&'a ServerConfig>,
    platform: &'a P,
}

impl<'a, P: HostPlatform + ?Sized> NvmeRequestBuilder<'a, P> {
    pub fn new(cfg: Option<&'a ServerConfig>, platform: &'a P) -> Self {
        Self { cfg, platform }
    }

    /// Plan a prepare: resolved request with the hugepage floor applied
    pub fn prepare_plan(&self, opts: &NvmeOptions) -> ProvisionResult<NvmePlan> {
        let (resolved, lists_given) = self.resolve(opts)?;
        let cleanup = cleanup_request(&resolved, lists_given);

        let mut request = resolved;
        let requested = opts
            .hugepages
            .or_else(|| self.cfg.map(|c| c.nr_hugepages).filter(|&n| n > 0))
            .unwrap_or(0);
        if requested < SCAN_MIN_HUGEPAGE_COUNT {
            tracing::debug!(
                requested,
                minimum = SCAN_MIN_HUGEPAGE_COUNT,
                "Raising hugepage count to scan minimum"
            );
        }
        request.hugepage_count = requested.max(SCAN_MIN_HUGEPAGE_COUNT);
        request.huge_nodes = opts.huge_nodes.clone();

        Ok(NvmePlan { cleanup, request })
    }

    /// Plan a reset: resolved request forced to reset semantics
    pub fn reset_plan(&self, opts: &NvmeOptions) -> ProvisionResult<NvmePlan> {
        let (resolved, lists_given) = self.resolve(opts)?;
        let cleanup = cleanup_request(&resolved, lists_given);

        Ok(NvmePlan {
            cleanup,
            request: into_reset(resolved),
        })
    }

    /// Sanitize, fill from config, validate capability and decide VMD.
    ///
    /// Also reports whether the caller gave any explicit device list,
    /// judged before config defaults are applied.
    fn resolve(&self, opts: &NvmeOptions) -> ProvisionResult<(BdevPrepareRequest, bool)> {
        let devices = ConfigDeviceResolver::new(self.cfg);
        devices.check_hugepages()?;

        let target_user = match &opts.target_user {
            Some(user) => user.clone(),
            None => self
                .platform
                .effective_user()
                .map_err(|e| ProvisionError::backend("user lookup", e))?,
        };

        let mut req = BdevPrepareRequest {
            target_user,
            pci_allow_list: sanitize_address_list(&opts.pci_allow_list)?,
            pci_block_list: sanitize_address_list(&opts.pci_block_list)?,
            ..Default::default()
        };
        let lists_given = !req.pci_allow_list.is_empty() || !req.pci_block_list.is_empty();

        devices.resolve(&mut req)?;

        req.disable_vfio = opts.disable_vfio || self.cfg.is_some_and(|c| c.disable_vfio);

        let iommu_enabled = self.platform.iommu_enabled();
        validate_capability(&req.target_user, req.disable_vfio, iommu_enabled)?;

        req.enable_vmd = VmdPolicy {
            config_disabled: self.cfg.is_some_and(ServerConfig::vmd_disabled),
            cli_disabled: opts.disable_vmd,
            vfio_disabled: req.disable_vfio,
            iommu_enabled,
        }
        .resolve();

        tracing::debug!(request = ?req, lists_given, "Resolved NVMe request");
        Ok((req, lists_given))
    }
}

/// Cleanup-only variant of a resolved request.
///
/// With no explicit device lists every SPDK lockfile is removed, otherwise
/// only those matching the allow/block lists.
pub fn cleanup_request(resolved: &BdevPrepareRequest, lists_given: bool) -> BdevPrepareRequest {
    BdevPrepareRequest {
        hugepage_count: 0,
        huge_nodes: String::new(),
        reset: false,
        clean_hugepages_only: true,
        clean_spdk_hugepages: true,
        clean_spdk_lockfiles: true,
        clean_spdk_lockfiles_any: !lists_given,
        ..resolved.clone()
    }
}

/// Force reset semantics onto a resolved request
pub fn into_reset(resolved: BdevPrepareRequest) -> BdevPrepareRequest {
    BdevPrepareRequest {
        hugepage_count: 0,
        huge_nodes: String::new(),
        reset: true,
        clean_hugepages_only: false,
        clean_spdk_hugepages: false,
        clean_spdk_lockfiles: false,
        clean_spdk_lockfiles_any: false,
        ..resolved
    }
}

/// Second reset issued after a VMD-prepared first pass.
///
/// Lists are cleared and VMD is off so VMD endpoints are not pulled back
/// into the allow list.
pub fn vmd_followup_reset(first: &BdevPrepareRequest) -> BdevPrepareRequest {
    BdevPrepareRequest {
        pci_allow_list: String::new(),
        pci_block_list: String::new(),
        enable_vmd: false,
        ..first.clone()
    }
}

// NVMe prepare/reset orchestration

use super::request::{vmd_followup_reset, NvmeOptions, NvmePlan, NvmeRequestBuilder};
use super::{BdevPrepareRequest, BdevPrepareResponse};
use crate::backend::BdevBackend;
use crate::config::ServerConfig;
use crate::platform::HostPlatform;
use crate::{ProvisionError, ProvisionResult, CLEANUP_OP};

pub const NVME_PREPARE_OP: &str = "nvme prepare backend";
pub const NVME_RESET_OP: &str = "nvme reset backend";
pub const NVME_VMD_RESET_OP: &str = "nvme vmd followup reset backend";

/// Prepares NVMe devices for user-space access and returns them to the kernel
pub struct NvmeProvisioner<'a, B: BdevBackend, P: HostPlatform + ?Sized> {
    backend: B,
    requests: NvmeRequestBuilder<'a, P>,
}

impl<'a, B: BdevBackend, P: HostPlatform + ?Sized> NvmeProvisioner<'a, B, P> {
    pub fn new(backend: B, cfg: Option<&'a ServerConfig>, platform: &'a P) -> Self {
        Self {
            backend,
            requests: NvmeRequestBuilder::new(cfg, platform),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Bind devices for user-space access
    pub fn prepare(&self, opts: &NvmeOptions) -> ProvisionResult<BdevPrepareResponse> {
        let NvmePlan { cleanup, request } = self.requests.prepare_plan(opts)?;

        self.clean_spdk_resources(&cleanup);

        tracing::debug!(request = ?request, "NVMe prepare");
        let resp = self
            .backend
            .prepare(&request)
            .map_err(|e| ProvisionError::backend(NVME_PREPARE_OP, e))?;

        tracing::info!(
            allow = %request.pci_allow_list,
            hugepages = request.hugepage_count,
            vmd = request.enable_vmd,
            "NVMe prepare complete"
        );
        Ok(resp)
    }

    /// Return devices to their kernel drivers
    pub fn reset(&self, opts: &NvmeOptions) -> ProvisionResult<BdevPrepareResponse> {
        let NvmePlan { cleanup, request } = self.requests.reset_plan(opts)?;

        self.clean_spdk_resources(&cleanup);

        tracing::debug!(request = ?request, "NVMe reset");
        let resp = self
            .backend
            .reset(&request)
            .map_err(|e| ProvisionError::backend(NVME_RESET_OP, e))?;

        // The first pass leaves VMD backing devices bound to no driver when
        // the allow list only covered some VMD controllers
        if resp.vmd_prepared {
            let followup = vmd_followup_reset(&request);
            tracing::debug!(request = ?followup, "Resetting again to release VMD devices");
            self.backend
                .reset(&followup)
                .map_err(|e| ProvisionError::backend(NVME_VMD_RESET_OP, e))?;
        }

        tracing::info!(allow = %request.pci_allow_list, "NVMe reset complete");
        Ok(resp)
    }

    /// Remove stale SPDK hugepage files and lockfiles, logging any failure
    fn clean_spdk_resources(&self, req: &BdevPrepareRequest) {
        match self.backend.prepare(req) {
            Ok(resp) => {
                tracing::debug!(
                    hugepages_removed = resp.nr_hugepages_removed,
                    lockfiles_removed = ?resp.lockfiles_removed,
                    "SPDK resources cleaned"
                );
            }
            Err(e) => {
                let err = ProvisionError::backend(CLEANUP_OP, e);
                tracing::error!(error = %err, "SPDK resource cleanup failed");
            }
        }
    }
}

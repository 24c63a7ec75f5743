// Default device filters derived from host storage configuration

use super::ServerConfig;
use crate::bdev::BdevPrepareRequest;
use crate::pci::PciAddressSet;
use crate::{ProvisionError, ProvisionResult};

/// Fills unset request filters from the active config.
///
/// Explicit values always win; config only ever fills an empty list.
pub struct ConfigDeviceResolver<'a> {
    cfg: Option<&'a ServerConfig>,
}

impl<'a> ConfigDeviceResolver<'a> {
    pub fn new(cfg: Option<&'a ServerConfig>) -> Self {
        Self { cfg }
    }

    /// Union of NVMe devices across all engine bdev tiers
    pub fn allow_list(&self) -> ProvisionResult<PciAddressSet> {
        let Some(cfg) = self.cfg else {
            return Ok(PciAddressSet::new());
        };

        let mut allow = PciAddressSet::new();
        for engine in &cfg.engines {
            let devices = PciAddressSet::from_strings(engine.nvme_devices())?;
            allow = allow.union(&devices);
        }
        Ok(allow)
    }

    /// Global exclude list
    pub fn block_list(&self) -> ProvisionResult<PciAddressSet> {
        match self.cfg {
            Some(cfg) => PciAddressSet::from_strings(&cfg.bdev_exclude),
            None => Ok(PciAddressSet::new()),
        }
    }

    /// Fail when config disables the hugepages NVMe access depends on
    pub fn check_hugepages(&self) -> ProvisionResult<()> {
        match self.cfg {
            Some(cfg) if cfg.disable_hugepages => Err(ProvisionError::HugepagesDisabled),
            _ => Ok(()),
        }
    }

    /// Populate empty allow/block lists in `req` from config
    pub fn resolve(&self, req: &mut BdevPrepareRequest) -> ProvisionResult<()> {
        if req.pci_allow_list.is_empty() {
            let allow = self.allow_list()?;
            if !allow.is_empty() {
                tracing::debug!(allow = %allow, "Using allow list from config");
            }
            req.pci_allow_list = allow.to_string();
        }

        if req.pci_block_list.is_empty() {
            let block = self.block_list()?;
            if !block.is_empty() {
                tracing::debug!(block = %block, "Using block list from config");
            }
            req.pci_block_list = block.to_string();
        }

        Ok(())
    }
}

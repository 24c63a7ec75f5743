// NVMe scan bracketed by an automatic prepare and reset

use super::provisioner::NvmeProvisioner;
use super::request::NvmeOptions;
use super::{BdevScanRequest, BdevScanResponse};
use crate::backend::BdevBackend;
use crate::config::{ConfigDeviceResolver, ServerConfig};
use crate::platform::HostPlatform;
use crate::{ProvisionError, ProvisionResult};

pub const NVME_SCAN_OP: &str = "nvme scan backend";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub disable_vmd: bool,
    /// Devices are already prepared, scan without binding or releasing them
    pub skip_prep: bool,
}

pub struct NvmeScanCoordinator<'a, B: BdevBackend, P: HostPlatform + ?Sized> {
    provisioner: NvmeProvisioner<'a, B, P>,
    cfg: Option<&'a ServerConfig>,
}

impl<'a, B: BdevBackend, P: HostPlatform + ?Sized> NvmeScanCoordinator<'a, B, P> {
    pub fn new(backend: B, cfg: Option<&'a ServerConfig>, platform: &'a P) -> Self {
        Self {
            provisioner: NvmeProvisioner::new(backend, cfg, platform),
            cfg,
        }
    }

    /// Scan NVMe devices.
    ///
    /// Unless `skip_prep` is set devices are prepared first and reset
    /// afterwards whatever the scan outcome. A scan failure is always the
    /// reported error; a reset failure is only reported after a good scan.
    pub fn scan(&self, opts: &ScanOptions) -> ProvisionResult<BdevScanResponse> {
        if opts.skip_prep {
            return self.scan_devices();
        }

        let prep_opts = NvmeOptions::for_scan(opts.disable_vmd);
        self.provisioner
            .prepare(&prep_opts)
            .map_err(|e| ProvisionError::PrepBeforeScan(Box::new(e)))?;

        let scanned = self.scan_devices();
        let reset = self.provisioner.reset(&prep_opts);

        match (scanned, reset) {
            (Ok(resp), Ok(_)) => Ok(resp),
            (Ok(_), Err(reset_err)) => Err(reset_err),
            (Err(scan_err), Err(reset_err)) => {
                tracing::error!(error = %reset_err, "NVMe reset after failed scan also failed");
                Err(scan_err)
            }
            (Err(scan_err), Ok(_)) => Err(scan_err),
        }
    }

    fn scan_devices(&self) -> ProvisionResult<BdevScanResponse> {
        let device_list = ConfigDeviceResolver::new(self.cfg).allow_list()?.to_string();
        let req = BdevScanRequest { device_list };

        let resp = self
            .provisioner
            .backend()
            .scan(&req)
            .map_err(|e| ProvisionError::backend(NVME_SCAN_OP, e))?;

        tracing::debug!(controllers = resp.controllers.len(), "NVMe scan complete");
        Ok(resp)
    }
}

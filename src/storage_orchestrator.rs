// Storage Orchestrator - Runs PMem and NVMe preparation as one operation
//
// The two device classes are provisioned independently: a failure on one
// does not stop the other, and every failure is reported together.

use crate::backend::{BdevBackend, ScmBackend};
use crate::bdev::{BdevPrepareResponse, NvmeOptions, NvmeProvisioner};
use crate::config::ServerConfig;
use crate::platform::HostPlatform;
use crate::scm::{ConsentPrompt, PmemOptions, PmemOutcome, PmemProvisioner};
use crate::{ProvisionError, ProvisionResult};
use serde::Serialize;

/// Which device classes a combined prepare covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageScope {
    #[default]
    All,
    NvmeOnly,
    ScmOnly,
}

impl StorageScope {
    /// Build from the mutually exclusive command line switches
    pub fn from_flags(nvme_only: bool, scm_only: bool) -> Self {
        match (nvme_only, scm_only) {
            (true, false) => StorageScope::NvmeOnly,
            (false, true) => StorageScope::ScmOnly,
            _ => StorageScope::All,
        }
    }

    pub fn includes_scm(&self) -> bool {
        !matches!(self, StorageScope::NvmeOnly)
    }

    pub fn includes_nvme(&self) -> bool {
        !matches!(self, StorageScope::ScmOnly)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOptions {
    pub scope: StorageScope,
    pub pmem: PmemOptions,
    pub nvme: NvmeOptions,
}

/// Results of the parts of a combined prepare that succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoragePrepareReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scm: Option<PmemOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nvme: Option<BdevPrepareResponse>,
}

/// Prepares every local storage device class
pub struct StorageOrchestrator<'a, S, C, B, P>
where
    S: ScmBackend,
    C: ConsentPrompt + ?Sized,
    B: BdevBackend,
    P: HostPlatform + ?Sized,
{
    pmem: PmemProvisioner<'a, S, C>,
    nvme: NvmeProvisioner<'a, B, P>,
}

impl<'a, S, C, B, P> StorageOrchestrator<'a, S, C, B, P>
where
    S: ScmBackend,
    C: ConsentPrompt + ?Sized,
    B: BdevBackend,
    P: HostPlatform + ?Sized,
{
    pub fn new(
        scm_backend: S,
        consent: &'a C,
        bdev_backend: B,
        cfg: Option<&'a ServerConfig>,
        platform: &'a P,
    ) -> Self {
        Self {
            pmem: PmemProvisioner::new(scm_backend, consent),
            nvme: NvmeProvisioner::new(bdev_backend, cfg, platform),
        }
    }

    /// Prepare PMem then NVMe, as limited by `opts.scope`.
    ///
    /// A declined PMem consent skips PMem only. Both failures are returned
    /// as one aggregate error; a single failure is returned as itself.
    /// JSON output without force is refused before either device class is
    /// touched.
    pub fn prepare(&self, opts: &StorageOptions) -> ProvisionResult<StoragePrepareReport> {
        if opts.scope.includes_scm() && opts.pmem.json_output && !opts.pmem.force {
            return Err(ProvisionError::NoForceWithJson);
        }

        let mut report = StoragePrepareReport::default();
        let mut errors = Vec::new();

        if opts.scope.includes_scm() {
            match self.pmem.prepare(&opts.pmem) {
                Ok(outcome) => report.scm = Some(outcome),
                Err(e) => {
                    tracing::warn!(error = %e, "PMem prepare failed");
                    errors.push(e);
                }
            }
        }

        if opts.scope.includes_nvme() {
            match self.nvme.prepare(&opts.nvme) {
                Ok(resp) => report.nvme = Some(resp),
                Err(e) => {
                    tracing::warn!(error = %e, "NVMe prepare failed");
                    errors.push(e);
                }
            }
        }

        match ProvisionError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

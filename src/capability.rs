// VFIO/IOMMU capability gate and VMD enablement policy
//
// Non-privileged device access needs IOMMU backed VFIO isolation; root may
// do without either. These checks run before any backend call.

use crate::platform::ROOT_USER;
use crate::{ProvisionError, ProvisionResult};
use std::fmt;

/// Reject VFIO/IOMMU combinations the target user can not operate with
pub fn validate_capability(
    target_user: &str,
    disable_vfio: bool,
    iommu_enabled: bool,
) -> ProvisionResult<()> {
    if target_user == ROOT_USER {
        return Ok(());
    }

    if disable_vfio {
        return Err(ProvisionError::NonRootVfioDisable(target_user.to_string()));
    }
    if !iommu_enabled {
        return Err(ProvisionError::NoIommu(target_user.to_string()));
    }

    Ok(())
}

/// Why VMD was left disabled for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmdSkipReason {
    ConfigDisabled,
    CliDisabled,
    VfioDisabled,
    NoIommu,
}

impl fmt::Display for VmdSkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmdSkipReason::ConfigDisabled => write!(f, "VMD disabled in config"),
            VmdSkipReason::CliDisabled => write!(f, "VMD disabled on command line"),
            VmdSkipReason::VfioDisabled => write!(f, "VMD requires VFIO which is disabled"),
            VmdSkipReason::NoIommu => write!(f, "VMD requires IOMMU which is not enabled"),
        }
    }
}

/// Inputs deciding whether VMD-aware handling is requested
#[derive(Debug, Clone, Copy, Default)]
pub struct VmdPolicy {
    pub config_disabled: bool,
    pub cli_disabled: bool,
    pub vfio_disabled: bool,
    pub iommu_enabled: bool,
}

impl VmdPolicy {
    /// First unmet condition, in priority order
    pub fn skip_reason(&self) -> Option<VmdSkipReason> {
        if self.config_disabled {
            Some(VmdSkipReason::ConfigDisabled)
        } else if self.cli_disabled {
            Some(VmdSkipReason::CliDisabled)
        } else if self.vfio_disabled {
            Some(VmdSkipReason::VfioDisabled)
        } else if !self.iommu_enabled {
            Some(VmdSkipReason::NoIommu)
        } else {
            None
        }
    }

    /// Whether to enable VMD, logging the reason when it is skipped
    pub fn resolve(&self) -> bool {
        match self.skip_reason() {
            Some(reason) => {
                tracing::info!(reason = %reason, "VMD not enabled");
                false
            }
            None => {
                tracing::debug!("VMD enabled");
                true
            }
        }
    }
}

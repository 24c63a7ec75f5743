// Allow uppercase acronyms for industry-standard terms like PCI, VMD, SCM
#![allow(clippy::upper_case_acronyms)]

//! Local storage device provisioning.
//!
//! Prepares persistent memory (PMem/SCM) modules and NVMe SSDs on a single
//! host so they can be handed to a storage engine. The decision logic lives
//! here; the privileged operations themselves go through the
//! [`backend::BdevBackend`] and [`backend::ScmBackend`] seams.

pub mod backend;
pub mod bdev;
pub mod capability;
pub mod config;
pub mod pci;
pub mod platform;
pub mod scm;
pub mod storage_orchestrator;

// Re-export the orchestrators for convenience
pub use bdev::provisioner::NvmeProvisioner;
pub use bdev::scan::NvmeScanCoordinator;
pub use scm::provisioner::PmemProvisioner;
pub use storage_orchestrator::StorageOrchestrator;

use scm::{ScmOperation, ScmState};
use std::fmt;
use thiserror::Error;

/// Operation name used when the SPDK cleanup pass fails.
pub const CLEANUP_OP: &str = "spdk cleanup";

/// Errors surfaced by the provisioning core
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("invalid PCI address {0:?}")]
    InvalidAddress(String),

    #[error("VFIO can not be disabled when running as non-root user {0:?}")]
    NonRootVfioDisable(String),

    #[error("IOMMU is required to access NVMe devices as non-root user {0:?}, enable IOMMU or run as root")]
    NoIommu(String),

    #[error("hugepages are disabled in config but NVMe provisioning requires them")]
    HugepagesDisabled,

    #[error("number of PMem namespaces per socket must be at least 1, got {0}")]
    InvalidNamespaceCount(u32),

    #[error("--force is required in JSON output mode, consent can not be prompted for")]
    NoForceWithJson,

    #[error("failed to report state of PMem")]
    FailedToReportState,

    #[error("no PMem modules found")]
    NoPmem,

    #[error("PMem regions were not created and no reboot was requested")]
    FailedToCreateRegions,

    #[error("PMem namespaces were not created on free region capacity")]
    FailedToCreateNamespaces,

    #[error("no PMem namespaces found after prepare")]
    FailedToFindNamespaces,

    #[error("unexpected PMem state {state} after {op}")]
    UnexpectedState { op: ScmOperation, state: ScmState },

    #[error("inconsistent PMem response: reboot required in state {state} after {op}")]
    InconsistentRebootState { op: ScmOperation, state: ScmState },

    #[error("{op}: {source:#}")]
    Backend {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("nvme prepare before scan failed, run nvme prepare and retry with --skip-prep: {0}")]
    PrepBeforeScan(#[source] Box<ProvisionError>),

    #[error("config error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}", join_errors(.0))]
    Aggregate(Vec<ProvisionError>),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

impl ProvisionError {
    /// Wrap a backend failure with the operation it came from
    pub fn backend(op: &'static str, source: anyhow::Error) -> Self {
        ProvisionError::Backend { op, source }
    }

    /// Combine independent failures, unwrapping the single-error case
    pub fn aggregate(mut errors: Vec<ProvisionError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ProvisionError::Aggregate(errors)),
        }
    }

    /// Classify the error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::InvalidAddress(_)
            | ProvisionError::NonRootVfioDisable(_)
            | ProvisionError::NoIommu(_)
            | ProvisionError::HugepagesDisabled
            | ProvisionError::InvalidNamespaceCount(_) => ErrorKind::Validation,
            ProvisionError::NoForceWithJson => ErrorKind::Consent,
            ProvisionError::FailedToReportState
            | ProvisionError::NoPmem
            | ProvisionError::FailedToCreateRegions
            | ProvisionError::FailedToCreateNamespaces
            | ProvisionError::FailedToFindNamespaces
            | ProvisionError::UnexpectedState { .. }
            | ProvisionError::InconsistentRebootState { .. } => ErrorKind::StateMachine,
            ProvisionError::Backend { op, .. } if *op == CLEANUP_OP => ErrorKind::Cleanup,
            ProvisionError::Backend { .. } | ProvisionError::Io(_) => ErrorKind::Backend,
            ProvisionError::PrepBeforeScan(inner) => inner.kind(),
            ProvisionError::Config(_) => ErrorKind::Config,
            ProvisionError::Aggregate(_) => ErrorKind::Aggregate,
        }
    }
}

fn join_errors(errors: &[ProvisionError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Broad error classes used to decide how a failure is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, fixed by correcting the request
    Validation,

    /// User-directed refusal, not a fault
    Consent,

    /// Backend response violated the PMem state contract
    StateMachine,

    /// Backend call failed
    Backend,

    /// Best-effort resource cleanup failed
    Cleanup,

    /// Host storage configuration could not be loaded
    Config,

    /// Several independent operations failed
    Aggregate,
}

impl ErrorKind {
    /// Whether this failure should be logged as an error
    pub fn is_fault(&self) -> bool {
        !matches!(self, ErrorKind::Consent)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "Validation"),
            ErrorKind::Consent => write!(f, "Consent"),
            ErrorKind::StateMachine => write!(f, "StateMachine"),
            ErrorKind::Backend => write!(f, "Backend"),
            ErrorKind::Cleanup => write!(f, "Cleanup"),
            ErrorKind::Config => write!(f, "Config"),
            ErrorKind::Aggregate => write!(f, "Aggregate"),
        }
    }
}

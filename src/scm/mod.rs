// Persistent memory (PMem/SCM) provisioning
//
// - consent.rs: operator confirmation before destructive changes
// - provisioner.rs: prepare/reset response state machine

pub mod consent;
pub mod provisioner;


pub use consent::{ConsentPrompt, StdinConsent};
pub use provisioner::{PmemOptions, PmemOutcome, PmemProvisioner};

use serde::{Deserialize, Serialize};
use std::fmt;

/// PMem socket state reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScmState {
    #[default]
    Unknown,
    NoModules,
    NoRegions,
    FreeCap,
    NoFreeCap,
    PartFreeCap,
    NotInterleaved,
    NotHealthy,
    UnknownMode,
}

impl fmt::Display for ScmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScmState::Unknown => "unknown",
            ScmState::NoModules => "no modules",
            ScmState::NoRegions => "no regions",
            ScmState::FreeCap => "free capacity",
            ScmState::NoFreeCap => "no free capacity",
            ScmState::PartFreeCap => "partial free capacity",
            ScmState::NotInterleaved => "not interleaved",
            ScmState::NotHealthy => "not healthy",
            ScmState::UnknownMode => "unknown memory mode",
        };
        f.write_str(name)
    }
}

/// Which PMem operation produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScmOperation {
    Prepare,
    Reset,
}

impl fmt::Display for ScmOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScmOperation::Prepare => write!(f, "prepare"),
            ScmOperation::Reset => write!(f, "reset"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmPrepareRequest {
    /// `None` operates on all sockets
    pub socket_id: Option<u32>,
    pub nr_namespaces_per_socket: u32,
    pub reset: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmSocketState {
    pub state: ScmState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmemNamespace {
    pub uuid: String,
    pub blockdev: String,
    #[serde(default)]
    pub name: String,
    pub numa_node: u32,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmPrepareResponse {
    pub socket: ScmSocketState,
    #[serde(default)]
    pub reboot_required: bool,
    #[serde(default)]
    pub namespaces: Vec<PmemNamespace>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmScanRequest {
    pub socket_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmModule {
    pub uid: String,
    pub socket_id: u32,
    pub controller_id: u32,
    pub channel_id: u32,
    pub channel_position: u32,
    pub capacity: u64,
    #[serde(default)]
    pub firmware_revision: String,
    #[serde(default)]
    pub health_state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmScanResponse {
    #[serde(default)]
    pub modules: Vec<ScmModule>,
    #[serde(default)]
    pub namespaces: Vec<PmemNamespace>,
}

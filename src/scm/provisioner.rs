// PMem prepare/reset orchestration
//
// The backend reports the socket state reached after the call. Each state is
// final for this invocation: success, a fault, or a reboot advisory.

use super::consent::{ConsentPrompt, PREPARE_WARNING, RESET_WARNING};
use super::{
    PmemNamespace, ScmOperation, ScmPrepareRequest, ScmPrepareResponse, ScmScanRequest,
    ScmScanResponse, ScmState,
};
use crate::backend::ScmBackend;
use crate::{ProvisionError, ProvisionResult};
use serde::Serialize;

pub const SCM_PREPARE_OP: &str = "scm prepare backend";
pub const SCM_RESET_OP: &str = "scm reset backend";
pub const SCM_SCAN_OP: &str = "scm scan backend";

pub const MSG_REGIONS_ON_REBOOT: &str = "PMem regions will be created on reboot";
pub const MSG_RESET_SUCCESSFUL: &str = "PMem reset successful";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmemOptions {
    /// `None` operates on all sockets
    pub socket_id: Option<u32>,
    pub ns_per_socket: u32,
    /// Skip the consent prompt
    pub force: bool,
    /// Machine readable output, consent can not be prompted for
    pub json_output: bool,
}

impl Default for PmemOptions {
    fn default() -> Self {
        Self {
            socket_id: None,
            ns_per_socket: 1,
            force: false,
            json_output: false,
        }
    }
}

/// Final result of a PMem operation that did not fail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PmemOutcome {
    /// Operator declined, nothing was changed
    ConsentDeclined,
    RebootRequired { state: ScmState, message: String },
    Prepared { namespaces: Vec<PmemNamespace> },
    ResetComplete,
}

impl PmemOutcome {
    fn reboot(state: ScmState, message: &str) -> Self {
        PmemOutcome::RebootRequired {
            state,
            message: message.to_string(),
        }
    }
}

/// Creates and removes PMem regions and namespaces
pub struct PmemProvisioner<'a, B: ScmBackend, C: ConsentPrompt + ?Sized> {
    backend: B,
    consent: &'a C,
}

impl<'a, B: ScmBackend, C: ConsentPrompt + ?Sized> PmemProvisioner<'a, B, C> {
    pub fn new(backend: B, consent: &'a C) -> Self {
        Self { backend, consent }
    }

    /// Create regions and `ns_per_socket` namespaces on each targeted socket
    pub fn prepare(&self, opts: &PmemOptions) -> ProvisionResult<PmemOutcome> {
        if opts.ns_per_socket < 1 {
            return Err(ProvisionError::InvalidNamespaceCount(opts.ns_per_socket));
        }
        if !self.obtain_consent(opts, PREPARE_WARNING)? {
            return Ok(PmemOutcome::ConsentDeclined);
        }

        let req = ScmPrepareRequest {
            socket_id: opts.socket_id,
            nr_namespaces_per_socket: opts.ns_per_socket,
            reset: false,
        };
        tracing::debug!(request = ?req, "PMem prepare");

        let resp = self
            .backend
            .prepare(&req)
            .map_err(|e| ProvisionError::backend(SCM_PREPARE_OP, e))?;

        let outcome = interpret_prepare(resp)?;
        tracing::info!(outcome = ?outcome, "PMem prepare finished");
        Ok(outcome)
    }

    /// Remove namespaces and regions on each targeted socket
    pub fn reset(&self, opts: &PmemOptions) -> ProvisionResult<PmemOutcome> {
        if !self.obtain_consent(opts, RESET_WARNING)? {
            return Ok(PmemOutcome::ConsentDeclined);
        }

        let req = ScmPrepareRequest {
            socket_id: opts.socket_id,
            nr_namespaces_per_socket: 0,
            reset: true,
        };
        tracing::debug!(request = ?req, "PMem reset");

        let resp = self
            .backend
            .prepare(&req)
            .map_err(|e| ProvisionError::backend(SCM_RESET_OP, e))?;

        let outcome = interpret_reset(resp)?;
        tracing::info!(outcome = ?outcome, "PMem reset finished");
        Ok(outcome)
    }

    pub fn scan(&self, socket_id: Option<u32>) -> ProvisionResult<ScmScanResponse> {
        self.backend
            .scan(&ScmScanRequest { socket_id })
            .map_err(|e| ProvisionError::backend(SCM_SCAN_OP, e))
    }

    fn obtain_consent(&self, opts: &PmemOptions, warning: &str) -> ProvisionResult<bool> {
        if opts.force {
            return Ok(true);
        }
        if opts.json_output {
            return Err(ProvisionError::NoForceWithJson);
        }

        let consented = self.consent.confirm(warning)?;
        if !consented {
            tracing::info!("Operation cancelled by user");
        }
        Ok(consented)
    }
}

/// Classify the backend response to a prepare
pub fn interpret_prepare(resp: ScmPrepareResponse) -> ProvisionResult<PmemOutcome> {
    let state = resp.socket.state;

    if resp.reboot_required {
        return match state {
            ScmState::NoRegions => Ok(PmemOutcome::reboot(state, MSG_REGIONS_ON_REBOOT)),
            _ => Err(ProvisionError::InconsistentRebootState {
                op: ScmOperation::Prepare,
                state,
            }),
        };
    }

    match state {
        ScmState::Unknown => Err(ProvisionError::FailedToReportState),
        ScmState::NoModules => Err(ProvisionError::NoPmem),
        ScmState::NoRegions => Err(ProvisionError::FailedToCreateRegions),
        ScmState::FreeCap => Err(ProvisionError::FailedToCreateNamespaces),
        ScmState::NoFreeCap if resp.namespaces.is_empty() => {
            Err(ProvisionError::FailedToFindNamespaces)
        }
        ScmState::NoFreeCap => Ok(PmemOutcome::Prepared {
            namespaces: resp.namespaces,
        }),
        _ => Err(ProvisionError::UnexpectedState {
            op: ScmOperation::Prepare,
            state,
        }),
    }
}

/// Classify the backend response to a reset
pub fn interpret_reset(resp: ScmPrepareResponse) -> ProvisionResult<PmemOutcome> {
    let state = resp.socket.state;

    if resp.reboot_required {
        let message = match state {
            ScmState::NotInterleaved => {
                "PMem regions are not interleaved and will be removed on reboot"
            }
            ScmState::FreeCap => "PMem regions with free capacity will be removed on reboot",
            ScmState::NoFreeCap => "PMem namespaces and regions will be removed on reboot",
            ScmState::PartFreeCap => {
                "PMem regions with partially allocated capacity will be removed on reboot"
            }
            ScmState::NotHealthy => "Unhealthy PMem regions will be removed on reboot",
            ScmState::UnknownMode => {
                "PMem regions in an unknown memory mode will be removed on reboot"
            }
            _ => {
                return Err(ProvisionError::InconsistentRebootState {
                    op: ScmOperation::Reset,
                    state,
                })
            }
        };
        return Ok(PmemOutcome::reboot(state, message));
    }

    match state {
        ScmState::NoRegions => {
            tracing::info!("{}", MSG_RESET_SUCCESSFUL);
            Ok(PmemOutcome::ResetComplete)
        }
        ScmState::NoModules => Err(ProvisionError::NoPmem),
        _ => Err(ProvisionError::UnexpectedState {
            op: ScmOperation::Reset,
            state,
        }),
    }
}

// Backend that forwards requests to a privileged helper process
//
// One request per invocation: the helper reads a JSON envelope on stdin and
// writes a JSON envelope to stdout before exiting.

use super::{BdevBackend, ScmBackend};
use crate::bdev::{BdevPrepareRequest, BdevPrepareResponse, BdevScanRequest, BdevScanResponse};
use crate::scm::{ScmPrepareRequest, ScmPrepareResponse, ScmScanRequest, ScmScanResponse};
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Helper method names
pub mod method {
    pub const BDEV_PREPARE: &str = "BdevPrepare";
    pub const BDEV_RESET: &str = "BdevReset";
    pub const BDEV_SCAN: &str = "BdevScan";
    pub const SCM_PREPARE: &str = "ScmPrepare";
    pub const SCM_RESET: &str = "ScmReset";
    pub const SCM_SCAN: &str = "ScmScan";
}

#[derive(Debug, Serialize)]
struct RequestEnvelope<'a, T> {
    method: &'a str,
    payload: &'a T,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope<T> {
    #[serde(default)]
    error: Option<String>,
    payload: Option<T>,
}

/// Runs the privileged helper binary for each backend call
#[derive(Debug, Clone)]
pub struct HelperBackend {
    helper_path: PathBuf,
}

impl HelperBackend {
    pub fn new(helper_path: impl Into<PathBuf>) -> Self {
        Self {
            helper_path: helper_path.into(),
        }
    }

    fn call<Req, Resp>(&self, method: &str, payload: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let request = serde_json::to_vec(&RequestEnvelope { method, payload })
            .with_context(|| format!("Failed to encode {} request", method))?;

        tracing::debug!(helper = %self.helper_path.display(), method, "Invoking helper");

        let mut child = Command::new(&self.helper_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to start helper {}", self.helper_path.display()))?;

        // stdin is dropped at the end of the match arm so the helper sees EOF
        let sent = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&request),
            None => Err(io::Error::other("helper stdin unavailable")),
        };

        // Reap the helper even when the request could not be delivered
        let output = child
            .wait_with_output()
            .context("Failed to wait for helper")?;

        if let Err(e) = sent {
            return Err(anyhow!(e).context(format!(
                "Failed to send {} request to helper, which exited with {}",
                method, output.status
            )));
        }

        if !output.status.success() {
            return Err(anyhow!("Helper {} exited with {}", method, output.status));
        }

        decode_response(method, &output.stdout)
    }
}

fn decode_response<Resp: DeserializeOwned>(method: &str, raw: &[u8]) -> Result<Resp> {
    let envelope: ResponseEnvelope<Resp> = serde_json::from_slice(raw)
        .with_context(|| format!("Malformed {} response from helper", method))?;

    if let Some(err) = envelope.error {
        return Err(anyhow!("{}", err));
    }

    envelope
        .payload
        .ok_or_else(|| anyhow!("Helper returned no payload for {}", method))
}

impl BdevBackend for HelperBackend {
    fn prepare(&self, req: &BdevPrepareRequest) -> Result<BdevPrepareResponse> {
        self.call(method::BDEV_PREPARE, req)
    }

    fn reset(&self, req: &BdevPrepareRequest) -> Result<BdevPrepareResponse> {
        self.call(method::BDEV_RESET, req)
    }

    fn scan(&self, req: &BdevScanRequest) -> Result<BdevScanResponse> {
        self.call(method::BDEV_SCAN, req)
    }
}

impl ScmBackend for HelperBackend {
    fn prepare(&self, req: &ScmPrepareRequest) -> Result<ScmPrepareResponse> {
        let method = if req.reset {
            method::SCM_RESET
        } else {
            method::SCM_PREPARE
        };
        self.call(method, req)
    }

    fn scan(&self, req: &ScmScanRequest) -> Result<ScmScanResponse> {
        self.call(method::SCM_SCAN, req)
    }
}

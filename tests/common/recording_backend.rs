/// Backend that records every request and answers from scripted queues
///
/// Requests are recorded in call order across all methods so tests can
/// assert on the exact sequence the orchestrators issue. A method with an
/// empty queue answers with the default response.
use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use storage_prep::backend::{BdevBackend, ScmBackend};
use storage_prep::bdev::{BdevPrepareRequest, BdevPrepareResponse, BdevScanRequest, BdevScanResponse};
use storage_prep::scm::{ScmPrepareRequest, ScmPrepareResponse, ScmScanRequest, ScmScanResponse};

/// One recorded backend call
#[derive(Clone, Debug, PartialEq)]
#[allow(dead_code)]
pub enum Call {
    BdevCleanup(BdevPrepareRequest),
    BdevPrepare(BdevPrepareRequest),
    BdevReset(BdevPrepareRequest),
    BdevScan(BdevScanRequest),
    ScmPrepare(ScmPrepareRequest),
    ScmScan(ScmScanRequest),
}

type Scripted<T> = Mutex<VecDeque<Result<T, String>>>;

#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingBackend {
    calls: Arc<Mutex<Vec<Call>>>,
    cleanup: Scripted<BdevPrepareResponse>,
    prepare: Scripted<BdevPrepareResponse>,
    reset: Scripted<BdevPrepareResponse>,
    bdev_scan: Scripted<BdevScanResponse>,
    scm_prepare: Scripted<ScmPrepareResponse>,
    scm_scan: Scripted<ScmScanResponse>,
}

#[allow(dead_code)]
impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn on_cleanup(self, resp: Result<BdevPrepareResponse, &str>) -> Self {
        push(&self.cleanup, resp);
        self
    }

    pub fn on_prepare(self, resp: Result<BdevPrepareResponse, &str>) -> Self {
        push(&self.prepare, resp);
        self
    }

    pub fn on_reset(self, resp: Result<BdevPrepareResponse, &str>) -> Self {
        push(&self.reset, resp);
        self
    }

    pub fn on_bdev_scan(self, resp: Result<BdevScanResponse, &str>) -> Self {
        push(&self.bdev_scan, resp);
        self
    }

    pub fn on_scm_prepare(self, resp: Result<ScmPrepareResponse, &str>) -> Self {
        push(&self.scm_prepare, resp);
        self
    }

    pub fn on_scm_scan(self, resp: Result<ScmScanResponse, &str>) -> Self {
        push(&self.scm_scan, resp);
        self
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn push<T>(queue: &Scripted<T>, resp: Result<T, &str>) {
    queue
        .lock()
        .unwrap()
        .push_back(resp.map_err(|e| e.to_string()));
}

fn next<T: Default>(queue: &Scripted<T>) -> Result<T> {
    match queue.lock().unwrap().pop_front() {
        Some(Ok(resp)) => Ok(resp),
        Some(Err(msg)) => Err(anyhow!(msg)),
        None => Ok(T::default()),
    }
}

impl BdevBackend for RecordingBackend {
    fn prepare(&self, req: &BdevPrepareRequest) -> Result<BdevPrepareResponse> {
        if req.clean_hugepages_only {
            self.record(Call::BdevCleanup(req.clone()));
            return next(&self.cleanup);
        }
        self.record(Call::BdevPrepare(req.clone()));
        next(&self.prepare)
    }

    fn reset(&self, req: &BdevPrepareRequest) -> Result<BdevPrepareResponse> {
        self.record(Call::BdevReset(req.clone()));
        next(&self.reset)
    }

    fn scan(&self, req: &BdevScanRequest) -> Result<BdevScanResponse> {
        self.record(Call::BdevScan(req.clone()));
        next(&self.bdev_scan)
    }
}

impl ScmBackend for RecordingBackend {
    fn prepare(&self, req: &ScmPrepareRequest) -> Result<ScmPrepareResponse> {
        self.record(Call::ScmPrepare(req.clone()));
        next(&self.scm_prepare)
    }

    fn scan(&self, req: &ScmScanRequest) -> Result<ScmScanResponse> {
        self.record(Call::ScmScan(req.clone()));
        next(&self.scm_scan)
    }
}

// Provisioning backend seams
//
// The privileged operations (driver binding, region and namespace creation)
// live behind these traits. Orchestrators receive a backend at construction
// time and only interpret its responses.

pub mod helper;

pub use helper::HelperBackend;

use crate::bdev::{BdevPrepareRequest, BdevPrepareResponse, BdevScanRequest, BdevScanResponse};
use crate::scm::{ScmPrepareRequest, ScmPrepareResponse, ScmScanRequest, ScmScanResponse};
use anyhow::Result;

/// NVMe device preparation backend
#[cfg_attr(test, mockall::automock)]
pub trait BdevBackend {
    /// Bind devices for user-space access, or clean SPDK resources when
    /// only cleanup flags are set
    fn prepare(&self, req: &BdevPrepareRequest) -> Result<BdevPrepareResponse>;

    /// Return devices to their kernel drivers
    fn reset(&self, req: &BdevPrepareRequest) -> Result<BdevPrepareResponse>;

    fn scan(&self, req: &BdevScanRequest) -> Result<BdevScanResponse>;
}

/// PMem region and namespace backend
#[cfg_attr(test, mockall::automock)]
pub trait ScmBackend {
    /// Create regions and namespaces; `req.reset` removes them instead
    fn prepare(&self, req: &ScmPrepareRequest) -> Result<ScmPrepareResponse>;

    fn scan(&self, req: &ScmScanRequest) -> Result<ScmScanResponse>;
}

impl<T: BdevBackend + ?Sized> BdevBackend for &T {
    fn prepare(&self, req: &BdevPrepareRequest) -> Result<BdevPrepareResponse> {
        (**self).prepare(req)
    }

    fn reset(&self, req: &BdevPrepareRequest) -> Result<BdevPrepareResponse> {
        (**self).reset(req)
    }

    fn scan(&self, req: &BdevScanRequest) -> Result<BdevScanResponse> {
        (**self).scan(req)
    }
}

impl<T: ScmBackend + ?Sized> ScmBackend for &T {
    fn prepare(&self, req: &ScmPrepareRequest) -> Result<ScmPrepareResponse> {
        (**self).prepare(req)
    }

    fn scan(&self, req: &ScmScanRequest) -> Result<ScmScanResponse> {
        (**self).scan(req)
    }
}

// Tests for NVMe prepare/reset execution and the scan bracket

use super::provisioner::*;
use super::request::NvmeOptions;
use super::scan::{NvmeScanCoordinator, ScanOptions, NVME_SCAN_OP};
use super::*;
use crate::backend::MockBdevBackend;
use crate::platform::MockHostPlatform;
use crate::{ErrorKind, ProvisionError};
use anyhow::anyhow;
use mockall::Sequence;

fn root_platform() -> MockHostPlatform {
    let mut platform = MockHostPlatform::new();
    platform.expect_iommu_enabled().return_const(true);
    platform
        .expect_effective_user()
        .returning(|| Ok("root".to_string()));
    platform
}

fn is_cleanup(req: &BdevPrepareRequest) -> bool {
    req.clean_hugepages_only
}

fn controller(addr: &str) -> NvmeController {
    NvmeController {
        pci_addr: addr.to_string(),
        model: "INTEL SSDPE2KE016T8".to_string(),
        serial: "PHLN0000000001".to_string(),
        fw_rev: "VDV10170".to_string(),
        socket_id: Some(0),
        namespaces: vec![NvmeNamespace {
            id: 1,
            size: 1600 << 30,
        }],
    }
}

// ==================== PREPARE TESTS ====================

#[test]
fn test_prepare_cleans_then_binds() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();
    let mut seq = Sequence::new();

    backend
        .expect_prepare()
        .withf(|req| is_cleanup(req) && req.clean_spdk_lockfiles && !req.clean_spdk_lockfiles_any)
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_prepare()
        .withf(|req| !is_cleanup(req) && req.pci_allow_list == "0000:01:00.0")
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(BdevPrepareResponse::default()));

    let opts = NvmeOptions {
        pci_allow_list: "0000:01:00.0".to_string(),
        ..Default::default()
    };
    NvmeProvisioner::new(backend, None, &platform)
        .prepare(&opts)
        .unwrap();
}

#[test]
fn test_prepare_applies_hugepage_floor() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();

    backend
        .expect_prepare()
        .withf(|req| is_cleanup(req))
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_prepare()
        .withf(|req| !is_cleanup(req) && req.hugepage_count == SCAN_MIN_HUGEPAGE_COUNT)
        .times(1)
        .returning(|_| Ok(BdevPrepareResponse::default()));

    let opts = NvmeOptions {
        hugepages: Some(2),
        ..Default::default()
    };
    NvmeProvisioner::new(backend, None, &platform)
        .prepare(&opts)
        .unwrap();
}

#[test]
fn test_cleanup_failure_is_not_propagated() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();

    backend
        .expect_prepare()
        .withf(|req| is_cleanup(req))
        .times(1)
        .returning(|_| Err(anyhow!("permission denied removing /dev/hugepages/spdk_pid1map_0")));
    backend
        .expect_prepare()
        .withf(|req| !is_cleanup(req))
        .times(1)
        .returning(|_| Ok(BdevPrepareResponse::default()));

    assert!(NvmeProvisioner::new(backend, None, &platform)
        .prepare(&NvmeOptions::default())
        .is_ok());
}

#[test]
fn test_prepare_backend_error_is_wrapped() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();

    backend
        .expect_prepare()
        .withf(|req| is_cleanup(req))
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_prepare()
        .withf(|req| !is_cleanup(req))
        .returning(|_| Err(anyhow!("setup.sh exited with status 1")));

    let err = NvmeProvisioner::new(backend, None, &platform)
        .prepare(&NvmeOptions::default())
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Backend { op: NVME_PREPARE_OP, .. }));
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert!(err.to_string().contains("setup.sh exited with status 1"));
}

#[test]
fn test_validation_failure_skips_backend() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();
    backend.expect_prepare().never();

    let opts = NvmeOptions {
        pci_allow_list: "0000:zz:00.0".to_string(),
        ..Default::default()
    };
    let err = NvmeProvisioner::new(backend, None, &platform)
        .prepare(&opts)
        .unwrap_err();
    assert!(matches!(err, ProvisionError::InvalidAddress(_)));
}

// ==================== RESET TESTS ====================

#[test]
fn test_reset_single_pass_without_vmd() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();

    backend
        .expect_prepare()
        .withf(|req| is_cleanup(req))
        .times(1)
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_reset()
        .withf(|req| req.reset && req.hugepage_count == 0)
        .times(1)
        .returning(|_| Ok(BdevPrepareResponse::default()));

    NvmeProvisioner::new(backend, None, &platform)
        .reset(&NvmeOptions::default())
        .unwrap();
}

#[test]
fn test_reset_twice_when_vmd_prepared() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();
    let mut seq = Sequence::new();

    backend
        .expect_prepare()
        .withf(|req| is_cleanup(req))
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_reset()
        .withf(|req| req.pci_allow_list == "0000:5d:05.5" && req.enable_vmd)
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(BdevPrepareResponse {
                vmd_prepared: true,
                ..Default::default()
            })
        });
    backend
        .expect_reset()
        .withf(|req| {
            req.reset
                && req.pci_allow_list.is_empty()
                && req.pci_block_list.is_empty()
                && !req.enable_vmd
        })
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(BdevPrepareResponse::default()));

    let opts = NvmeOptions {
        pci_allow_list: "0000:5d:05.5".to_string(),
        ..Default::default()
    };
    let resp = NvmeProvisioner::new(backend, None, &platform)
        .reset(&opts)
        .unwrap();

    // First pass response is reported
    assert!(resp.vmd_prepared);
}

#[test]
fn test_vmd_followup_failure_is_reported() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();

    backend
        .expect_prepare()
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_reset()
        .withf(|req| req.enable_vmd)
        .returning(|_| {
            Ok(BdevPrepareResponse {
                vmd_prepared: true,
                ..Default::default()
            })
        });
    backend
        .expect_reset()
        .withf(|req| !req.enable_vmd)
        .returning(|_| Err(anyhow!("device busy")));

    let err = NvmeProvisioner::new(backend, None, &platform)
        .reset(&NvmeOptions::default())
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Backend { op: NVME_VMD_RESET_OP, .. }));
}

#[test]
fn test_reset_backend_error_is_wrapped() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();

    backend
        .expect_prepare()
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_reset()
        .times(1)
        .returning(|_| Err(anyhow!("driver unbind failed")));

    let err = NvmeProvisioner::new(backend, None, &platform)
        .reset(&NvmeOptions::default())
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Backend { op: NVME_RESET_OP, .. }));
}

// ==================== SCAN TESTS ====================

fn bracket_backend(
    scan: fn() -> anyhow::Result<BdevScanResponse>,
    reset: fn() -> anyhow::Result<BdevPrepareResponse>,
) -> MockBdevBackend {
    let mut backend = MockBdevBackend::new();
    backend
        .expect_prepare()
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend.expect_scan().times(1).returning(move |_| scan());
    backend.expect_reset().times(1).returning(move |_| reset());
    backend
}

#[test]
fn test_scan_prepares_scans_and_resets() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();
    let mut seq = Sequence::new();

    backend
        .expect_prepare()
        .withf(|req| is_cleanup(req))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_prepare()
        .withf(|req| !is_cleanup(req))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_scan()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(BdevScanResponse {
                controllers: vec![controller("0000:81:00.0")],
            })
        });
    backend
        .expect_prepare()
        .withf(|req| is_cleanup(req))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_reset()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(BdevPrepareResponse::default()));

    let resp = NvmeScanCoordinator::new(backend, None, &platform)
        .scan(&ScanOptions::default())
        .unwrap();
    assert_eq!(resp.controllers.len(), 1);
    assert_eq!(resp.controllers[0].capacity(), 1600 << 30);
}

#[test]
fn test_scan_error_wins_over_reset_error() {
    let platform = root_platform();
    let backend = bracket_backend(
        || Err(anyhow!("scan failed")),
        || Err(anyhow!("reset failed")),
    );

    let err = NvmeScanCoordinator::new(backend, None, &platform)
        .scan(&ScanOptions::default())
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Backend { op: NVME_SCAN_OP, .. }));
    assert!(err.to_string().contains("scan failed"));
}

#[test]
fn test_scan_error_with_good_reset() {
    let platform = root_platform();
    let backend = bracket_backend(
        || Err(anyhow!("scan failed")),
        || Ok(BdevPrepareResponse::default()),
    );

    let err = NvmeScanCoordinator::new(backend, None, &platform)
        .scan(&ScanOptions::default())
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Backend { op: NVME_SCAN_OP, .. }));
}

#[test]
fn test_reset_error_after_good_scan() {
    let platform = root_platform();
    let backend = bracket_backend(
        || Ok(BdevScanResponse::default()),
        || Err(anyhow!("reset failed")),
    );

    let err = NvmeScanCoordinator::new(backend, None, &platform)
        .scan(&ScanOptions::default())
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Backend { op: NVME_RESET_OP, .. }));
}

#[test]
fn test_prepare_failure_aborts_scan() {
    let platform = root_platform();
    let mut backend = MockBdevBackend::new();

    backend
        .expect_prepare()
        .withf(|req| is_cleanup(req))
        .returning(|_| Ok(BdevPrepareResponse::default()));
    backend
        .expect_prepare()
        .withf(|req| !is_cleanup(req))
        .returning(|_| Err(anyhow!("no hugepages available")));
    backend.expect_scan().never();
    backend.expect_reset().never();

    let err = NvmeScanCoordinator::new(backend, None, &platform)
        .scan(&ScanOptions::default())
        .unwrap_err();
    assert!(matches!(err, ProvisionError::PrepBeforeScan(_)));
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert!(err.to_string().contains("--skip-prep"));
}

#[test]
fn test_skip_prep_scans_directly() {
    // Platform is never consulted without a prepare
    let platform = MockHostPlatform::new();
    let mut backend = MockBdevBackend::new();

    backend.expect_prepare().never();
    backend.expect_reset().never();
    backend
        .expect_scan()
        .times(1)
        .returning(|_| Ok(BdevScanResponse::default()));

    let opts = ScanOptions {
        skip_prep: true,
        ..Default::default()
    };
    NvmeScanCoordinator::new(backend, None, &platform)
        .scan(&opts)
        .unwrap();
}

#[test]
fn test_scan_restricted_to_config_devices() {
    use crate::config::{EngineConfig, ServerConfig, TierClass, TierConfig};

    let platform = MockHostPlatform::new();
    let cfg = ServerConfig::default().with_engine(
        EngineConfig::new().with_tier(
            TierConfig::new(TierClass::Nvme).with_bdev_list(["0000:82:00.0", "0000:81:00.0"]),
        ),
    );

    let mut backend = MockBdevBackend::new();
    backend
        .expect_scan()
        .withf(|req| req.device_list == "0000:81:00.0 0000:82:00.0")
        .times(1)
        .returning(|_| Ok(BdevScanResponse::default()));

    let opts = ScanOptions {
        skip_prep: true,
        ..Default::default()
    };
    NvmeScanCoordinator::new(backend, Some(&cfg), &platform)
        .scan(&opts)
        .unwrap();
}

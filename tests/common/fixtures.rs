/// Host platform and config fixtures
use anyhow::Result;
use std::collections::HashMap;
use std::io::Write;
use storage_prep::config::ServerConfig;
use storage_prep::platform::HostPlatform;
use tempfile::NamedTempFile;

/// Platform with fixed answers
#[derive(Clone, Debug)]
#[allow(dead_code)]
pub struct StaticPlatform {
    pub iommu: bool,
    pub user: String,
    pub iface_numa: HashMap<String, u32>,
}

#[allow(dead_code)]
impl StaticPlatform {
    pub fn root() -> Self {
        Self {
            iommu: true,
            user: "root".to_string(),
            iface_numa: HashMap::new(),
        }
    }

    pub fn user(name: &str, iommu: bool) -> Self {
        Self {
            iommu,
            user: name.to_string(),
            iface_numa: HashMap::new(),
        }
    }

    pub fn with_iface(mut self, iface: &str, node: u32) -> Self {
        self.iface_numa.insert(iface.to_string(), node);
        self
    }
}

impl HostPlatform for StaticPlatform {
    fn iommu_enabled(&self) -> bool {
        self.iommu
    }

    fn fabric_numa_node(&self, iface: &str) -> Option<u32> {
        self.iface_numa.get(iface).copied()
    }

    fn effective_user(&self) -> Result<String> {
        Ok(self.user.clone())
    }
}

/// Two engines, one per socket, each with a PMem tier and an NVMe tier
#[allow(dead_code)]
pub const TWO_ENGINE_YAML: &str = r#"
nr_hugepages: 4096
bdev_exclude: ["0000:e3:00.0"]
engines:
  - pinned_numa_node: 0
    storage:
      - class: dcpm
        scm_list: ["/dev/pmem0"]
        scm_mount: /mnt/daos0
      - class: nvme
        bdev_list: ["0000:81:00.0", "0000:82:00.0"]
  - fabric_iface: ib1
    scm_class: dcpm
    scm_list: ["/dev/pmem1"]
    scm_mount: /mnt/daos1
    bdev_class: nvme
    bdev_list: ["0000:da:00.0"]
"#;

/// Write `yaml` to a temporary file and load it
#[allow(dead_code)]
pub fn load_config(yaml: &str) -> (NamedTempFile, ServerConfig) {
    let mut file = tempfile::Builder::new()
        .suffix(".yml")
        .tempfile()
        .unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    let cfg = ServerConfig::load(file.path()).unwrap();
    (file, cfg)
}

// Host storage configuration
//
// Read-only input describing engines, their storage tiers and the global
// device filters. Both the multi-tier `storage:` layout and the legacy
// single-tier engine fields are accepted.

pub mod affinity;
pub mod devices;

pub use affinity::ScmSocketResolver;
pub use devices::ConfigDeviceResolver;

use crate::ProvisionResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Config file consulted when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/storage-prep/server.yml";

/// Privileged helper executed by the default backend
pub const DEFAULT_HELPER_PATH: &str = "/usr/bin/storage-prep-helper";

/// Storage tier class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierClass {
    /// tmpfs backed SCM emulation
    Ram,
    /// PMem App Direct namespaces
    Dcpm,
    Nvme,
    File,
    Kdev,
}

impl TierClass {
    pub fn is_scm(&self) -> bool {
        matches!(self, TierClass::Ram | TierClass::Dcpm)
    }
}

impl fmt::Display for TierClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierClass::Ram => write!(f, "ram"),
            TierClass::Dcpm => write!(f, "dcpm"),
            TierClass::Nvme => write!(f, "nvme"),
            TierClass::File => write!(f, "file"),
            TierClass::Kdev => write!(f, "kdev"),
        }
    }
}

/// One storage tier of an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub class: TierClass,

    #[serde(default)]
    pub scm_list: Vec<String>,

    #[serde(default)]
    pub scm_mount: Option<String>,

    #[serde(default)]
    pub bdev_list: Vec<String>,
}

impl TierConfig {
    pub fn new(class: TierClass) -> Self {
        Self {
            class,
            scm_list: Vec::new(),
            scm_mount: None,
            bdev_list: Vec::new(),
        }
    }

    pub fn with_bdev_list<S: Into<String>>(mut self, devices: impl IntoIterator<Item = S>) -> Self {
        self.bdev_list = devices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scm_list<S: Into<String>>(mut self, devices: impl IntoIterator<Item = S>) -> Self {
        self.scm_list = devices.into_iter().map(Into::into).collect();
        self
    }
}

/// Per-engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub pinned_numa_node: Option<u32>,

    #[serde(default)]
    pub fabric_iface: Option<String>,

    /// Multi-tier layout
    #[serde(default)]
    pub storage: Vec<TierConfig>,

    // Legacy single-tier layout
    #[serde(default)]
    pub scm_class: Option<TierClass>,
    #[serde(default)]
    pub scm_list: Vec<String>,
    #[serde(default)]
    pub scm_mount: Option<String>,
    #[serde(default)]
    pub bdev_class: Option<TierClass>,
    #[serde(default)]
    pub bdev_list: Vec<String>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pinned_numa_node(mut self, node: u32) -> Self {
        self.pinned_numa_node = Some(node);
        self
    }

    pub fn with_fabric_iface(mut self, iface: impl Into<String>) -> Self {
        self.fabric_iface = Some(iface.into());
        self
    }

    pub fn with_tier(mut self, tier: TierConfig) -> Self {
        self.storage.push(tier);
        self
    }

    /// Storage tiers, converting the legacy layout when no `storage` list is given
    pub fn tiers(&self) -> Vec<TierConfig> {
        if !self.storage.is_empty() {
            return self.storage.clone();
        }

        let mut tiers = Vec::new();
        if let Some(class) = self.scm_class {
            let mut tier = TierConfig::new(class).with_scm_list(self.scm_list.iter().cloned());
            tier.scm_mount = self.scm_mount.clone();
            tiers.push(tier);
        }
        if let Some(class) = self.bdev_class {
            tiers.push(TierConfig::new(class).with_bdev_list(self.bdev_list.iter().cloned()));
        }
        tiers
    }

    /// Class of the engine's SCM tier, if it has one
    pub fn scm_class(&self) -> Option<TierClass> {
        self.tiers()
            .into_iter()
            .map(|t| t.class)
            .find(TierClass::is_scm)
    }

    /// NVMe addresses listed across the engine's bdev tiers
    pub fn nvme_devices(&self) -> Vec<String> {
        self.tiers()
            .into_iter()
            .filter(|t| t.class == TierClass::Nvme)
            .flat_map(|t| t.bdev_list)
            .collect()
    }
}

/// Host storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub disable_vfio: bool,

    /// Absent means VMD is allowed
    #[serde(default)]
    pub disable_vmd: Option<bool>,

    #[serde(default)]
    pub disable_hugepages: bool,

    #[serde(default)]
    pub nr_hugepages: u32,

    #[serde(default)]
    pub bdev_exclude: Vec<String>,

    #[serde(default = "default_helper_path")]
    pub helper_path: PathBuf,

    #[serde(default)]
    pub engines: Vec<EngineConfig>,
}

fn default_helper_path() -> PathBuf {
    PathBuf::from(DEFAULT_HELPER_PATH)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            disable_vfio: false,
            disable_vmd: None,
            disable_hugepages: false,
            nr_hugepages: 0,
            bdev_exclude: Vec::new(),
            helper_path: default_helper_path(),
            engines: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load and deserialize a YAML config file
    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
            .build()?;

        let cfg: ServerConfig = settings.try_deserialize()?;
        tracing::debug!(path = %path.display(), engines = cfg.engines.len(), "Loaded config");
        Ok(cfg)
    }

    /// Resolve the config to use for this invocation.
    ///
    /// An explicit path must exist. Without one the default location is
    /// tried and a missing file means "no config".
    pub fn discover(explicit: Option<&Path>) -> ProvisionResult<Option<Self>> {
        if let Some(path) = explicit {
            return Self::load(path).map(Some);
        }

        let default = Path::new(DEFAULT_CONFIG_PATH);
        if !default.exists() {
            tracing::debug!(path = DEFAULT_CONFIG_PATH, "No config file, using defaults");
            return Ok(None);
        }
        Self::load(default).map(Some)
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engines.push(engine);
        self
    }

    pub fn with_bdev_exclude<S: Into<String>>(mut self, devices: impl IntoIterator<Item = S>) -> Self {
        self.bdev_exclude = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Whether VMD has been switched off in config
    pub fn vmd_disabled(&self) -> bool {
        self.disable_vmd.unwrap_or(false)
    }
}

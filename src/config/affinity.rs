// Socket selection for PMem operations from engine affinity

use super::{EngineConfig, ServerConfig, TierClass};
use crate::platform::HostPlatform;
use std::collections::BTreeSet;

/// Narrows PMem operations to a single socket when config allows it
pub struct ScmSocketResolver<'a, P: HostPlatform + ?Sized> {
    cfg: Option<&'a ServerConfig>,
    platform: &'a P,
}

impl<'a, P: HostPlatform + ?Sized> ScmSocketResolver<'a, P> {
    pub fn new(cfg: Option<&'a ServerConfig>, platform: &'a P) -> Self {
        Self { cfg, platform }
    }

    /// NUMA node an engine is bound to: the pinned node if configured,
    /// otherwise the node of its fabric interface
    pub fn engine_socket(&self, engine: &EngineConfig) -> Option<u32> {
        if let Some(node) = engine.pinned_numa_node {
            return Some(node);
        }

        engine
            .fabric_iface
            .as_deref()
            .and_then(|iface| self.platform.fabric_numa_node(iface))
    }

    /// Socket to target, or `None` to operate on all sockets
    pub fn resolve(&self) -> Option<u32> {
        let cfg = self.cfg?;

        let mut sockets = BTreeSet::new();
        for (idx, engine) in cfg.engines.iter().enumerate() {
            match engine.scm_class() {
                Some(class) if class != TierClass::Ram => {}
                _ => continue,
            }

            match self.engine_socket(engine) {
                Some(socket) => {
                    sockets.insert(socket);
                }
                None => {
                    tracing::debug!(engine = idx, "Engine affinity unknown, targeting all sockets");
                    return None;
                }
            }
        }

        if sockets.len() == 1 {
            let socket = sockets.into_iter().next();
            tracing::debug!(socket = ?socket, "PMem operation narrowed to socket");
            return socket;
        }

        tracing::debug!(sockets = ?sockets, "PMem operation targets all sockets");
        None
    }
}

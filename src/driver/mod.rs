//! CSI Driver
//!
//! The orchestrator-facing lifecycle surface. Identity, controller and node
//! operations live in their own files as `impl CsiDriver` blocks; the
//! controller and node work itself is delegated to `ControllerReconciler`
//! and `AttachmentManager`.

pub mod controller;
pub mod identity;
pub mod node;

use crate::controller::ControllerReconciler;
use crate::domain::csi::{AccessMode, ControllerCapability};
use crate::error::{Error, Result};
use crate::node::AttachmentManager;
use std::sync::Arc;
use tracing::info;

/// Name the plugin registers under
pub const DEFAULT_DRIVER_NAME: &str = "csi-openebs";

/// Node id used when none is configured
pub const DEFAULT_NODE_ID: &str = "CSINode";

/// Static identity of a running plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    pub name: String,
    pub version: String,
    pub node_id: String,
}

impl DriverInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Result<Self> {
        let info = Self {
            name: name.into(),
            version: version.into(),
            node_id: node_id.into(),
        };
        if info.name.is_empty() {
            return Err(Error::Configuration("driver name missing".into()));
        }
        if info.node_id.is_empty() {
            return Err(Error::Configuration("node id missing".into()));
        }
        if info.version.is_empty() {
            return Err(Error::Configuration("version missing".into()));
        }
        Ok(info)
    }
}

/// Lifecycle surface of the plugin
pub struct CsiDriver {
    info: DriverInfo,
    controller_capabilities: Vec<ControllerCapability>,
    access_modes: Vec<AccessMode>,
    controller: Arc<ControllerReconciler>,
    node: Arc<AttachmentManager>,
}

impl CsiDriver {
    pub fn new(
        info: DriverInfo,
        controller: Arc<ControllerReconciler>,
        node: Arc<AttachmentManager>,
    ) -> Self {
        let controller_capabilities = vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::ListVolumes,
        ];
        let access_modes = vec![AccessMode::SingleNodeWriter];

        for capability in &controller_capabilities {
            info!("Enabling controller service capability: {:?}", capability);
        }
        for mode in &access_modes {
            info!("Enabling volume access mode: {}", mode);
        }

        Self {
            info,
            controller_capabilities,
            access_modes,
            controller,
            node,
        }
    }

    pub fn info(&self) -> &DriverInfo {
        &self.info
    }

    pub fn access_modes(&self) -> &[AccessMode] {
        &self.access_modes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_driver_info_requires_all_fields() {
        assert!(DriverInfo::new(DEFAULT_DRIVER_NAME, "0.1.0", DEFAULT_NODE_ID).is_ok());
        assert_matches!(
            DriverInfo::new("", "0.1.0", DEFAULT_NODE_ID),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            DriverInfo::new(DEFAULT_DRIVER_NAME, "0.1.0", ""),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            DriverInfo::new(DEFAULT_DRIVER_NAME, "", DEFAULT_NODE_ID),
            Err(Error::Configuration(_))
        );
    }
}

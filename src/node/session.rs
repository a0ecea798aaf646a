//! Attachment session
//!
//! Everything the attach backend needs to log into one iSCSI target and
//! mount its LUN at a target path.

use crate::domain::volume::attributes;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Default iSCSI port appended to portals given without one
pub const DEFAULT_ISCSI_PORT: u16 = 3260;

/// Parameters of a single attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentSession {
    pub target_path: String,
    pub iqn: String,
    pub target_portal: String,
    pub lun: String,
    /// JSON array of additional portals, as carried in the attributes
    pub portals_json: String,
    pub iscsi_interface: String,
    pub read_only: bool,
    pub fs_type: Option<String>,
}

impl AttachmentSession {
    /// Build from a volume attribute map; IQN and target portal are mandatory
    pub fn from_attributes(
        attrs: &BTreeMap<String, String>,
        target_path: impl Into<String>,
        read_only: bool,
    ) -> Result<Self> {
        let required = |key: &str| {
            attrs
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let (iqn, target_portal) =
            match (required(attributes::IQN), required(attributes::TARGET_PORTAL)) {
                (Some(iqn), Some(portal)) => (iqn, portal),
                _ => return Err(Error::Internal("iSCSI target information is missing".into())),
            };

        Ok(Self {
            target_path: target_path.into(),
            iqn,
            target_portal: normalize_portal(&target_portal),
            lun: required(attributes::LUN)
                .unwrap_or_else(|| attributes::DEFAULT_LUN.to_string()),
            portals_json: attrs.get(attributes::PORTALS).cloned().unwrap_or_default(),
            iscsi_interface: required(attributes::ISCSI_INTERFACE)
                .unwrap_or_else(|| attributes::DEFAULT_ISCSI_INTERFACE.to_string()),
            read_only,
            fs_type: None,
        })
    }

    pub fn with_fs_type(mut self, fs_type: impl Into<String>) -> Self {
        self.fs_type = Some(fs_type.into());
        self
    }

    /// Decode the JSON portal list; an empty value means no extra portals
    pub fn portals(&self) -> Result<Vec<String>> {
        if self.portals_json.trim().is_empty() {
            return Ok(Vec::new());
        }
        let portals: Vec<String> = serde_json::from_str(&self.portals_json).map_err(|e| {
            Error::Internal(format!("invalid portal list {}: {}", self.portals_json, e))
        })?;
        Ok(portals)
    }

    /// Target portal first, then the remaining distinct portals
    pub fn all_portals(&self) -> Result<Vec<String>> {
        let mut all = vec![self.target_portal.clone()];
        for portal in self.portals()? {
            let portal = normalize_portal(&portal);
            if !portal.is_empty() && !all.contains(&portal) {
                all.push(portal);
            }
        }
        Ok(all)
    }

    /// Name of the udev by-path link created for this LUN once logged in
    /// through `portal`
    pub fn device_link(&self, portal: &str) -> String {
        format!("ip-{}-iscsi-{}-lun-{}", portal, self.iqn, self.lun)
    }
}

/// Append the default port when a portal has none
pub fn normalize_portal(portal: &str) -> String {
    let portal = portal.trim();
    if portal.is_empty() {
        return String::new();
    }
    let has_port = match portal.rfind(']') {
        // bracketed IPv6: [addr]:port
        Some(end) => portal[end..].contains(':'),
        None => portal.matches(':').count() == 1,
    };
    if has_port {
        portal.to_string()
    } else {
        format!("{}:{}", portal, DEFAULT_ISCSI_PORT)
    }
}

//! Maya API server volume documents
//!
//! Wire types exchanged with the volume-management control plane, plus the
//! annotation keys it populates and the attribute keys handed to nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Constants
// =============================================================================

/// Creation request `kind`
pub const VOLUME_SPEC_KIND: &str = "PersistentVolumeClaim";

/// Creation request `apiVersion`
pub const VOLUME_SPEC_API_VERSION: &str = "v1";

/// Namespace used when the request carries none
pub const DEFAULT_NAMESPACE: &str = "default";

/// Request parameter naming the storage class
pub const PARAM_STORAGE_CLASS_NAME: &str = "storage-class-name";

/// Request parameter overriding the namespace
pub const PARAM_NAMESPACE: &str = "namespace";

/// Annotation keys populated by the control plane
pub mod annotations {
    pub const IQN: &str = "vsm.openebs.io/iqn";
    pub const TARGET_PORTAL: &str = "vsm.openebs.io/targetportals";
    pub const PORTALS: &str = "openebs.io/jiva-target-portal";
    pub const CAPACITY: &str = "openebs.io/capacity";
}

/// Attribute keys surfaced from controller to node
pub mod attributes {
    pub const IQN: &str = "iqn";
    pub const TARGET_PORTAL: &str = "targetPortal";
    pub const LUN: &str = "lun";
    pub const PORTALS: &str = "portals";
    pub const ISCSI_INTERFACE: &str = "iscsiInterface";
    pub const CAPACITY: &str = "capacity";

    /// LUN is fixed; every jiva target exposes a single logical unit
    pub const DEFAULT_LUN: &str = "0";
    pub const DEFAULT_ISCSI_INTERFACE: &str = "default";
}

// =============================================================================
// Volume (control plane view)
// =============================================================================

/// A provisioned volume as reported by the control plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(default)]
    pub metadata: VolumeMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VolumeStatus>,
}

impl Volume {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMetadata {
    #[serde(default)]
    pub name: String,
    /// Free-form map; values are expected to be strings
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeStatus {
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Phase", default)]
    pub phase: String,
    #[serde(rename = "Reason", default)]
    pub reason: String,
}

/// Envelope returned by the list endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeList {
    #[serde(default)]
    pub items: Vec<Volume>,
}

// =============================================================================
// Volume Spec (creation document)
// =============================================================================

/// Document POSTed to the control plane to create a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    pub kind: String,
    pub api_version: String,
    pub metadata: VolumeSpecMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpecMetadata {
    pub name: String,
    pub labels: VolumeSpecLabels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpecLabels {
    /// Size as a decimal byte count with a literal `B` suffix
    pub storage: String,
    pub storage_class: String,
    pub namespace: String,
}

impl VolumeSpec {
    pub fn new(
        name: impl Into<String>,
        required_bytes: i64,
        storage_class: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            kind: VOLUME_SPEC_KIND.to_string(),
            api_version: VOLUME_SPEC_API_VERSION.to_string(),
            metadata: VolumeSpecMetadata {
                name: name.into(),
                labels: VolumeSpecLabels {
                    storage: format_capacity(required_bytes),
                    storage_class: storage_class.into(),
                    namespace: namespace.into(),
                },
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Encode a byte count the way the control plane expects (`3000000000B`)
pub fn format_capacity(bytes: i64) -> String {
    format!("{}B", bytes)
}

//! Orchestrator-facing lifecycle types
//!
//! Request/response shapes for the identity, controller and node surfaces.
//! They serialize as camelCase JSON so the API binding can carry them as-is.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Capabilities
// =============================================================================

/// How a volume may be accessed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    #[default]
    Unknown,
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::Unknown => write!(f, "UNKNOWN"),
            AccessMode::SingleNodeWriter => write!(f, "SINGLE_NODE_WRITER"),
            AccessMode::SingleNodeReaderOnly => write!(f, "SINGLE_NODE_READER_ONLY"),
            AccessMode::MultiNodeReaderOnly => write!(f, "MULTI_NODE_READER_ONLY"),
            AccessMode::MultiNodeSingleWriter => write!(f, "MULTI_NODE_SINGLE_WRITER"),
            AccessMode::MultiNodeMultiWriter => write!(f, "MULTI_NODE_MULTI_WRITER"),
        }
    }
}

/// Filesystem-mount access type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountVolume {
    #[serde(default)]
    pub fs_type: String,
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

/// A capability descriptor requested for a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCapability {
    #[serde(default)]
    pub access_mode: Option<AccessMode>,
    #[serde(default)]
    pub mount: Option<MountVolume>,
}

impl VolumeCapability {
    pub fn with_mode(mode: AccessMode) -> Self {
        Self {
            access_mode: Some(mode),
            mount: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginCapability {
    Unknown,
    ControllerService,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerCapability {
    Unknown,
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ListVolumes,
    GetCapacity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeCapability {
    Unknown,
    StageUnstageVolume,
}

// =============================================================================
// Identity
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPluginInfoResponse {
    pub name: String,
    pub vendor_version: String,
    #[serde(default)]
    pub manifest: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPluginCapabilitiesResponse {
    pub capabilities: Vec<PluginCapability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub ready: bool,
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRange {
    #[serde(default)]
    pub required_bytes: i64,
    #[serde(default)]
    pub limit_bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl CreateVolumeRequest {
    /// Requested size; zero when no range was supplied
    pub fn required_bytes(&self) -> i64 {
        self.capacity_range
            .map(|range| range.required_bytes)
            .unwrap_or(0)
    }
}

/// A volume as reported to the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiVolume {
    pub id: String,
    pub capacity_bytes: i64,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeResponse {
    pub volume: CsiVolume,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteVolumeRequest {
    #[serde(default)]
    pub volume_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteVolumeResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVolumesRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVolumesEntry {
    pub volume: CsiVolume,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVolumesResponse {
    pub entries: Vec<ListVolumesEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateVolumeCapabilitiesRequest {
    #[serde(default)]
    pub volume_id: String,
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub volume_attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateVolumeCapabilitiesResponse {
    pub supported: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerGetCapabilitiesResponse {
    pub capabilities: Vec<ControllerCapability>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCapacityRequest {
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerPublishVolumeRequest {
    #[serde(default)]
    pub volume_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub readonly: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerUnpublishVolumeRequest {
    #[serde(default)]
    pub volume_id: String,
    #[serde(default)]
    pub node_id: String,
}

// =============================================================================
// Node
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePublishVolumeRequest {
    #[serde(default)]
    pub volume_id: String,
    #[serde(default)]
    pub target_path: String,
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub volume_attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePublishVolumeResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUnpublishVolumeRequest {
    #[serde(default)]
    pub volume_id: String,
    #[serde(default)]
    pub target_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUnpublishVolumeResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStageVolumeRequest {
    #[serde(default)]
    pub volume_id: String,
    #[serde(default)]
    pub staging_target_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUnstageVolumeRequest {
    #[serde(default)]
    pub volume_id: String,
    #[serde(default)]
    pub staging_target_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGetIdResponse {
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGetCapabilitiesResponse {
    pub capabilities: Vec<NodeCapability>,
}

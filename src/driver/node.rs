//! Node service

use super::CsiDriver;
use crate::context::CallContext;
use crate::domain::csi::{
    NodeCapability, NodeGetCapabilitiesResponse, NodeGetIdResponse, NodePublishVolumeRequest,
    NodePublishVolumeResponse, NodeStageVolumeRequest, NodeUnpublishVolumeRequest,
    NodeUnpublishVolumeResponse, NodeUnstageVolumeRequest,
};
use crate::error::{Error, Result};
use tracing::info;

impl CsiDriver {
    pub async fn node_publish_volume(
        &self,
        ctx: &CallContext,
        req: &NodePublishVolumeRequest,
    ) -> Result<NodePublishVolumeResponse> {
        if req.target_path.is_empty() {
            return Err(Error::InvalidArgument("missing target path in request".into()));
        }
        info!("Publishing volume {} at {}", req.volume_id, req.target_path);

        let fs_type = req
            .volume_capability
            .as_ref()
            .and_then(|cap| cap.mount.as_ref())
            .map(|mount| mount.fs_type.as_str());

        self.node
            .attach(
                ctx,
                &req.volume_attributes,
                &req.target_path,
                req.readonly,
                fs_type,
            )
            .await?;
        Ok(NodePublishVolumeResponse {})
    }

    pub async fn node_unpublish_volume(
        &self,
        ctx: &CallContext,
        req: &NodeUnpublishVolumeRequest,
    ) -> Result<NodeUnpublishVolumeResponse> {
        if req.target_path.is_empty() {
            return Err(Error::InvalidArgument("missing target path in request".into()));
        }
        info!("Unpublishing volume {} from {}", req.volume_id, req.target_path);

        self.node.detach(ctx, &req.target_path).await?;
        Ok(NodeUnpublishVolumeResponse {})
    }

    /// No stage capability is advertised
    pub fn node_stage_volume(&self, _req: &NodeStageVolumeRequest) -> Result<()> {
        Err(Error::Unimplemented("NodeStageVolume is not supported".into()))
    }

    pub fn node_unstage_volume(&self, _req: &NodeUnstageVolumeRequest) -> Result<()> {
        Err(Error::Unimplemented("NodeUnstageVolume is not supported".into()))
    }

    pub fn node_get_id(&self) -> Result<NodeGetIdResponse> {
        Ok(NodeGetIdResponse {
            node_id: self.info.node_id.clone(),
        })
    }

    pub fn node_get_capabilities(&self) -> Result<NodeGetCapabilitiesResponse> {
        Ok(NodeGetCapabilitiesResponse {
            capabilities: vec![NodeCapability::Unknown],
        })
    }
}

//! Controller service

use super::CsiDriver;
use crate::context::CallContext;
use crate::domain::csi::{
    AccessMode, ControllerGetCapabilitiesResponse, ControllerPublishVolumeRequest,
    ControllerUnpublishVolumeRequest, CreateVolumeRequest, CreateVolumeResponse,
    DeleteVolumeRequest, DeleteVolumeResponse, GetCapacityRequest, ListVolumesEntry,
    ListVolumesResponse, ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse,
};
use crate::error::{Error, Result};
use tracing::{debug, info};

impl CsiDriver {
    pub async fn create_volume(
        &self,
        ctx: &CallContext,
        req: &CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse> {
        let volume = self.controller.create_volume(ctx, req).await?;
        Ok(CreateVolumeResponse { volume })
    }

    pub async fn delete_volume(
        &self,
        ctx: &CallContext,
        req: &DeleteVolumeRequest,
    ) -> Result<DeleteVolumeResponse> {
        self.controller.delete_volume(ctx, &req.volume_id).await?;
        Ok(DeleteVolumeResponse {})
    }

    pub async fn list_volumes(&self, ctx: &CallContext) -> Result<ListVolumesResponse> {
        let entries = self
            .controller
            .list_volumes(ctx)
            .await?
            .into_iter()
            .map(|volume| ListVolumesEntry { volume })
            .collect();
        Ok(ListVolumesResponse { entries })
    }

    /// Supported only when every requested mode is one the driver advertises
    pub fn validate_volume_capabilities(
        &self,
        req: &ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse> {
        if req.volume_id.is_empty() {
            return Err(Error::InvalidArgument("missing volume id in request".into()));
        }
        if req.volume_capabilities.is_empty() {
            return Err(Error::InvalidArgument(
                "missing volume capabilities in request".into(),
            ));
        }

        let unsupported = req.volume_capabilities.iter().find_map(|cap| {
            let mode = cap.access_mode.unwrap_or(AccessMode::Unknown);
            (!self.access_modes.contains(&mode)).then_some(mode)
        });

        Ok(match unsupported {
            Some(mode) => {
                debug!("Volume {} requested unsupported mode {}", req.volume_id, mode);
                ValidateVolumeCapabilitiesResponse {
                    supported: false,
                    message: format!("access mode {} is not supported", mode),
                }
            }
            None => ValidateVolumeCapabilitiesResponse {
                supported: true,
                message: String::new(),
            },
        })
    }

    pub fn controller_get_capabilities(&self) -> Result<ControllerGetCapabilitiesResponse> {
        Ok(ControllerGetCapabilitiesResponse {
            capabilities: self.controller_capabilities.clone(),
        })
    }

    pub fn get_capacity(&self, _req: &GetCapacityRequest) -> Result<()> {
        Err(Error::Unimplemented("GetCapacity is not supported".into()))
    }

    pub fn controller_publish_volume(&self, req: &ControllerPublishVolumeRequest) -> Result<()> {
        info!("ControllerPublishVolume called for {}", req.volume_id);
        Err(Error::Unimplemented(
            "ControllerPublishVolume is not supported".into(),
        ))
    }

    pub fn controller_unpublish_volume(
        &self,
        req: &ControllerUnpublishVolumeRequest,
    ) -> Result<()> {
        info!("ControllerUnpublishVolume called for {}", req.volume_id);
        Err(Error::Unimplemented(
            "ControllerUnpublishVolume is not supported".into(),
        ))
    }
}

//! Identity service

use super::CsiDriver;
use crate::domain::csi::{
    GetPluginCapabilitiesResponse, GetPluginInfoResponse, PluginCapability, ProbeResponse,
};
use crate::error::Result;
use std::collections::BTreeMap;

impl CsiDriver {
    pub fn get_plugin_info(&self) -> Result<GetPluginInfoResponse> {
        Ok(GetPluginInfoResponse {
            name: self.info.name.clone(),
            vendor_version: self.info.version.clone(),
            manifest: BTreeMap::new(),
        })
    }

    pub fn get_plugin_capabilities(&self) -> Result<GetPluginCapabilitiesResponse> {
        Ok(GetPluginCapabilitiesResponse {
            capabilities: vec![PluginCapability::ControllerService],
        })
    }

    pub fn probe(&self) -> Result<ProbeResponse> {
        Ok(ProbeResponse { ready: true })
    }
}

//! Volume attribute extraction and creation documents

use crate::domain::csi::CreateVolumeRequest;
use crate::domain::volume::{
    annotations, attributes, Volume, VolumeSpec, DEFAULT_NAMESPACE, PARAM_NAMESPACE,
    PARAM_STORAGE_CLASS_NAME,
};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Annotations every provisioned volume must carry
const REQUIRED_ANNOTATIONS: [&str; 4] = [
    annotations::IQN,
    annotations::TARGET_PORTAL,
    annotations::PORTALS,
    annotations::CAPACITY,
];

/// Build the attribute map handed from controller to node
///
/// The portal annotation holds a single address; it is re-encoded as a
/// one-element JSON array because the node side decodes a list. LUN and
/// iSCSI interface are fixed.
pub fn get_volume_attributes(volume: &Volume) -> Result<BTreeMap<String, String>> {
    let map = volume
        .metadata
        .annotations
        .as_ref()
        .ok_or_else(|| Error::Internal("volume or its annotations cannot be nil".into()))?;

    let mut values = BTreeMap::new();
    for key in REQUIRED_ANNOTATIONS {
        let value = match map.get(key) {
            None | Some(serde_json::Value::Null) => {
                return Err(Error::Internal(format!(
                    "required volume attribute {} cannot be nil",
                    key
                )))
            }
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(Error::Internal(format!(
                    "required volume attribute {} must be a string",
                    key
                )))
            }
        };
        values.insert(key, value);
    }

    let portals = serde_json::to_string(&[&values[annotations::PORTALS]])?;

    let mut attrs = BTreeMap::new();
    attrs.insert(attributes::IQN.to_string(), values[annotations::IQN].clone());
    attrs.insert(
        attributes::TARGET_PORTAL.to_string(),
        values[annotations::TARGET_PORTAL].clone(),
    );
    attrs.insert(attributes::LUN.to_string(), attributes::DEFAULT_LUN.to_string());
    attrs.insert(attributes::PORTALS.to_string(), portals);
    attrs.insert(
        attributes::ISCSI_INTERFACE.to_string(),
        attributes::DEFAULT_ISCSI_INTERFACE.to_string(),
    );
    attrs.insert(
        attributes::CAPACITY.to_string(),
        values[annotations::CAPACITY].clone(),
    );
    Ok(attrs)
}

/// Integer prefix of a capacity string such as `3000000000B`
pub fn parse_capacity(capacity: &str) -> Option<i64> {
    capacity.split('B').next()?.trim().parse().ok()
}

/// Reject malformed create requests before touching the control plane
pub fn check_create_arguments(req: &CreateVolumeRequest) -> Result<()> {
    if req.name.is_empty() {
        return Err(Error::InvalidArgument("missing name in request".into()));
    }
    if req.volume_capabilities.is_empty() {
        return Err(Error::InvalidArgument(
            "missing volume capabilities in request".into(),
        ));
    }
    if storage_class(req).is_none() {
        return Err(Error::InvalidArgument(
            "missing storage-class-name in request".into(),
        ));
    }
    Ok(())
}

fn storage_class(req: &CreateVolumeRequest) -> Option<&str> {
    req.parameters
        .get(PARAM_STORAGE_CLASS_NAME)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

/// Creation document for a validated request
pub fn build_volume_spec(req: &CreateVolumeRequest) -> VolumeSpec {
    let namespace = req
        .parameters
        .get(PARAM_NAMESPACE)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE);

    VolumeSpec::new(
        req.name.clone(),
        req.required_bytes(),
        storage_class(req).unwrap_or_default(),
        namespace,
    )
}

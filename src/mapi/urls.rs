//! Maya API server URL construction

use crate::error::{Error, Result};
use reqwest::Url;

/// Version segment used for every call
pub const VERSION_LATEST: &str = "latest";

const VOLUMES: &str = "volumes";
const DELETE: &str = "delete";
const INFO: &str = "info";

fn validate_version(version: &str) -> Result<()> {
    if version.trim().is_empty() {
        return Err(Error::InvalidVersion);
    }
    Ok(())
}

fn validate_volume_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidVolumeName);
    }
    Ok(())
}

/// `{scheme}://{host}/{version}/volumes/`
pub fn volumes_url(base: &Url, version: &str) -> Result<Url> {
    validate_version(version)?;

    let mut url = base.clone();
    url.set_path(&format!("/{}/{}/", version, VOLUMES));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// `{scheme}://{host}/{version}/volumes/delete/{name}`
pub fn delete_url(base: &Url, version: &str, name: &str) -> Result<Url> {
    volume_action_url(base, version, DELETE, name)
}

/// `{scheme}://{host}/{version}/volumes/info/{name}`
pub fn info_url(base: &Url, version: &str, name: &str) -> Result<Url> {
    volume_action_url(base, version, INFO, name)
}

fn volume_action_url(base: &Url, version: &str, action: &str, name: &str) -> Result<Url> {
    let mut url = volumes_url(base, version)?;
    validate_volume_name(name)?;

    let path = format!("{}{}/{}", url.path(), action, urlencoding::encode(name));
    url.set_path(&path);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn base() -> Url {
        Url::parse("http://10.0.0.1:5656").unwrap()
    }

    #[test]
    fn test_volumes_url() {
        let url = volumes_url(&base(), VERSION_LATEST).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1:5656/latest/volumes/");
    }

    #[test]
    fn test_volumes_url_drops_base_path() {
        let base = Url::parse("https://maya.example:8443/some/prefix?x=1").unwrap();
        let url = volumes_url(&base, "v1alpha1").unwrap();
        assert_eq!(url.as_str(), "https://maya.example:8443/v1alpha1/volumes/");
    }

    #[test]
    fn test_info_and_delete_urls() {
        let info = info_url(&base(), VERSION_LATEST, "csi-volume-1").unwrap();
        assert_eq!(info.as_str(), "http://10.0.0.1:5656/latest/volumes/info/csi-volume-1");

        let delete = delete_url(&base(), VERSION_LATEST, "csi-volume-1").unwrap();
        assert_eq!(
            delete.as_str(),
            "http://10.0.0.1:5656/latest/volumes/delete/csi-volume-1"
        );
    }

    #[test]
    fn test_name_is_escaped() {
        let url = info_url(&base(), VERSION_LATEST, "a b/c").unwrap();
        assert_eq!(url.path(), "/latest/volumes/info/a%20b%2Fc");
    }

    #[test]
    fn test_blank_version_rejected() {
        assert_matches!(volumes_url(&base(), ""), Err(Error::InvalidVersion));
        assert_matches!(volumes_url(&base(), "  "), Err(Error::InvalidVersion));
    }

    #[test]
    fn test_version_checked_before_name() {
        assert_matches!(info_url(&base(), " ", ""), Err(Error::InvalidVersion));
        assert_matches!(delete_url(&base(), VERSION_LATEST, " "), Err(Error::InvalidVolumeName));
        assert_matches!(info_url(&base(), VERSION_LATEST, ""), Err(Error::InvalidVolumeName));
    }
}

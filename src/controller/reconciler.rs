//! Controller Reconciler
//!
//! Idempotent volume create/delete/list on top of a `VolumeDirectory`.
//! All state of record lives in the control plane; the only local state
//! is the per-name lock registry guarding check-then-create.

use crate::context::CallContext;
use crate::controller::attributes::{
    build_volume_spec, check_create_arguments, get_volume_attributes, parse_capacity,
};
use crate::domain::csi::{CreateVolumeRequest, CsiVolume};
use crate::domain::ports::VolumeDirectoryRef;
use crate::domain::volume::{attributes, Volume};
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use tracing::{debug, error, info, instrument, warn};

/// Reconciles orchestrator lifecycle calls against the control plane
pub struct ControllerReconciler {
    directory: VolumeDirectoryRef,
    locks: KeyedLocks,
}

impl ControllerReconciler {
    pub fn new(directory: VolumeDirectoryRef) -> Self {
        Self {
            directory,
            locks: KeyedLocks::new(),
        }
    }

    /// Create a volume, or adopt an existing one of the same name and size
    #[instrument(skip(self, ctx, req), fields(volume = %req.name))]
    pub async fn create_volume(
        &self,
        ctx: &CallContext,
        req: &CreateVolumeRequest,
    ) -> Result<CsiVolume> {
        debug!("Validating CreateVolume request");
        if let Err(e) = check_create_arguments(req) {
            info!("Invalid CreateVolume request: {}", e);
            return Err(e);
        }

        let _guard = ctx.run(async { Ok(self.locks.lock(&req.name).await) }).await?;

        info!("Pre-creation check for volume {}", req.name);
        let volume = match self.directory.get_volume(ctx, &req.name).await {
            Ok(volume) => {
                info!("Volume {} already exists", req.name);
                volume
            }
            Err(e) if e.is_not_found() => {
                info!("Volume {} does not exist, creating", req.name);
                self.provision(ctx, req).await?
            }
            Err(e) => return Err(passthrough_or(e, upstream_unavailable)),
        };

        let (capacity_bytes, attributes) = describe(&volume)?;

        let required = req.required_bytes();
        if capacity_bytes != required {
            error!(
                "Capacity mismatch for volume {}. Want {}B has {}B",
                req.name, required, capacity_bytes
            );
            return Err(Error::AlreadyExists(format!(
                "Capacity mismatch for volume {}. Want {}B has {}B",
                req.name, required, capacity_bytes
            )));
        }

        Ok(CsiVolume {
            id: volume.name().to_string(),
            capacity_bytes,
            attributes,
        })
    }

    async fn provision(&self, ctx: &CallContext, req: &CreateVolumeRequest) -> Result<Volume> {
        let spec = build_volume_spec(req);
        debug!("Volume spec created {:?}", spec);

        if let Err(e) = self.directory.create_volume(ctx, &spec).await {
            return Err(passthrough_or(e, upstream_unavailable));
        }
        info!("Volume {} created", req.name);

        // The control plane answers create without the populated object
        self.directory
            .get_volume(ctx, &req.name)
            .await
            .map_err(|e| {
                passthrough_or(e, |e| {
                    error!(
                        "Error fetching the created volume details from maya-api-server: {}",
                        e
                    );
                    Error::DeadlineExceeded(format!(
                        "Error fetching the created volume details from maya-api-server: {}",
                        e
                    ))
                })
            })
    }

    /// Delete a volume; already-absent volumes succeed
    #[instrument(skip(self, ctx))]
    pub async fn delete_volume(&self, ctx: &CallContext, volume_id: &str) -> Result<()> {
        if volume_id.is_empty() {
            return Err(Error::InvalidArgument("missing volume id in request".into()));
        }

        info!("Attempting to delete volume {}", volume_id);
        self.directory
            .delete_volume(ctx, volume_id)
            .await
            .map_err(|e| passthrough_or(e, upstream_unavailable))
    }

    /// List every volume; one malformed volume fails the whole call
    #[instrument(skip(self, ctx))]
    pub async fn list_volumes(&self, ctx: &CallContext) -> Result<Vec<CsiVolume>> {
        let volumes = self.directory.list_volumes(ctx).await.map_err(|e| {
            passthrough_or(e, |e| {
                error!("Error from maya-api-server: {}", e);
                Error::Unavailable(e.to_string())
            })
        })?;

        volumes
            .iter()
            .map(|volume| {
                let (capacity_bytes, attributes) = describe(volume).map_err(|e| {
                    Error::Internal(format!("volume {}: {}", volume.name(), e))
                })?;
                Ok(CsiVolume {
                    id: volume.name().to_string(),
                    capacity_bytes,
                    attributes,
                })
            })
            .collect()
    }
}

/// Attributes and parsed capacity of a resolved volume
fn describe(volume: &Volume) -> Result<(i64, std::collections::BTreeMap<String, String>)> {
    let attrs = get_volume_attributes(volume).map_err(|e| {
        error!("Extracting volume attributes failed: {}", e);
        Error::Internal(format!("openEBS volume error: {}", e))
    })?;
    debug!("Volume attributes {:?}", attrs);

    let raw = attrs
        .get(attributes::CAPACITY)
        .map(String::as_str)
        .unwrap_or_default();
    let capacity = parse_capacity(raw).unwrap_or_else(|| {
        warn!("Invalid capacity '{}' found on volume {}", raw, volume.name());
        0
    });
    Ok((capacity, attrs))
}

fn upstream_unavailable(e: Error) -> Error {
    error!("Error from maya-api-server: {}", e);
    Error::Unavailable(format!("Error from maya-api-server: {}", e))
}

/// Keep the caller's own cancellation and deadline; map everything else
fn passthrough_or(e: Error, map: impl FnOnce(Error) -> Error) -> Error {
    match e {
        Error::Cancelled | Error::DeadlineExceeded(_) => e,
        other => map(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::csi::{AccessMode, CapacityRange, VolumeCapability};
    use crate::domain::volume::{annotations, PARAM_STORAGE_CLASS_NAME};
    use crate::error::Code;
    use crate::mapi::{MapiClient, MapiConfig};
    use crate::testing::{annotated_volume, volume_without, FakeDirectory, FakeMapiServer};
    use assert_matches::assert_matches;
    use reqwest::StatusCode;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn request(name: &str, bytes: i64) -> CreateVolumeRequest {
        let mut parameters = BTreeMap::new();
        parameters.insert(PARAM_STORAGE_CLASS_NAME.to_string(), "openebs".to_string());
        CreateVolumeRequest {
            name: name.to_string(),
            capacity_range: Some(CapacityRange {
                required_bytes: bytes,
                limit_bytes: 0,
            }),
            volume_capabilities: vec![VolumeCapability::with_mode(AccessMode::SingleNodeWriter)],
            parameters,
        }
    }

    fn reconciler(directory: FakeDirectory) -> (ControllerReconciler, Arc<FakeDirectory>) {
        let directory = Arc::new(directory);
        (ControllerReconciler::new(directory.clone()), directory)
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let (reconciler, directory) = reconciler(FakeDirectory::new());
        let ctx = CallContext::background();
        let req = request("v1", 3_000_000_000);

        let first = reconciler.create_volume(&ctx, &req).await.unwrap();
        let second = reconciler.create_volume(&ctx, &req).await.unwrap();

        assert_eq!(first.id, "v1");
        assert_eq!(first.capacity_bytes, 3_000_000_000);
        assert_eq!(first.id, second.id);
        assert_eq!(first.capacity_bytes, second.capacity_bytes);
        assert_eq!(directory.count("create"), 1);
        assert_eq!(
            directory.calls(),
            vec!["get:v1", "create:v1", "get:v1", "get:v1"]
        );
    }

    #[tokio::test]
    async fn test_capacity_conflict() {
        let (reconciler, directory) =
            reconciler(FakeDirectory::new().with_volume(annotated_volume("v1", "5000000000B")));

        let err = reconciler
            .create_volume(&CallContext::background(), &request("v1", 3_000_000_000))
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::AlreadyExists);
        let msg = err.to_string();
        assert!(msg.contains("3000000000B"), "{}", msg);
        assert!(msg.contains("5000000000B"), "{}", msg);
        assert_eq!(directory.count("create"), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_directory() {
        let (reconciler, directory) = reconciler(FakeDirectory::new());
        let mut req = request("v1", 1024);
        req.parameters.clear();

        let err = reconciler
            .create_volume(&CallContext::background(), &req)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert!(directory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_is_unavailable() {
        let (reconciler, _) =
            reconciler(FakeDirectory::new().fail_create(StatusCode::INTERNAL_SERVER_ERROR));

        let err = reconciler
            .create_volume(&CallContext::background(), &request("v1", 1024))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Unavailable(ref msg)
            if msg == "Error from maya-api-server: Internal Server Error");
    }

    #[tokio::test]
    async fn test_refetch_failure_is_deadline_exceeded() {
        let (reconciler, directory) = reconciler(FakeDirectory::new().hide_created());

        let err = reconciler
            .create_volume(&CallContext::background(), &request("v1", 1024))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert_eq!(directory.count("create"), 1);
    }

    #[tokio::test]
    async fn test_get_failure_is_unavailable() {
        let (reconciler, directory) =
            reconciler(FakeDirectory::new().fail_get(StatusCode::BAD_GATEWAY));

        let err = reconciler
            .create_volume(&CallContext::background(), &request("v1", 1024))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(directory.count("create"), 0);
    }

    #[tokio::test]
    async fn test_missing_annotation_is_internal() {
        let volume = volume_without("v1", "1024B", annotations::TARGET_PORTAL);
        let (reconciler, _) = reconciler(FakeDirectory::new().with_volume(volume));

        let err = reconciler
            .create_volume(&CallContext::background(), &request("v1", 1024))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(err.to_string().contains(annotations::TARGET_PORTAL));
    }

    #[tokio::test]
    async fn test_malformed_capacity_conflicts() {
        let (reconciler, _) =
            reconciler(FakeDirectory::new().with_volume(annotated_volume("v1", "lots")));

        let err = reconciler
            .create_volume(&CallContext::background(), &request("v1", 1024))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::AlreadyExists);
    }

    #[tokio::test]
    async fn test_concurrent_creates_issue_one_post() {
        let (reconciler, directory) =
            reconciler(FakeDirectory::new().with_create_delay(Duration::from_millis(50)));
        let reconciler = Arc::new(reconciler);

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let reconciler = reconciler.clone();
                tokio::spawn(async move {
                    reconciler
                        .create_volume(&CallContext::background(), &request("v1", 2048))
                        .await
                })
            })
            .collect();

        for task in tasks {
            let volume = task.await.unwrap().unwrap();
            assert_eq!(volume.capacity_bytes, 2048);
        }
        assert_eq!(directory.count("create"), 1);
    }

    #[tokio::test]
    async fn test_expired_deadline_passes_through() {
        let (reconciler, directory) = reconciler(FakeDirectory::new());
        let ctx = CallContext::with_timeout(Duration::ZERO);

        let err = reconciler
            .create_volume(&ctx, &request("v1", 1024))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert!(directory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let (reconciler, directory) =
            reconciler(FakeDirectory::new().with_volume(annotated_volume("v1", "1024B")));

        reconciler
            .delete_volume(&CallContext::background(), "v1")
            .await
            .unwrap();
        reconciler
            .delete_volume(&CallContext::background(), "v1")
            .await
            .unwrap();
        assert_eq!(directory.count("delete"), 2);

        let err = reconciler
            .delete_volume(&CallContext::background(), "")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_delete_failure_is_unavailable() {
        let (reconciler, _) =
            reconciler(FakeDirectory::new().fail_delete(StatusCode::INTERNAL_SERVER_ERROR));

        let err = reconciler
            .delete_volume(&CallContext::background(), "v1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert!(err.to_string().contains("Internal Server Error"));
    }

    #[tokio::test]
    async fn test_list_volumes() {
        let (reconciler, _) = reconciler(
            FakeDirectory::new()
                .with_volume(annotated_volume("pvc-a", "1024B"))
                .with_volume(annotated_volume("pvc-b", "2048B")),
        );

        let volumes = reconciler
            .list_volumes(&CallContext::background())
            .await
            .unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].id, "pvc-a");
        assert_eq!(volumes[1].capacity_bytes, 2048);
        assert_eq!(volumes[1].attributes[attributes::PORTALS], r#"["10.103.7.228:3260"]"#);
    }

    #[tokio::test]
    async fn test_list_aborts_on_bad_item() {
        let (reconciler, _) = reconciler(
            FakeDirectory::new()
                .with_volume(annotated_volume("pvc-a", "1024B"))
                .with_volume(volume_without("pvc-b", "1024B", annotations::CAPACITY)),
        );

        let err = reconciler
            .list_volumes(&CallContext::background())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Internal(ref msg) if msg.contains("pvc-b"));
    }

    #[tokio::test]
    async fn test_list_failure_is_unavailable() {
        let (reconciler, _) =
            reconciler(FakeDirectory::new().fail_list(StatusCode::SERVICE_UNAVAILABLE));

        let err = reconciler
            .list_volumes(&CallContext::background())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_end_to_end_over_http() {
        let server = FakeMapiServer::start().await;
        let client = MapiClient::new(Arc::new(MapiConfig::new(server.url(), "default"))).unwrap();
        let reconciler = ControllerReconciler::new(Arc::new(client));

        let volume = reconciler
            .create_volume(&CallContext::background(), &request("csi-volume-1", 3_000_000_000))
            .await
            .unwrap();

        let posts = server.posts();
        assert_eq!(posts.len(), 1);
        let doc: serde_yaml::Value = serde_yaml::from_str(&posts[0].body).unwrap();
        assert_eq!(doc["metadata"]["labels"]["storage"].as_str(), Some("3000000000B"));

        assert_eq!(volume.id, "csi-volume-1");
        assert_eq!(volume.attributes[attributes::CAPACITY], "3000000000B");
        assert_eq!(volume.capacity_bytes, 3_000_000_000);
    }

    #[tokio::test]
    async fn test_end_to_end_delete_ghost_and_server_error() {
        let server = FakeMapiServer::start().await;
        let client = MapiClient::new(Arc::new(MapiConfig::new(server.url(), "default"))).unwrap();
        let reconciler = ControllerReconciler::new(Arc::new(client));

        reconciler
            .delete_volume(&CallContext::background(), "ghost")
            .await
            .unwrap();

        server.fail_with(StatusCode::INTERNAL_SERVER_ERROR);
        let err = reconciler
            .delete_volume(&CallContext::background(), "v1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert!(err.to_string().contains("Internal Server Error"));
    }
}

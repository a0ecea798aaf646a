//! Attachment Manager
//!
//! Node-side attach/detach of iSCSI volumes. Validates target information
//! before any OS-level work and serializes operations per target path.

use crate::context::CallContext;
use crate::domain::ports::{AttachBackendRef, AttachOutcome, DetachOutcome};
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::node::session::AttachmentSession;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

pub struct AttachmentManager {
    backend: AttachBackendRef,
    locks: KeyedLocks,
}

impl AttachmentManager {
    pub fn new(backend: AttachBackendRef) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
        }
    }

    /// Attach the volume described by `attributes` at `target_path`
    ///
    /// Re-attaching a live mount succeeds without touching the target.
    #[instrument(skip(self, ctx, attributes))]
    pub async fn attach(
        &self,
        ctx: &CallContext,
        attributes: &BTreeMap<String, String>,
        target_path: &str,
        read_only: bool,
        fs_type: Option<&str>,
    ) -> Result<AttachOutcome> {
        let mut session = AttachmentSession::from_attributes(attributes, target_path, read_only)?;
        if let Some(fs_type) = fs_type.filter(|fs| !fs.is_empty()) {
            session = session.with_fs_type(fs_type);
        }

        let _guard = ctx.run(async { Ok(self.locks.lock(target_path).await) }).await?;

        let outcome = self
            .backend
            .attach(ctx, &session)
            .await
            .map_err(internal)?;
        match &outcome {
            AttachOutcome::Attached { device } => {
                info!("Attached {} at {} ({})", session.iqn, target_path, device)
            }
            AttachOutcome::AlreadyMounted => info!("{} already attached", target_path),
        }
        Ok(outcome)
    }

    /// Unmount `target_path`; a path with nothing mounted is already detached
    #[instrument(skip(self, ctx))]
    pub async fn detach(&self, ctx: &CallContext, target_path: &str) -> Result<DetachOutcome> {
        let _guard = ctx.run(async { Ok(self.locks.lock(target_path).await) }).await?;

        let outcome = self
            .backend
            .detach(ctx, target_path)
            .await
            .map_err(internal)?;
        match outcome {
            DetachOutcome::Detached => info!("Detached {}", target_path),
            DetachOutcome::NotMounted => warn!("{} is not mounted, nothing to detach", target_path),
        }
        Ok(outcome)
    }
}

fn internal(e: Error) -> Error {
    match e {
        Error::Cancelled | Error::DeadlineExceeded(_) | Error::Internal(_) => e,
        other => Error::Internal(other.to_string()),
    }
}

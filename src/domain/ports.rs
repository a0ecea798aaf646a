//! Domain Ports - Capability traits the core depends on
//!
//! The reconciler and attachment manager only ever talk to these traits.
//! Production adapters live in `mapi` and `node::iscsi`; tests swap in fakes.

use crate::context::CallContext;
use crate::domain::volume::{Volume, VolumeSpec};
use crate::error::Result;
use crate::node::session::AttachmentSession;
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;

// =============================================================================
// Volume Directory Port
// =============================================================================

/// Port for the external volume-management control plane
///
/// Implementations are bound to one endpoint configuration at construction.
#[async_trait]
pub trait VolumeDirectory: Send + Sync {
    /// Submit a creation document; succeeds only when the control plane answers 200
    async fn create_volume(&self, ctx: &CallContext, spec: &VolumeSpec) -> Result<()>;

    /// Fetch a single volume; a missing volume surfaces as an
    /// `ExternalService` 404 which callers check with `Error::is_not_found`
    async fn get_volume(&self, ctx: &CallContext, name: &str) -> Result<Volume>;

    /// Delete a volume; an already-absent volume is a success
    async fn delete_volume(&self, ctx: &CallContext, name: &str) -> Result<()>;

    /// List every volume known to the control plane
    async fn list_volumes(&self, ctx: &CallContext) -> Result<Vec<Volume>>;
}

// =============================================================================
// Service Locator Port
// =============================================================================

/// Port for locating the control plane inside the cluster
#[async_trait]
pub trait ServiceLocator: Send + Sync {
    /// Resolve the base URL (`scheme://host:port`) of a named service
    async fn locate(&self, namespace: &str, service: &str) -> Result<Url>;
}

// =============================================================================
// Attach Backend Port
// =============================================================================

/// Result of a successful attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// A new session was logged in and the device mounted
    Attached { device: String },
    /// The target path was already mounted
    AlreadyMounted,
}

/// Result of a successful detach
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachOutcome {
    /// The mount was removed (and the session logged out if unused)
    Detached,
    /// Nothing was mounted at the target path
    NotMounted,
}

/// Port for node-local block device attachment
#[async_trait]
pub trait AttachBackend: Send + Sync {
    /// Log into the target, discover the device and mount it
    async fn attach(&self, ctx: &CallContext, session: &AttachmentSession) -> Result<AttachOutcome>;

    /// Unmount the target path and log out the session if nothing else uses it
    async fn detach(&self, ctx: &CallContext, target_path: &str) -> Result<DetachOutcome>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type VolumeDirectoryRef = Arc<dyn VolumeDirectory>;
pub type ServiceLocatorRef = Arc<dyn ServiceLocator>;
pub type AttachBackendRef = Arc<dyn AttachBackend>;

//! OpenEBS CSI Plugin
//!
//! Provisions OpenEBS (Jiva) block volumes on behalf of a container
//! orchestrator and attaches them to the node as iSCSI-backed mounts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 CSI lifecycle surface (CsiDriver)                │
//! │        Identity  │  Controller  │  Node   (JSON API binding)     │
//! ├──────────────────┴──────┬───────┴──────────────┬─────────────────┤
//! │  ControllerReconciler   │                      │ AttachmentManager│
//! │  (create/delete/list)   │                      │ (attach/detach)  │
//! ├─────────────────────────┤                      ├─────────────────┤
//! │  VolumeDirectory port   │                      │ AttachBackend    │
//! │  MapiClient (reqwest)   │                      │ IscsiAdmBackend  │
//! └───────────┬─────────────┘                      └────────┬────────┘
//!             │                                             │
//!      maya-apiserver                            iscsiadm / mkfs / mount
//! ```
//!
//! # Modules
//!
//! - [`api`]: JSON binding of the lifecycle calls and its server
//! - [`controller`]: Volume reconciliation against the control plane
//! - [`driver`]: Identity, controller and node surfaces
//! - [`mapi`]: maya-apiserver REST client and endpoint discovery
//! - [`node`]: iSCSI attachment of volumes to the node
//! - [`domain`]: Wire types and capability traits
//! - [`error`]: Error types and the status code taxonomy

pub mod api;
pub mod context;
pub mod controller;
pub mod domain;
pub mod driver;
pub mod error;
pub mod locks;
pub mod mapi;
pub mod metrics;
pub mod node;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, CsiRouter};

pub use context::CallContext;

pub use controller::{get_volume_attributes, ControllerReconciler};

pub use domain::ports::{
    AttachBackend, AttachBackendRef, AttachOutcome, DetachOutcome, ServiceLocator,
    VolumeDirectory, VolumeDirectoryRef,
};
pub use domain::volume::{Volume, VolumeList, VolumeSpec};

pub use driver::{CsiDriver, DriverInfo, DEFAULT_DRIVER_NAME, DEFAULT_NODE_ID};

pub use error::{Code, Error, Result};

pub use locks::KeyedLocks;

pub use mapi::{KubeServiceLocator, MapiClient, MapiConfig, MapiConfigBuilder, StaticLocator};

pub use metrics::DriverMetrics;

pub use node::{AttachmentManager, IscsiAdmBackend, IscsiConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

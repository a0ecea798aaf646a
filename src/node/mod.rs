//! Node Module
//!
//! Node-side volume attachment: session construction, mount-table
//! inspection, the iscsiadm backend, and the attachment manager.

pub mod attachment;
pub mod iscsi;
pub mod mount;
pub mod session;

pub use attachment::AttachmentManager;
pub use iscsi::{IscsiAdmBackend, IscsiConfig};
pub use mount::MountTable;
pub use session::AttachmentSession;

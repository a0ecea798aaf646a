//! Controller Module
//!
//! Volume lifecycle reconciliation against the maya API server and the
//! attribute extraction shared by create and list.

pub mod attributes;
pub mod reconciler;

pub use attributes::{get_volume_attributes, parse_capacity};
pub use reconciler::ControllerReconciler;

//! Maya API Server Module
//!
//! Provides the REST client, URL construction, endpoint configuration,
//! and service discovery for the OpenEBS volume control plane.

pub mod client;
pub mod config;
pub mod locator;
pub mod urls;

pub use client::MapiClient;
pub use config::{MapiConfig, MapiConfigBuilder, DEFAULT_REQUEST_TIMEOUT, MAPI_SERVICE_NAME};
pub use locator::{KubeServiceLocator, StaticLocator};
pub use urls::VERSION_LATEST;

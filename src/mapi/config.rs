//! Maya API server endpoint configuration
//!
//! The endpoint is resolved once at startup and then shared read-only
//! (`Arc<MapiConfig>`) by every component for the life of the process.

use crate::domain::ports::ServiceLocator;
use crate::error::{Error, Result};
use crate::mapi::urls::VERSION_LATEST;
use backoff::ExponentialBackoff;
use reqwest::Url;
use std::time::Duration;
use tracing::{info, warn};

/// Service fronting the maya API server
pub const MAPI_SERVICE_NAME: &str = "maya-apiserver-service";

/// Fixed timeout applied to every control-plane request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Configuration
// =============================================================================

/// Resolved control-plane endpoint
#[derive(Debug, Clone)]
pub struct MapiConfig {
    /// Base URI (`scheme://host:port`)
    pub uri: Url,
    /// Namespace where the OpenEBS operator runs
    pub namespace: String,
    /// API version path segment
    pub version: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl MapiConfig {
    pub fn new(uri: Url, namespace: impl Into<String>) -> Self {
        Self {
            uri,
            namespace: namespace.into(),
            version: VERSION_LATEST.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds a `MapiConfig`, locating the endpoint through a `ServiceLocator`
#[derive(Debug, Clone)]
pub struct MapiConfigBuilder {
    namespace: String,
    service: String,
    version: String,
    timeout: Duration,
    discovery_timeout: Duration,
}

impl Default for MapiConfigBuilder {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            service: MAPI_SERVICE_NAME.to_string(),
            version: VERSION_LATEST.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            discovery_timeout: Duration::from_secs(60),
        }
    }
}

impl MapiConfigBuilder {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Upper bound on how long startup keeps retrying discovery
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::Configuration("namespace cannot be empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(Error::Configuration("API version cannot be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Configuration("request timeout must be positive".into()));
        }
        Ok(())
    }

    fn finish(&self, uri: Url) -> MapiConfig {
        info!(
            "maya-apiserver endpoint {} (namespace {}, version {})",
            uri, self.namespace, self.version
        );
        MapiConfig {
            uri,
            namespace: self.namespace.clone(),
            version: self.version.clone(),
            timeout: self.timeout,
        }
    }

    /// Build from an explicit URI, skipping discovery
    pub fn build_with_uri(&self, uri: Url) -> Result<MapiConfig> {
        self.validate()?;
        Ok(self.finish(uri))
    }

    /// Locate the endpoint once
    pub async fn build(&self, locator: &dyn ServiceLocator) -> Result<MapiConfig> {
        self.validate()?;
        let uri = locator.locate(&self.namespace, &self.service).await?;
        Ok(self.finish(uri))
    }

    /// Locate the endpoint, retrying transient discovery failures with
    /// exponential backoff until `discovery_timeout` elapses
    pub async fn build_with_retry(&self, locator: &dyn ServiceLocator) -> Result<MapiConfig> {
        self.validate()?;

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.discovery_timeout),
            ..Default::default()
        };

        let uri = backoff::future::retry(policy, || async {
            locator
                .locate(&self.namespace, &self.service)
                .await
                .map_err(|e| {
                    if e.is_transient() {
                        warn!("Locating {} failed, retrying: {}", self.service, e);
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        })
        .await?;

        Ok(self.finish(uri))
    }
}

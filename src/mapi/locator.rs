//! Control-plane service discovery
//!
//! `KubeServiceLocator` reads the maya API server Service object from the
//! cluster; `StaticLocator` returns a fixed URL for out-of-cluster runs.

use crate::domain::ports::ServiceLocator;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use reqwest::Url;
use tracing::debug;

// =============================================================================
// Kubernetes Locator
// =============================================================================

/// Locates services through the Kubernetes API
pub struct KubeServiceLocator {
    client: Client,
}

impl KubeServiceLocator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build from the in-cluster (or kubeconfig) environment
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ServiceLocator for KubeServiceLocator {
    async fn locate(&self, namespace: &str, service: &str) -> Result<Url> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let svc = api.get(service).await?;
        debug!("Resolved service {}/{}: {:?}", namespace, service, svc.spec);
        service_url(&svc)
    }
}

/// `http://{clusterIP}:{firstPort}` for a Service object
pub fn service_url(svc: &Service) -> Result<Url> {
    let name = svc.metadata.name.clone().unwrap_or_default();
    let spec = svc
        .spec
        .as_ref()
        .ok_or_else(|| Error::Configuration(format!("service {} has no spec", name)))?;

    let ip = spec
        .cluster_ip
        .as_deref()
        .filter(|ip| !ip.is_empty() && *ip != "None")
        .ok_or_else(|| Error::Configuration(format!("service {} has no cluster IP", name)))?;

    // TODO: select the port by name instead of taking the first one
    let port = spec
        .ports
        .as_ref()
        .and_then(|ports| ports.first())
        .map(|p| p.port)
        .ok_or_else(|| Error::Configuration(format!("service {} exposes no ports", name)))?;

    let host = if ip.contains(':') {
        format!("[{}]", ip)
    } else {
        ip.to_string()
    };

    Url::parse(&format!("http://{}:{}", host, port))
        .map_err(|e| Error::Configuration(format!("invalid maya-apiserver URL: {}", e)))
}

// =============================================================================
// Static Locator
// =============================================================================

/// Returns a preconfigured URL for every lookup
#[derive(Debug, Clone)]
pub struct StaticLocator {
    url: Url,
}

impl StaticLocator {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl ServiceLocator for StaticLocator {
    async fn locate(&self, _namespace: &str, _service: &str) -> Result<Url> {
        Ok(self.url.clone())
    }
}

//! JSON API Server
//!
//! Serves the lifecycle router on a TCP listener until shutdown is triggered.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::rest::CsiRouter;
use crate::driver::CsiDriver;
use crate::metrics::DriverMetrics;

/// Default JSON API bind address
pub const DEFAULT_API_ADDR: &str = "0.0.0.0:10000";

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Bind address
    pub addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 10000)),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

pub struct ApiServer {
    config: ApiServerConfig,
    driver: Arc<CsiDriver>,
    metrics: Arc<DriverMetrics>,
    shutdown_tx: broadcast::Sender<()>,
    calls: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, driver: Arc<CsiDriver>, metrics: Arc<DriverMetrics>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            driver,
            metrics,
            shutdown_tx,
            calls: CancellationToken::new(),
        }
    }

    /// Serve until `shutdown` is called
    pub async fn run(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind API server: {}", e)))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let app = CsiRouter::new(self.driver.clone(), self.metrics.clone())
            .with_shutdown(self.calls.clone())
            .build();

        if let Ok(addr) = listener.local_addr() {
            info!("CSI API listening on {}", addr);
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let calls = self.calls.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("CSI API shutting down");
                calls.cancel();
            })
            .await
            .map_err(|e| Error::Internal(format!("API server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown; in-flight calls observe cancellation
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake_driver;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.addr, DEFAULT_API_ADDR.parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let (driver, _, _) = fake_driver();
        let server = Arc::new(ApiServer::new(
            ApiServerConfig::default(),
            Arc::new(driver),
            Arc::new(DriverMetrics::new().unwrap()),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        let resp = reqwest::Client::new()
            .post(format!("http://{}/csi/v0/Probe", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["ready"], true);

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

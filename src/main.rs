//! OpenEBS CSI Plugin
//!
//! Resolves the maya-apiserver endpoint, wires the controller reconciler and
//! the iSCSI attachment manager into the lifecycle surface, and serves it
//! next to health and metrics listeners.

use anyhow::Context;
use clap::Parser;
use reqwest::Url;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use openebs_csi::{
    ApiServer, ApiServerConfig, AttachmentManager, ControllerReconciler, CsiDriver, DriverInfo,
    DriverMetrics, IscsiAdmBackend, IscsiConfig, KubeServiceLocator, MapiClient,
    MapiConfigBuilder, DEFAULT_DRIVER_NAME, DEFAULT_NODE_ID,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// OpenEBS CSI plugin - volume provisioning and iSCSI attachment
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Lifecycle API bind address
    #[arg(long, env = "CSI_ENDPOINT", default_value = "0.0.0.0:10000")]
    endpoint: String,

    /// Node identifier reported by NodeGetId
    #[arg(long, env = "NODE_ID", default_value = DEFAULT_NODE_ID)]
    node_id: String,

    /// Name the plugin registers under
    #[arg(long, env = "DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
    driver_name: String,

    /// Explicit maya-apiserver URL; skips service discovery
    #[arg(long, env = "MAPI_URL")]
    mapi_url: Option<String>,

    /// Namespace of the maya-apiserver service
    #[arg(long, env = "OPENEBS_NAMESPACE", default_value = "default")]
    openebs_namespace: String,

    /// maya-apiserver service name
    #[arg(long, env = "MAPI_SERVICE", default_value = "maya-apiserver-service")]
    mapi_service: String,

    /// maya-apiserver API version
    #[arg(long, env = "MAPI_VERSION", default_value = "latest")]
    mapi_version: String,

    /// Timeout for each maya-apiserver request
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "10")]
    request_timeout_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Filesystem created on blank volumes when the request names none
    #[arg(long, env = "FS_TYPE", default_value = "ext4")]
    fs_type: String,

    /// How long to wait for the iSCSI device after login
    #[arg(long, env = "DEVICE_TIMEOUT_SECS", default_value = "10")]
    device_timeout_secs: u64,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting OpenEBS CSI plugin");
    info!("  Version: {}", openebs_csi::VERSION);
    info!("  Driver: {}", args.driver_name);
    info!("  Node: {}", args.node_id);
    info!("  Endpoint: {}", args.endpoint);

    // Resolve the control-plane endpoint once
    let builder = MapiConfigBuilder::default()
        .namespace(args.openebs_namespace.clone())
        .service(args.mapi_service.clone())
        .version(args.mapi_version.clone())
        .timeout(Duration::from_secs(args.request_timeout_secs));

    let mapi_config = match &args.mapi_url {
        Some(url) => {
            let uri = Url::parse(url).with_context(|| format!("invalid --mapi-url {}", url))?;
            builder.build_with_uri(uri)?
        }
        None => {
            let locator = KubeServiceLocator::try_default()
                .await
                .context("failed to create Kubernetes client")?;
            builder
                .build_with_retry(&locator)
                .await
                .context("failed to locate maya-apiserver")?
        }
    };

    // Controller side
    let directory = Arc::new(MapiClient::new(Arc::new(mapi_config))?);
    let controller = Arc::new(ControllerReconciler::new(directory));

    // Node side
    let iscsi = IscsiConfig::default()
        .with_default_fs_type(args.fs_type.clone())
        .with_device_timeout(Duration::from_secs(args.device_timeout_secs));
    let attachments = Arc::new(AttachmentManager::new(Arc::new(IscsiAdmBackend::new(iscsi))));

    let info = DriverInfo::new(
        args.driver_name.clone(),
        openebs_csi::VERSION,
        args.node_id.clone(),
    )?;
    let driver = Arc::new(CsiDriver::new(info, controller, attachments));
    let metrics = Arc::new(DriverMetrics::new()?);

    // Start health server
    let health_addr = parse_addr(&args.health_addr, "health")?;
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    let exporter = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, exporter).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Create and run API server
    let api_config = ApiServerConfig {
        addr: parse_addr(&args.endpoint, "endpoint")?,
    };
    let api_server = Arc::new(ApiServer::new(api_config, driver, metrics));

    let signal_server = api_server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_server.shutdown();
        }
    });

    api_server.run().await?;

    info!("Plugin shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str, what: &str) -> anyhow::Result<SocketAddr> {
    addr.parse()
        .with_context(|| format!("invalid {} address {}", what, addr))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("reqwest=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: SocketAddr) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let (status, body) = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => (StatusCode::OK, "ok"),
                _ => (StatusCode::NOT_FOUND, "not found"),
            };
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .context("failed to bind health server")?
        .serve(make_svc)
        .await
        .context("health server failed")?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, metrics: Arc<DriverMetrics>) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    match (req.uri().path(), metrics.encode()) {
                        ("/metrics", Ok((content_type, buffer))) => {
                            if let Ok(value) = HeaderValue::from_str(&content_type) {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            *response.body_mut() = Body::from(buffer);
                        }
                        ("/metrics", Err(e)) => {
                            error!("Failed to encode metrics: {}", e);
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        }
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .context("failed to bind metrics server")?
        .serve(make_svc)
        .await
        .context("metrics server failed")?;

    Ok(())
}

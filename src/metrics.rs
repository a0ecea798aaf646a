//! Lifecycle operation metrics
//!
//! Prometheus counters and latency histograms per CSI operation, kept in a
//! registry owned by the driver process and served by the metrics listener.

use crate::error::{Code, Error, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Code label recorded for successful calls
const CODE_OK: &str = "OK";

#[derive(Clone)]
pub struct DriverMetrics {
    registry: Registry,
    operations: IntCounterVec,
    duration: HistogramVec,
}

impl DriverMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("csi_operations_total", "Lifecycle calls by operation and result code"),
            &["operation", "code"],
        )
        .map_err(metrics_error)?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "csi_operation_duration_seconds",
                "Lifecycle call latency by operation",
            ),
            &["operation"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            operations,
            duration,
        })
    }

    /// Record one finished call; `code` is `None` on success
    pub fn observe(&self, operation: &str, code: Option<Code>, elapsed: Duration) {
        let code = code.map(|c| c.as_str()).unwrap_or(CODE_OK);
        self.operations.with_label_values(&[operation, code]).inc();
        self.duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn count(&self, operation: &str, code: Option<Code>) -> u64 {
        let code = code.map(|c| c.as_str()).unwrap_or(CODE_OK);
        self.operations.with_label_values(&[operation, code]).get()
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics error: {}", e))
}

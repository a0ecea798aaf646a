//! Error types for the OpenEBS CSI plugin
//!
//! Provides structured error types for the maya-apiserver client, the
//! controller reconciler, and node-side attachment, plus the status code
//! taxonomy every lifecycle call is answered with.

use reqwest::StatusCode;
use thiserror::Error;

/// Unified error type for the plugin
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Lifecycle Errors (returned by the CSI surface)
    // =========================================================================
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    DeadlineExceeded(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unimplemented(String),

    #[error("request cancelled")]
    Cancelled,

    // =========================================================================
    // Maya API Server Errors
    // =========================================================================
    #[error("invalid version")]
    InvalidVersion,

    #[error("invalid volume name")]
    InvalidVolumeName,

    /// Non-200 answer from the control plane; displays the canonical reason text
    #[error("{}", .status.canonical_reason().unwrap_or("Unknown Status"))]
    ExternalService { status: StatusCode },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML encode error: {0}")]
    YamlEncode(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // Discovery / Configuration Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Node Errors
    // =========================================================================
    #[error("{command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status codes surfaced to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    DeadlineExceeded,
    Cancelled,
    Unavailable,
    Internal,
    Unimplemented,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::InvalidArgument => "InvalidArgument",
            Code::NotFound => "NotFound",
            Code::AlreadyExists => "AlreadyExists",
            Code::DeadlineExceeded => "DeadlineExceeded",
            Code::Cancelled => "Cancelled",
            Code::Unavailable => "Unavailable",
            Code::Internal => "Internal",
            Code::Unimplemented => "Unimplemented",
        }
    }

    /// HTTP status used when a code is carried over the JSON binding
    pub fn http_status(&self) -> StatusCode {
        match self {
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            // nginx's "client closed request"; no registered constant exists
            Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error into the status taxonomy
    pub fn code(&self) -> Code {
        match self {
            Error::InvalidArgument(_) | Error::InvalidVersion | Error::InvalidVolumeName => {
                Code::InvalidArgument
            }
            Error::NotFound(_) => Code::NotFound,
            Error::AlreadyExists(_) => Code::AlreadyExists,
            Error::DeadlineExceeded(_) => Code::DeadlineExceeded,
            Error::Cancelled => Code::Cancelled,
            Error::Unimplemented(_) => Code::Unimplemented,

            // Control plane unreachable or answering non-2xx
            Error::Unavailable(_)
            | Error::ExternalService { .. }
            | Error::Http(_)
            | Error::Kube(_) => Code::Unavailable,

            Error::Internal(_)
            | Error::YamlEncode(_)
            | Error::JsonParse(_)
            | Error::Configuration(_)
            | Error::Command { .. }
            | Error::Io(_) => Code::Internal,
        }
    }

    /// Check if the control plane reported the resource as absent
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ExternalService { status } if *status == StatusCode::NOT_FOUND
        )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self.code(), Code::Unavailable | Code::DeadlineExceeded)
    }
}

/// Result type alias for the plugin
pub type Result<T> = std::result::Result<T, Error>;

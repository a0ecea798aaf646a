//! API Module
//!
//! JSON binding of the identity, controller and node lifecycle calls.

pub mod rest;
pub mod server;

pub use rest::{ApiErrorResponse, CsiRouter, TIMEOUT_HEADER};
pub use server::{ApiServer, ApiServerConfig, DEFAULT_API_ADDR};

//! approvald library
//!
//! This module provides the core components for the approval daemon:
//! - REST API handlers
//! - Layered configuration
//! - Server lifecycle (store selection, timer recovery, graceful shutdown)

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;

//! HTTP API for approvald

pub mod rest;

pub use rest::{create_router, AppState};

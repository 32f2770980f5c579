//! Durable state store for approval requests.
//!
//! This crate defines the storage contract the approval engine relies on:
//! - approval request records (system of record)
//! - a per-approval, append-only, hash-linked audit trail
//!
//! Design stance:
//! - `compare_and_transition` is the only write against an existing request.
//!   It commits the transition and its audit entry together, or neither.
//! - There is no blind overwrite and no delete.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod chain;
mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use chain::{verify_chain, ChainBreak};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryApprovalStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresApprovalStore;
pub use traits::{
    ApprovalFilter, ApprovalStorage, ApprovalStore, AuditLog, CommittedTransition, QueryWindow,
};

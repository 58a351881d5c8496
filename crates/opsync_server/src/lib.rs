//! # OpSync Server
//!
//! Reference sync server for the OpSync protocol.
//!
//! This crate provides:
//! - Per-user operation stores with monotonic, gapless sequence allocation
//! - Gap detection against each client's claimed cursor
//! - Incremental catch-up (paged pulls) and full-state ingestion
//! - Per-device bookkeeping for observability and pruning decisions
//!
//! ## Key Invariants
//!
//! - `server_seq` is strictly increasing per user; accepted operations are
//!   gapless
//! - Pushes are deduplicated by operation id, so retries are no-ops
//! - Each push runs under one per-user lock (the transaction boundary);
//!   concurrent devices of one user serialize on sequence allocation
//! - Device bookkeeping never influences sequence allocation

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod handler;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use server::SyncServer;
pub use store::{SyncDevice, UserStore, UserSyncState};

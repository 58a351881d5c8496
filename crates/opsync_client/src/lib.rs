//! # OpSync Client
//!
//! Client-side sync for the OpSync operation-log protocol.
//!
//! This crate provides:
//! - Append-only operation log with durable file-backed storage
//! - Named FIFO write lock and flush barrier
//! - Conflict resolution (last-writer-wins and per-field merge)
//! - Sync state machine (idle → pulling → pushing → synced)
//! - Gap detection with full-state recovery
//! - Retry with exponential backoff
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push** synchronization model:
//! 1. Pull remote operations first (server sequencing is authoritative)
//! 2. Apply them locally through the conflict resolver
//! 3. Flush the write queue, then push pending local operations
//!
//! ## Key Invariants
//!
//! - A local mutation is durable in the log before it is applied or pushed
//! - Operations apply at most once (operation ids are idempotency keys)
//! - All log writers share one FIFO lock, so the flush barrier covers them
//! - A server-reported gap escalates to a full-state upload, never data loss

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod lock;
mod oplog;
mod resolver;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use engine::{
    PushPhaseResult, SyncCycleResult, SyncEngine, SyncState, SyncStats, WRITE_LOCK_NAME,
};
pub use error::{ClientError, ClientResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use lock::LockService;
pub use oplog::{FileLogStore, LogStore, MemoryLogStore, OperationLog};
pub use resolver::{ApplyOutcome, ConflictChoice, ConflictResolver, PendingConflict};
pub use transport::{MockTransport, SyncTransport};

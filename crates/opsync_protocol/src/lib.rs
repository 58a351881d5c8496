//! # OpSync Protocol
//!
//! Wire types for the operation-log sync protocol.
//!
//! This crate provides:
//! - [`Operation`], the immutable record of one entity mutation
//! - Push/pull/full-push request and response messages
//! - The wire codec: CBOR bodies, deflate-compressed, with an optional
//!   base64 wrapping for transports without binary upload
//!
//! ## Key Invariants
//!
//! - An operation is immutable once created; only `server_seq` and
//!   `received_at` are stamped post-hoc by the server
//! - `server_seq` is strictly increasing per user and gapless for accepted
//!   operations
//! - A base64-wrapped body is compressed first, then encoded; decoding strips
//!   base64 before decompressing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod operation;
mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{PullRequest, PullResponse, PushRequest, PushResponse};
pub use operation::{OpKind, Operation};
pub use wire::{decode_body, decode_body_auto, decode_body_b64, encode_body, encode_body_b64};

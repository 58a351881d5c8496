//! # OpSync Model
//!
//! Entity vocabulary and local state for the OpSync engine.
//!
//! This crate provides:
//! - Identifier types ([`OpId`], [`ClientId`], [`UserId`])
//! - The closed [`EntityKind`] enumeration
//! - The [`EntityRegistry`] mapping each kind to its merge behavior
//! - [`AppState`], the explicit in-memory entity store
//!
//! ## Key Invariants
//!
//! - Every `EntityKind` has a registry entry (checked at compile time by the
//!   exhaustive match in [`EntityRegistry::with_defaults`] and re-verified at
//!   startup by [`EntityRegistry::verify_complete`])
//! - Reserved kinds never participate in ordinary sync
//! - An operation id is applied to [`AppState`] at most once

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod ids;
mod registry;
mod state;

pub use entity::EntityKind;
pub use error::{ModelError, ModelResult};
pub use ids::{ClientId, OpId, UserId};
pub use registry::{EntityRegistry, MergeStrategy, RegistryEntry};
pub use state::{AppState, EntityRecord, FieldMap};

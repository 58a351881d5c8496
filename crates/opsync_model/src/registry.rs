//! Entity registry: kind → merge/singleton/sync behavior.

use crate::entity::EntityKind;
use crate::error::{ModelError, ModelResult};
use std::collections::HashMap;

/// How an incoming operation's payload merges into local entity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Entity-level last-writer-wins by operation id.
    Lww,
    /// Field-level merge: each top-level field keeps its own last writer,
    /// so independent fields changed on two devices both survive.
    FieldMerge,
}

/// Registry configuration for one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Merge behavior for concurrent changes.
    pub merge: MergeStrategy,
    /// Whether exactly one logical instance exists per user.
    ///
    /// Singletons cannot be auto-merged; concurrent changes surface a
    /// manual choose-local-or-remote resolution.
    pub singleton: bool,
    /// Whether the kind participates in ordinary sync at all.
    pub synced: bool,
}

impl RegistryEntry {
    /// A regular synced entity with the given merge strategy.
    pub const fn synced(merge: MergeStrategy) -> Self {
        Self {
            merge,
            singleton: false,
            synced: true,
        }
    }

    /// A synced singleton (manual conflict resolution).
    pub const fn singleton(merge: MergeStrategy) -> Self {
        Self {
            merge,
            singleton: true,
            synced: true,
        }
    }

    /// A reserved kind excluded from sync.
    pub const fn reserved() -> Self {
        Self {
            merge: MergeStrategy::Lww,
            singleton: false,
            synced: false,
        }
    }
}

/// Static mapping from entity kind to its merge behavior.
///
/// # Completeness
///
/// [`EntityRegistry::with_defaults`] builds the table from an exhaustive
/// `match` over [`EntityKind`], so adding a variant without deciding its
/// behavior is a compile error. [`EntityRegistry::verify_complete`] re-checks
/// the invariant at process start and fails fast, covering registries built
/// by hand.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    entries: HashMap<EntityKind, RegistryEntry>,
}

impl EntityRegistry {
    /// Creates an empty registry. Entries must be added with [`register`].
    ///
    /// [`register`]: EntityRegistry::register
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Builds the registry with the default behavior for every kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in EntityKind::ALL {
            // Exhaustive by construction: a new EntityKind variant will not
            // compile until it gets an arm here.
            let entry = match kind {
                EntityKind::Task => RegistryEntry::synced(MergeStrategy::FieldMerge),
                EntityKind::Project => RegistryEntry::synced(MergeStrategy::FieldMerge),
                EntityKind::Tag => RegistryEntry::synced(MergeStrategy::Lww),
                EntityKind::Note => RegistryEntry::synced(MergeStrategy::Lww),
                EntityKind::TaskRepeatCfg => RegistryEntry::synced(MergeStrategy::Lww),
                EntityKind::GlobalConfig => RegistryEntry::singleton(MergeStrategy::Lww),
                EntityKind::MigrationMarker => RegistryEntry::reserved(),
                EntityKind::RecoveryMarker => RegistryEntry::reserved(),
            };
            registry.register(kind, entry);
        }
        registry
    }

    /// Registers (or replaces) the entry for a kind.
    pub fn register(&mut self, kind: EntityKind, entry: RegistryEntry) {
        self.entries.insert(kind, entry);
    }

    /// Looks up the entry for a kind.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnregisteredKind`] when the kind has no entry.
    /// A missing entry is a programming error, not a valid runtime state.
    pub fn entry(&self, kind: EntityKind) -> ModelResult<&RegistryEntry> {
        self.entries
            .get(&kind)
            .ok_or(ModelError::UnregisteredKind(kind))
    }

    /// Looks up the entry for a kind that must participate in sync.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ReservedKind`] when the kind is registered but
    /// excluded from sync.
    pub fn synced_entry(&self, kind: EntityKind) -> ModelResult<&RegistryEntry> {
        let entry = self.entry(kind)?;
        if !entry.synced {
            return Err(ModelError::ReservedKind(kind));
        }
        Ok(entry)
    }

    /// Verifies that every entity kind has an entry.
    ///
    /// Call once at process start so a misconfigured registry fails fast
    /// rather than silently losing merge behavior at first use.
    pub fn verify_complete(&self) -> ModelResult<()> {
        for kind in EntityKind::ALL {
            self.entry(kind)?;
        }
        Ok(())
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

//! The closed entity kind enumeration.

use serde::{Deserialize, Serialize};

/// Every kind of entity the operation log can record.
///
/// The enumeration is closed: an operation carrying a kind outside this list
/// fails to decode at the protocol boundary. Each kind must have an entry in
/// the [`crate::EntityRegistry`]; omission is a configuration defect caught
/// at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A task.
    Task,
    /// A project grouping tasks.
    Project,
    /// A tag.
    Tag,
    /// A free-form note.
    Note,
    /// A task repetition schedule.
    TaskRepeatCfg,
    /// Global per-user configuration. Singleton.
    GlobalConfig,
    /// Migration bookkeeping. Reserved, never synced.
    MigrationMarker,
    /// Recovery marker written during full-state reconciliation.
    /// Reserved, never synced.
    RecoveryMarker,
}

impl EntityKind {
    /// All entity kinds, for registry completeness checks.
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Task,
        EntityKind::Project,
        EntityKind::Tag,
        EntityKind::Note,
        EntityKind::TaskRepeatCfg,
        EntityKind::GlobalConfig,
        EntityKind::MigrationMarker,
        EntityKind::RecoveryMarker,
    ];
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Task => "task",
            EntityKind::Project => "project",
            EntityKind::Tag => "tag",
            EntityKind::Note => "note",
            EntityKind::TaskRepeatCfg => "task_repeat_cfg",
            EntityKind::GlobalConfig => "global_config",
            EntityKind::MigrationMarker => "migration_marker",
            EntityKind::RecoveryMarker => "recovery_marker",
        };
        f.write_str(name)
    }
}

//! In-memory application entity state.

use crate::entity::EntityKind;
use crate::ids::OpId;
use std::collections::{HashMap, HashSet};

/// A JSON object used as an entity payload or a partial change set.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// Current local state of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Current field values.
    pub payload: FieldMap,
    /// Id of the most recent operation applied to this entity.
    pub last_op_id: OpId,
    /// Per-field last writer, maintained for field-merge kinds.
    pub field_writers: HashMap<String, OpId>,
    /// Whether the entity has been deleted (tombstone).
    ///
    /// Tombstones are kept so a late-arriving update loses to the delete
    /// under last-writer-wins.
    pub deleted: bool,
}

impl EntityRecord {
    /// Creates a record from a full payload written by one operation.
    pub fn new(payload: FieldMap, op_id: OpId) -> Self {
        let field_writers = payload.keys().map(|k| (k.clone(), op_id)).collect();
        Self {
            payload,
            last_op_id: op_id,
            field_writers,
            deleted: false,
        }
    }

    /// Creates a tombstone record.
    pub fn tombstone(op_id: OpId) -> Self {
        Self {
            payload: FieldMap::new(),
            last_op_id: op_id,
            field_writers: HashMap::new(),
            deleted: true,
        }
    }
}

/// The application's entity store.
///
/// `AppState` is an explicit object owned by the composition root and passed
/// by reference to the components that need it; there is no ambient global.
/// The conflict resolver is its sole writer on the sync path; the UI layer
/// writes through the engine's local-commit path.
#[derive(Debug, Default)]
pub struct AppState {
    records: HashMap<(EntityKind, String), EntityRecord>,
    applied: HashSet<OpId>,
}

impl AppState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for an entity, including tombstones.
    pub fn record(&self, kind: EntityKind, entity_id: &str) -> Option<&EntityRecord> {
        self.records.get(&(kind, entity_id.to_string()))
    }

    /// Returns a mutable record for an entity.
    pub fn record_mut(&mut self, kind: EntityKind, entity_id: &str) -> Option<&mut EntityRecord> {
        self.records.get_mut(&(kind, entity_id.to_string()))
    }

    /// Inserts or replaces the record for an entity.
    pub fn insert_record(&mut self, kind: EntityKind, entity_id: String, record: EntityRecord) {
        self.records.insert((kind, entity_id), record);
    }

    /// Marks an operation id as applied.
    ///
    /// Returns `false` if the id was already applied; callers must then skip
    /// the operation (applied once, never reapplied).
    pub fn mark_applied(&mut self, op_id: OpId) -> bool {
        self.applied.insert(op_id)
    }

    /// Returns true if the operation id has already been applied.
    pub fn is_applied(&self, op_id: OpId) -> bool {
        self.applied.contains(&op_id)
    }

    /// Iterates over live (non-deleted) entities.
    ///
    /// This is the source for full-state snapshot uploads.
    pub fn live_entities(&self) -> impl Iterator<Item = (EntityKind, &str, &EntityRecord)> {
        self.records
            .iter()
            .filter(|(_, record)| !record.deleted)
            .map(|((kind, id), record)| (*kind, id.as_str(), record))
    }

    /// Iterates over tombstoned entities.
    ///
    /// Full-state uploads include these as synthetic deletes so peers
    /// converge on removals whose history the server no longer retains.
    pub fn tombstoned_entities(&self) -> impl Iterator<Item = (EntityKind, &str, &EntityRecord)> {
        self.records
            .iter()
            .filter(|(_, record)| record.deleted)
            .map(|((kind, id), record)| (*kind, id.as_str(), record))
    }

    /// Number of live entities.
    pub fn live_count(&self) -> usize {
        self.records.values().filter(|r| !r.deleted).count()
    }

    /// Returns the payload of a live entity, if present.
    pub fn payload(&self, kind: EntityKind, entity_id: &str) -> Option<&FieldMap> {
        self.record(kind, entity_id)
            .filter(|r| !r.deleted)
            .map(|r| &r.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn insert_and_lookup() {
        let mut state = AppState::new();
        let op = OpId::generate();

        state.insert_record(
            EntityKind::Task,
            "t1".into(),
            EntityRecord::new(payload(&[("title", "write tests")]), op),
        );

        let record = state.record(EntityKind::Task, "t1").unwrap();
        assert_eq!(record.last_op_id, op);
        assert_eq!(record.field_writers.get("title"), Some(&op));
        assert_eq!(state.live_count(), 1);
    }

    #[test]
    fn applied_ids_are_tracked_once() {
        let mut state = AppState::new();
        let op = OpId::generate();

        assert!(state.mark_applied(op));
        assert!(!state.mark_applied(op));
        assert!(state.is_applied(op));
    }

    #[test]
    fn tombstones_are_not_live() {
        let mut state = AppState::new();
        let op = OpId::generate();

        state.insert_record(EntityKind::Task, "t1".into(), EntityRecord::tombstone(op));

        assert_eq!(state.live_count(), 0);
        assert!(state.payload(EntityKind::Task, "t1").is_none());
        // But the tombstone itself is still visible for LWW checks.
        assert!(state.record(EntityKind::Task, "t1").unwrap().deleted);
    }

    #[test]
    fn live_and_tombstoned_iterators_partition_the_records() {
        let mut state = AppState::new();
        state.insert_record(
            EntityKind::Task,
            "t1".into(),
            EntityRecord::new(payload(&[("title", "alive")]), OpId::generate()),
        );
        state.insert_record(
            EntityKind::Note,
            "n1".into(),
            EntityRecord::tombstone(OpId::generate()),
        );

        let live: Vec<_> = state.live_entities().map(|(k, id, _)| (k, id)).collect();
        assert_eq!(live, vec![(EntityKind::Task, "t1")]);

        let dead: Vec<_> = state
            .tombstoned_entities()
            .map(|(k, id, _)| (k, id))
            .collect();
        assert_eq!(dead, vec![(EntityKind::Note, "n1")]);
    }
}

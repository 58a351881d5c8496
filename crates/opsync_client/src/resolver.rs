//! Conflict resolution: applying remote operations to local state.

use crate::error::ClientResult;
use opsync_model::{AppState, EntityKind, EntityRecord, EntityRegistry, FieldMap, MergeStrategy};
use opsync_protocol::{OpKind, Operation};

/// Result of applying one remote operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The operation changed local state.
    Applied,
    /// The operation was already applied; nothing changed.
    Duplicate,
    /// The operation lost to a newer local writer; nothing changed.
    Stale,
    /// A singleton conflict needs a manual local-or-remote decision.
    ManualRequired(PendingConflict),
}

/// A singleton conflict awaiting a user decision.
///
/// Held by the engine until [`crate::engine::SyncEngine::resolve_conflict`]
/// is called with a [`ConflictChoice`]. The remote operation is *not* marked
/// applied while pending, so re-delivery before resolution is harmless.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConflict {
    /// Kind of the conflicted entity.
    pub entity_kind: EntityKind,
    /// Id of the conflicted entity.
    pub entity_id: String,
    /// Current local payload, if the entity exists locally.
    pub local: Option<FieldMap>,
    /// The remote operation that collided with local pending changes.
    pub remote: Operation,
}

/// The user's decision for a [`PendingConflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Keep the local version and re-assert it as a fresh operation.
    KeepLocal,
    /// Discard local pending changes and apply the remote operation.
    AcceptRemote,
}

/// Applies remote operations to [`AppState`] under the registry's merge
/// rules.
///
/// The resolver is the sole writer of `AppState` on the sync path. All
/// decisions are deterministic functions of operation ids, so every device
/// that applies the same set of operations converges to the same state
/// regardless of delivery order.
pub struct ConflictResolver {
    registry: EntityRegistry,
}

impl ConflictResolver {
    /// Creates a resolver over the given registry.
    pub fn new(registry: EntityRegistry) -> Self {
        Self { registry }
    }

    /// Applies one operation.
    ///
    /// `local_pending` reports whether the entity has unpushed local
    /// mutations; it triggers manual resolution for singleton kinds only.
    ///
    /// # Errors
    ///
    /// Returns an error for reserved kinds, unregistered kinds, or a
    /// create/update missing its payload.
    pub fn apply(
        &self,
        state: &mut AppState,
        op: &Operation,
        local_pending: bool,
    ) -> ClientResult<ApplyOutcome> {
        let entry = self.registry.synced_entry(op.entity_kind)?;

        if state.is_applied(op.id) {
            return Ok(ApplyOutcome::Duplicate);
        }

        if entry.singleton && local_pending {
            if let Some(record) = state.record(op.entity_kind, &op.entity_id) {
                // Not marked applied: a pending conflict may be re-delivered
                // on the next pull and must still surface.
                return Ok(ApplyOutcome::ManualRequired(PendingConflict {
                    entity_kind: op.entity_kind,
                    entity_id: op.entity_id.clone(),
                    local: (!record.deleted).then(|| record.payload.clone()),
                    remote: op.clone(),
                }));
            }
        }

        state.mark_applied(op.id);

        let outcome = match op.kind {
            OpKind::Create => self.apply_create(state, op)?,
            OpKind::Update => self.apply_update(state, op, entry.merge)?,
            OpKind::Delete => self.apply_delete(state, op),
        };
        Ok(outcome)
    }

    fn apply_create(&self, state: &mut AppState, op: &Operation) -> ClientResult<ApplyOutcome> {
        let payload = required_payload(op)?;
        match state.record(op.entity_kind, &op.entity_id) {
            Some(record) if record.last_op_id >= op.id => Ok(ApplyOutcome::Stale),
            _ => {
                state.insert_record(
                    op.entity_kind,
                    op.entity_id.clone(),
                    EntityRecord::new(payload.clone(), op.id),
                );
                Ok(ApplyOutcome::Applied)
            }
        }
    }

    fn apply_update(
        &self,
        state: &mut AppState,
        op: &Operation,
        merge: MergeStrategy,
    ) -> ClientResult<ApplyOutcome> {
        let changes = required_payload(op)?;

        // Updates for unseen entities take the change set as the initial
        // value; newer updates resurrect tombstones, older ones lose to them.
        let probe = state
            .record(op.entity_kind, &op.entity_id)
            .map(|r| (r.deleted, r.last_op_id));
        match probe {
            None => {
                state.insert_record(
                    op.entity_kind,
                    op.entity_id.clone(),
                    EntityRecord::new(changes.clone(), op.id),
                );
                return Ok(ApplyOutcome::Applied);
            }
            Some((true, last_op_id)) => {
                if op.id > last_op_id {
                    state.insert_record(
                        op.entity_kind,
                        op.entity_id.clone(),
                        EntityRecord::new(changes.clone(), op.id),
                    );
                    return Ok(ApplyOutcome::Applied);
                }
                return Ok(ApplyOutcome::Stale);
            }
            Some((false, last_op_id)) => {
                if merge == MergeStrategy::Lww && op.id <= last_op_id {
                    return Ok(ApplyOutcome::Stale);
                }
            }
        }

        let mut any_applied = false;
        if let Some(record) = state.record_mut(op.entity_kind, &op.entity_id) {
            for (field, value) in changes {
                let wins = match merge {
                    MergeStrategy::Lww => true,
                    MergeStrategy::FieldMerge => record
                        .field_writers
                        .get(field)
                        .is_none_or(|writer| op.id > *writer),
                };
                if wins {
                    record.payload.insert(field.clone(), value.clone());
                    record.field_writers.insert(field.clone(), op.id);
                    any_applied = true;
                }
            }
            if op.id > record.last_op_id {
                record.last_op_id = op.id;
            }
        }

        if any_applied {
            Ok(ApplyOutcome::Applied)
        } else {
            Ok(ApplyOutcome::Stale)
        }
    }

    fn apply_delete(&self, state: &mut AppState, op: &Operation) -> ApplyOutcome {
        match state.record(op.entity_kind, &op.entity_id) {
            Some(record) if record.last_op_id >= op.id => ApplyOutcome::Stale,
            _ => {
                state.insert_record(
                    op.entity_kind,
                    op.entity_id.clone(),
                    EntityRecord::tombstone(op.id),
                );
                ApplyOutcome::Applied
            }
        }
    }
}

fn required_payload(op: &Operation) -> ClientResult<&FieldMap> {
    op.payload.as_ref().ok_or_else(|| {
        opsync_model::ModelError::MissingPayload {
            kind: op.entity_kind,
            entity_id: op.entity_id.clone(),
        }
        .into()
    })
}

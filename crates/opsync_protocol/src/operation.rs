//! Sync operations.

use opsync_model::{ClientId, EntityKind, FieldMap, OpId};
use serde::{Deserialize, Serialize};

/// What an operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Entity was created; payload is the full value.
    Create,
    /// Entity was updated; payload is a partial change set.
    Update,
    /// Entity was deleted; no payload.
    Delete,
}

/// An immutable record of one entity mutation.
///
/// Operations are created by the client write path, persisted in the local
/// operation log, pushed to the server in batches, and delivered to other
/// devices via pull. Once created, an operation never changes; the server
/// stamps `server_seq` and `received_at` on acceptance, nothing else.
///
/// # Fields
///
/// - `id`: time-ordered UUIDv7; idempotency key and LWW tie-breaker
/// - `entity_kind` / `entity_id`: the entity being mutated
/// - `kind`: create, update, or delete
/// - `payload`: full value (create), change set (update), or absent (delete)
/// - `client_id`: originating device
/// - `server_seq`: per-user monotonic sequence; absent until accepted
/// - `received_at`: server ingestion time, unix milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation id.
    pub id: OpId,
    /// Entity kind.
    pub entity_kind: EntityKind,
    /// Entity id.
    pub entity_id: String,
    /// Operation kind.
    pub kind: OpKind,
    /// Payload, when the kind carries one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<FieldMap>,
    /// Originating device.
    pub client_id: ClientId,
    /// Server-assigned sequence number.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub server_seq: Option<u64>,
    /// Server ingestion timestamp, unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub received_at: Option<u64>,
}

impl Operation {
    /// Creates a new `Create` operation with a fresh id.
    pub fn create(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        payload: FieldMap,
        client_id: ClientId,
    ) -> Self {
        Self {
            id: OpId::generate(),
            entity_kind,
            entity_id: entity_id.into(),
            kind: OpKind::Create,
            payload: Some(payload),
            client_id,
            server_seq: None,
            received_at: None,
        }
    }

    /// Creates a new `Update` operation with a fresh id.
    pub fn update(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        changes: FieldMap,
        client_id: ClientId,
    ) -> Self {
        Self {
            id: OpId::generate(),
            entity_kind,
            entity_id: entity_id.into(),
            kind: OpKind::Update,
            payload: Some(changes),
            client_id,
            server_seq: None,
            received_at: None,
        }
    }

    /// Creates a new `Delete` operation with a fresh id.
    pub fn delete(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        client_id: ClientId,
    ) -> Self {
        Self {
            id: OpId::generate(),
            entity_kind,
            entity_id: entity_id.into(),
            kind: OpKind::Delete,
            payload: None,
            client_id,
            server_seq: None,
            received_at: None,
        }
    }

    /// A synthetic create for full-state uploads.
    ///
    /// Reuses the entity's last-writer operation id so a retried full-state
    /// push deduplicates server-side like any other batch.
    pub fn snapshot(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        payload: FieldMap,
        last_op_id: OpId,
        client_id: ClientId,
    ) -> Self {
        Self {
            id: last_op_id,
            entity_kind,
            entity_id: entity_id.into(),
            kind: OpKind::Create,
            payload: Some(payload),
            client_id,
            server_seq: None,
            received_at: None,
        }
    }

    /// A synthetic delete for full-state uploads.
    ///
    /// Local tombstones ride along in the recovery batch so peers converge
    /// on deletes whose history the server no longer retains. Reuses the
    /// tombstone's operation id for the same dedup behavior as [`snapshot`].
    ///
    /// [`snapshot`]: Operation::snapshot
    pub fn snapshot_delete(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        last_op_id: OpId,
        client_id: ClientId,
    ) -> Self {
        Self {
            id: last_op_id,
            entity_kind,
            entity_id: entity_id.into(),
            kind: OpKind::Delete,
            payload: None,
            client_id,
            server_seq: None,
            received_at: None,
        }
    }

    /// Returns a copy stamped with server sequencing metadata.
    pub fn with_server_meta(mut self, server_seq: u64, received_at: u64) -> Self {
        self.server_seq = Some(server_seq);
        self.received_at = Some(received_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientId {
        ClientId::generate()
    }

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn create_carries_payload() {
        let op = Operation::create(
            EntityKind::Task,
            "t1",
            fields(&[("title", "buy milk")]),
            client(),
        );
        assert_eq!(op.kind, OpKind::Create);
        assert!(op.payload.is_some());
        assert!(op.server_seq.is_none());
        assert!(op.received_at.is_none());
    }

    #[test]
    fn delete_has_no_payload() {
        let op = Operation::delete(EntityKind::Task, "t1", client());
        assert_eq!(op.kind, OpKind::Delete);
        assert!(op.payload.is_none());
    }

    #[test]
    fn snapshot_reuses_last_writer_id() {
        let last = OpId::generate();
        let op = Operation::snapshot(EntityKind::Note, "n1", FieldMap::new(), last, client());
        assert_eq!(op.id, last);
        assert_eq!(op.kind, OpKind::Create);
    }

    #[test]
    fn snapshot_delete_reuses_tombstone_id() {
        let last = OpId::generate();
        let op = Operation::snapshot_delete(EntityKind::Note, "n1", last, client());
        assert_eq!(op.id, last);
        assert_eq!(op.kind, OpKind::Delete);
        assert!(op.payload.is_none());
    }

    #[test]
    fn server_meta_stamping() {
        let op = Operation::delete(EntityKind::Tag, "tag1", client());
        let stamped = op.clone().with_server_meta(7, 1_700_000_000_000);
        assert_eq!(stamped.server_seq, Some(7));
        assert_eq!(stamped.received_at, Some(1_700_000_000_000));
        // The original fields are untouched by stamping.
        assert_eq!(stamped.id, op.id);
        assert_eq!(stamped.entity_id, op.entity_id);
    }

    #[test]
    fn ids_order_successive_operations() {
        let a = Operation::create(EntityKind::Task, "t1", FieldMap::new(), client());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Operation::update(EntityKind::Task, "t1", FieldMap::new(), client());
        assert!(a.id < b.id);
    }
}

//! Per-user operation store.

use opsync_model::{ClientId, OpId, UserId};
use opsync_protocol::Operation;
use std::collections::{HashMap, HashSet};

/// Per-user sequencing cursor.
///
/// `last_seq` is the last sequence number allocated for the user; the next
/// accepted operation gets `last_seq + 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserSyncState {
    /// Last allocated sequence number (0 when nothing accepted yet).
    pub last_seq: u64,
}

/// Per-(user, device) activity record.
///
/// Used for observability and pruning decisions only; it never influences
/// sequence allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncDevice {
    /// The device.
    pub client_id: ClientId,
    /// Last time the device pushed or pulled, unix milliseconds.
    pub last_seen_at: u64,
    /// Highest sequence the device has pulled through (0 = never synced).
    pub last_pull_seq: u64,
}

/// One user's retained operation history.
///
/// # Invariants
///
/// - `operations` is ascending by `server_seq` and gapless from
///   `pruned_through + 1` to `state.last_seq`
/// - An operation id is sequenced at most once (`seen_ops`)
#[derive(Debug)]
pub struct UserStore {
    user_id: UserId,
    operations: Vec<Operation>,
    seen_ops: HashSet<OpId>,
    state: UserSyncState,
    pruned_through: u64,
    devices: HashMap<ClientId, SyncDevice>,
}

impl UserStore {
    /// Creates an empty store for a user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            operations: Vec::new(),
            seen_ops: HashSet::new(),
            state: UserSyncState::default(),
            pruned_through: 0,
            devices: HashMap::new(),
        }
    }

    /// The user this store belongs to.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Last allocated sequence number.
    pub fn last_seq(&self) -> u64 {
        self.state.last_seq
    }

    /// Sequence of the earliest retained operation.
    ///
    /// Meaningful only while history exists; when everything has been pruned
    /// this still names the first sequence a pull could serve.
    pub fn earliest_retained_seq(&self) -> u64 {
        self.pruned_through + 1
    }

    /// Number of retained operations.
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Decides whether a client cursor is disconnected from retained history.
    ///
    /// A gap exists when the client claims `since_seq > 0` but the server
    /// cannot serve the continuation `since_seq + 1`:
    /// - the server has no history for this user at all (migration to an
    ///   empty or different server), or
    /// - the claimed cursor is ahead of everything allocated (server reset), or
    /// - pruning discarded operations past the client's cursor
    ///   (`earliest_retained_seq > since_seq + 1`).
    pub fn has_gap(&self, since_seq: u64) -> bool {
        if since_seq == 0 {
            return false;
        }
        self.state.last_seq == 0
            || since_seq > self.state.last_seq
            || self.earliest_retained_seq() > since_seq + 1
    }

    /// Sequences and persists a batch of operations.
    ///
    /// Operations whose id has been seen before are skipped (idempotent
    /// retries); each accepted operation gets `last_seq + 1` and the
    /// ingestion timestamp. Returns the number of newly accepted operations.
    pub fn ingest(&mut self, operations: Vec<Operation>, received_at: u64) -> usize {
        let mut accepted = 0usize;
        for op in operations {
            if !self.seen_ops.insert(op.id) {
                continue;
            }
            self.state.last_seq += 1;
            self.operations
                .push(op.with_server_meta(self.state.last_seq, received_at));
            accepted += 1;
        }
        accepted
    }

    /// Returns retained operations with `server_seq > after_seq`, ascending.
    pub fn operations_after(&self, after_seq: u64, limit: u32) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| op.server_seq.is_some_and(|seq| seq > after_seq))
            .take(limit as usize)
            .cloned()
            .collect()
    }

    /// Whether more operations remain past `after_seq` plus one page.
    pub fn has_more_after(&self, after_seq: u64, limit: u32) -> bool {
        self.operations
            .iter()
            .filter(|op| op.server_seq.is_some_and(|seq| seq > after_seq))
            .count()
            > limit as usize
    }

    /// Records device activity (push or pull).
    pub fn touch_device(&mut self, client_id: ClientId, now_ms: u64) {
        self.devices
            .entry(client_id)
            .and_modify(|d| d.last_seen_at = now_ms)
            .or_insert(SyncDevice {
                client_id,
                last_seen_at: now_ms,
                last_pull_seq: 0,
            });
    }

    /// Records how far a device has pulled.
    pub fn record_pull(&mut self, client_id: ClientId, through_seq: u64, now_ms: u64) {
        self.touch_device(client_id, now_ms);
        if let Some(device) = self.devices.get_mut(&client_id) {
            device.last_pull_seq = device.last_pull_seq.max(through_seq);
        }
    }

    /// Returns the device record, if the device has ever been seen.
    pub fn device(&self, client_id: ClientId) -> Option<&SyncDevice> {
        self.devices.get(&client_id)
    }

    /// Lowest sequence every known device has pulled through.
    ///
    /// `None` when there are no devices or any device has never synced;
    /// pruning past such a device would guarantee gaps for it.
    pub fn min_acknowledged_seq(&self) -> Option<u64> {
        let min = self.devices.values().map(|d| d.last_pull_seq).min()?;
        (min > 0).then_some(min)
    }

    /// Drops retained operations with `server_seq <= through_seq`.
    ///
    /// Raises the pruned watermark; clients whose cursor falls below it will
    /// see a gap on their next push. Pruned operation ids leave the dedup
    /// set, so a full-state snapshot that reuses an entity's pruned
    /// last-writer id is re-sequenced rather than silently dropped.
    pub fn prune_through(&mut self, through_seq: u64) {
        let through = through_seq.min(self.state.last_seq);
        for op in &self.operations {
            if op.server_seq.is_some_and(|seq| seq <= through) {
                self.seen_ops.remove(&op.id);
            }
        }
        self.operations
            .retain(|op| op.server_seq.is_some_and(|seq| seq > through));
        self.pruned_through = self.pruned_through.max(through);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsync_model::EntityKind;

    fn store() -> UserStore {
        UserStore::new(UserId::generate())
    }

    fn op(entity_id: &str) -> Operation {
        Operation::delete(EntityKind::Task, entity_id, ClientId::generate())
    }

    #[test]
    fn ingest_assigns_gapless_sequences() {
        let mut store = store();
        let accepted = store.ingest(vec![op("a"), op("b"), op("c")], 1);

        assert_eq!(accepted, 3);
        assert_eq!(store.last_seq(), 3);

        let seqs: Vec<u64> = store
            .operations_after(0, 10)
            .iter()
            .map(|o| o.server_seq.unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn ingest_deduplicates_by_op_id() {
        let mut store = store();
        let batch = vec![op("a"), op("b")];

        assert_eq!(store.ingest(batch.clone(), 1), 2);
        assert_eq!(store.ingest(batch, 2), 0);

        assert_eq!(store.last_seq(), 2);
        assert_eq!(store.operation_count(), 2);
    }

    #[test]
    fn gap_rules() {
        let mut store = store();

        // Fresh cursor never gaps.
        assert!(!store.has_gap(0));
        // Empty server but a non-zero client cursor: gap.
        assert!(store.has_gap(5));

        store.ingest((0..10).map(|i| op(&format!("e{i}"))).collect(), 1);
        assert!(!store.has_gap(5));
        assert!(!store.has_gap(10));
        // Cursor ahead of everything allocated: gap.
        assert!(store.has_gap(11));

        // Prune through 9: earliest retained is 10, so a client at 5 gaps
        // but a client at 9 can still continue at 10.
        store.prune_through(9);
        assert_eq!(store.earliest_retained_seq(), 10);
        assert!(store.has_gap(5));
        assert!(!store.has_gap(9));
    }

    #[test]
    fn pull_paging() {
        let mut store = store();
        store.ingest((0..5).map(|i| op(&format!("e{i}"))).collect(), 1);

        let page = store.operations_after(0, 2);
        assert_eq!(page.len(), 2);
        assert!(store.has_more_after(0, 2));

        let page = store.operations_after(4, 2);
        assert_eq!(page.len(), 1);
        assert!(!store.has_more_after(4, 2));
    }

    #[test]
    fn device_bookkeeping() {
        let mut store = store();
        let a = ClientId::generate();
        let b = ClientId::generate();

        store.record_pull(a, 4, 100);
        store.touch_device(b, 200);

        assert_eq!(store.device(a).unwrap().last_pull_seq, 4);
        assert_eq!(store.device(b).unwrap().last_seen_at, 200);

        // b has never pulled, so nothing is safely prunable.
        assert_eq!(store.min_acknowledged_seq(), None);

        store.record_pull(b, 2, 300);
        assert_eq!(store.min_acknowledged_seq(), Some(2));
    }

    #[test]
    fn pruned_ids_can_be_resequenced() {
        let mut store = store();
        let a = op("a");
        store.ingest(vec![a.clone(), op("b")], 1);
        store.prune_through(2);

        // A recovery snapshot reusing the pruned op id must be accepted.
        assert_eq!(store.ingest(vec![a], 2), 1);
        assert_eq!(store.last_seq(), 3);
    }

    #[test]
    fn prune_caps_at_last_seq() {
        let mut store = store();
        store.ingest(vec![op("a"), op("b")], 1);

        store.prune_through(50);
        assert_eq!(store.operation_count(), 0);
        assert_eq!(store.earliest_retained_seq(), 3);

        // Sequencing continues monotonically after pruning.
        store.ingest(vec![op("c")], 2);
        assert_eq!(store.last_seq(), 3);
    }
}

//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::error::{ClientError, ClientResult};
use crate::lock::LockService;
use crate::oplog::{LogStore, OperationLog};
use crate::resolver::{ApplyOutcome, ConflictChoice, ConflictResolver, PendingConflict};
use crate::transport::SyncTransport;
use opsync_model::{AppState, EntityRegistry, ModelError};
use opsync_protocol::{Operation, PullRequest, PushRequest, PushResponse};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lock name shared by every operation-log writer and the flush barrier.
///
/// The FIFO barrier in [`LockService::flush_pending_writes`] only covers
/// writes queued under this exact name.
pub const WRITE_LOCK_NAME: &str = "opsync.oplog.write";

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is pulling changes from the server.
    Pulling,
    /// Engine is pushing changes to the server.
    Pushing,
    /// Engine is uploading a full-state snapshot after a gap.
    RecoveringFullState,
    /// Engine has completed a sync cycle.
    Synced,
    /// Engine encountered an error.
    Error,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Pulling | SyncState::Pushing | SyncState::RecoveringFullState
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of operations pulled and applied.
    pub operations_pulled: u64,
    /// Total number of operations pushed.
    pub operations_pushed: u64,
    /// Total number of gap-triggered full-state recoveries.
    pub full_state_recoveries: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Number of operations pulled and applied.
    pub pulled: u64,
    /// Number of operations pushed.
    pub pushed: u64,
    /// Whether this cycle escalated to a full-state upload.
    pub recovered_full_state: bool,
    /// Singleton conflicts surfaced during this cycle, awaiting resolution.
    pub pending_conflicts: Vec<PendingConflict>,
    /// Whether the sync was successful.
    pub success: bool,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

/// The sync engine: local commits, push/pull cycles, and gap recovery.
///
/// Owns the operation log, the in-memory entity state, and the write lock
/// service. Local mutations go through [`commit_local`], which appends to
/// the log *before* updating state; sync cycles go through [`sync`] or the
/// individual [`push`]/[`pull`] phases.
///
/// [`commit_local`]: SyncEngine::commit_local
/// [`sync`]: SyncEngine::sync
/// [`push`]: SyncEngine::push
/// [`pull`]: SyncEngine::pull
pub struct SyncEngine<T: SyncTransport, S: LogStore> {
    config: SyncConfig,
    transport: Arc<T>,
    log: OperationLog<S>,
    state: Mutex<AppState>,
    resolver: ConflictResolver,
    locks: LockService,
    sync_state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    pending_conflicts: Mutex<Vec<PendingConflict>>,
    cancelled: AtomicBool,
}

impl<T: SyncTransport, S: LogStore> SyncEngine<T, S> {
    /// Creates a new sync engine.
    ///
    /// Verifies the default entity registry up front so a kind without merge
    /// behavior fails here rather than mid-sync.
    pub fn new(config: SyncConfig, transport: T, store: S) -> ClientResult<Self> {
        Self::with_registry(config, transport, store, EntityRegistry::with_defaults())
    }

    /// Creates a sync engine over a custom registry.
    pub fn with_registry(
        config: SyncConfig,
        transport: T,
        store: S,
        registry: EntityRegistry,
    ) -> ClientResult<Self> {
        registry.verify_complete()?;
        let locks = match &config.lock_dir {
            Some(dir) => LockService::with_lock_dir(dir)?,
            None => LockService::new(),
        };
        Ok(Self {
            config,
            transport: Arc::new(transport),
            log: OperationLog::open(store)?,
            state: Mutex::new(AppState::new()),
            resolver: ConflictResolver::new(registry),
            locks,
            sync_state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            pending_conflicts: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.sync_state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Number of operations waiting to be pushed.
    pub fn pending_count(&self) -> usize {
        self.log.pending_count()
    }

    /// Singleton conflicts awaiting a decision, drained.
    pub fn take_pending_conflicts(&self) -> Vec<PendingConflict> {
        std::mem::take(&mut *self.pending_conflicts.lock())
    }

    /// Reads entity state under the state lock.
    pub fn read_state<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Cancels any ongoing sync operation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> ClientResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.sync_state.write() = state;
    }

    /// Commits a local mutation: durable log append, then state apply.
    ///
    /// Runs under the shared write lock so concurrent writers are serialized
    /// and the flush barrier sees them. If the append fails nothing is
    /// applied; the caller gets the storage error.
    pub fn commit_local(&self, op: Operation) -> ClientResult<()> {
        self.locks.request(WRITE_LOCK_NAME, || {
            self.log.append(&op)?;
            let mut state = self.state.lock();
            self.resolver.apply(&mut state, &op, false)?;
            Ok(())
        })?
    }

    /// Performs a full sync cycle: pull, then push.
    pub fn sync(&self) -> ClientResult<SyncCycleResult> {
        let start = Instant::now();
        self.reset_cancel();

        if !self.state().can_start_sync() {
            return Err(ClientError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "sync".into(),
            });
        }

        let mut result = SyncCycleResult {
            pulled: 0,
            pushed: 0,
            recovered_full_state: false,
            pending_conflicts: Vec::new(),
            success: false,
            duration: Duration::ZERO,
        };

        self.set_state(SyncState::Pulling);
        match self.pull() {
            Ok(pulled) => result.pulled = pulled,
            Err(e) => {
                self.handle_error(&e);
                result.duration = start.elapsed();
                return Err(e);
            }
        }

        if let Err(e) = self.check_cancelled() {
            self.handle_error(&e);
            result.duration = start.elapsed();
            return Err(e);
        }

        self.set_state(SyncState::Pushing);
        match self.push() {
            Ok(push_result) => {
                result.pushed = push_result.pushed;
                result.recovered_full_state = push_result.recovered_full_state;
            }
            Err(e) => {
                self.handle_error(&e);
                result.duration = start.elapsed();
                return Err(e);
            }
        }

        result.pending_conflicts = self.pending_conflicts.lock().clone();
        result.success = true;
        result.duration = start.elapsed();
        self.set_state(SyncState::Synced);

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.operations_pulled += result.pulled;
            stats.operations_pushed += result.pushed;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }

        Ok(result)
    }

    /// Performs a sync with retry on transient errors.
    pub fn sync_with_retry(&self) -> ClientResult<SyncCycleResult> {
        let retry_config = self.config.retry.clone();
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry_config.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            self.check_cancelled()?;

            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry_config.max_attempts {
                        debug!(attempt, error = %e, "sync attempt failed, will retry");
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::Protocol("no sync attempts made".into())))
    }

    /// Pushes all pending operations.
    ///
    /// Starts with the FIFO flush barrier, so every write dispatched before
    /// this call is durable and enqueued before the first batch is read. A
    /// gap response escalates to [`recover_full_state`] instead of failing.
    ///
    /// [`recover_full_state`]: SyncEngine::recover_full_state
    pub fn push(&self) -> ClientResult<PushPhaseResult> {
        self.locks.flush_pending_writes(WRITE_LOCK_NAME)?;

        let mut result = PushPhaseResult {
            pushed: 0,
            recovered_full_state: false,
        };

        loop {
            self.check_cancelled()?;

            let batch = self.log.pending_batch(self.config.push_batch_size as usize);
            if batch.is_empty() {
                break;
            }

            let request = PushRequest::new(
                self.config.client_id,
                self.log.last_server_seq(),
                batch.clone(),
            );

            match self.transport.push(&request)? {
                PushResponse::Accepted { server_seq } => {
                    debug!(count = batch.len(), server_seq, "push batch accepted");
                    let ids: Vec<_> = batch.iter().map(|op| op.id).collect();
                    self.log.acknowledge(&ids);
                    self.log.prune_acknowledged()?;
                    result.pushed += batch.len() as u64;
                }
                PushResponse::Gap => {
                    warn!(
                        since_seq = self.log.last_server_seq(),
                        "server reported history gap, escalating to full-state upload"
                    );
                    self.recover_full_state()?;
                    result.recovered_full_state = true;
                    break;
                }
            }
        }

        Ok(result)
    }

    /// Uploads the device's full state as synthetic operations.
    ///
    /// The snapshot and the queue of operations it supersedes are captured
    /// together under the write lock, so a commit racing this recovery
    /// either lands in both or stays pending for the next incremental push
    /// — never in the superseded set alone. Live entities upload as
    /// creates, tombstones as deletes; both reuse their last-writer id so a
    /// retried recovery deduplicates on the server like any other push. On
    /// success the pull cursor rewinds to zero; the next pull re-walks the
    /// server log and applied-id dedup skips everything already known.
    pub fn recover_full_state(&self) -> ClientResult<()> {
        self.set_state(SyncState::RecoveringFullState);

        let (superseded, snapshot) = self.locks.request(WRITE_LOCK_NAME, || {
            let superseded = self.log.pending_ids();
            let state = self.state.lock();
            let mut snapshot: Vec<Operation> = state
                .live_entities()
                .map(|(kind, id, record)| {
                    Operation::snapshot(
                        kind,
                        id,
                        record.payload.clone(),
                        record.last_op_id,
                        self.config.client_id,
                    )
                })
                .collect();
            snapshot.extend(state.tombstoned_entities().map(|(kind, id, record)| {
                Operation::snapshot_delete(kind, id, record.last_op_id, self.config.client_id)
            }));
            (superseded, snapshot)
        })?;

        let request = PushRequest::new(self.config.client_id, 0, snapshot);
        match self.transport.push_full(&request)? {
            PushResponse::Accepted { server_seq } => {
                info!(
                    entities = request.operations.len(),
                    server_seq, "full-state recovery complete"
                );
                // Only the captured queue is superseded by the snapshot;
                // anything committed since stays pending.
                self.log.acknowledge(&superseded);
                self.log.prune_acknowledged()?;
                self.log.set_last_server_seq(0);
                self.stats.write().full_state_recoveries += 1;
                Ok(())
            }
            PushResponse::Gap => Err(ClientError::Protocol(
                "server rejected full-state upload".into(),
            )),
        }
    }

    /// Pulls and applies all operations after the local cursor.
    ///
    /// Returns the number of operations that changed local state. Singleton
    /// conflicts are parked in the pending list and do not advance past the
    /// resolver; everything else applies under the registry's merge rules.
    pub fn pull(&self) -> ClientResult<u64> {
        let mut applied = 0u64;

        loop {
            self.check_cancelled()?;

            let request =
                PullRequest::new(self.log.last_server_seq(), self.config.pull_batch_size);
            let response = self.transport.pull(&request)?;

            // A non-contiguous first sequence means the continuation of our
            // cursor was pruned; escalate before silently skipping history.
            if request.after_seq > 0 {
                let first_seq = response.operations.first().and_then(|op| op.server_seq);
                if first_seq.is_some_and(|seq| seq > request.after_seq + 1) {
                    warn!(
                        after_seq = request.after_seq,
                        first_served = first_seq,
                        "pull discontinuity, escalating to full-state upload"
                    );
                    self.recover_full_state()?;
                    continue;
                }
            }

            {
                let mut state = self.state.lock();
                for op in &response.operations {
                    let local_pending = self.log.has_pending_for(op.entity_kind, &op.entity_id);
                    match self.resolver.apply(&mut state, op, local_pending) {
                        Ok(ApplyOutcome::Applied) => applied += 1,
                        Ok(ApplyOutcome::Duplicate | ApplyOutcome::Stale) => {}
                        Ok(ApplyOutcome::ManualRequired(conflict)) => {
                            warn!(
                                entity_kind = %conflict.entity_kind,
                                entity_id = %conflict.entity_id,
                                "singleton conflict requires manual resolution"
                            );
                            let mut pending = self.pending_conflicts.lock();
                            if !pending.contains(&conflict) {
                                pending.push(conflict);
                            }
                        }
                        // A peer leaking a reserved kind must not wedge the
                        // pull loop.
                        Err(ClientError::Model(ModelError::ReservedKind(kind))) => {
                            warn!(%kind, "skipping reserved-kind operation from server");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            if let Some(last) = response.last_seq() {
                self.log.set_last_server_seq(last);
            }
            if !response.has_more || response.operations.is_empty() {
                break;
            }
        }

        Ok(applied)
    }

    /// Resolves a parked singleton conflict.
    ///
    /// `KeepLocal` re-asserts the local value as a fresh operation, which is
    /// newer than the remote one and therefore wins last-writer-wins on every
    /// device. `AcceptRemote` applies the remote operation and discards the
    /// local pending changes for that entity.
    pub fn resolve_conflict(
        &self,
        conflict: PendingConflict,
        choice: ConflictChoice,
    ) -> ClientResult<()> {
        match choice {
            ConflictChoice::KeepLocal => {
                self.state.lock().mark_applied(conflict.remote.id);
                let op = match conflict.local {
                    Some(payload) => Operation::update(
                        conflict.entity_kind,
                        conflict.entity_id,
                        payload,
                        self.config.client_id,
                    ),
                    None => Operation::delete(
                        conflict.entity_kind,
                        conflict.entity_id,
                        self.config.client_id,
                    ),
                };
                self.commit_local(op)
            }
            ConflictChoice::AcceptRemote => {
                self.log
                    .discard_pending_for(conflict.entity_kind, &conflict.entity_id);
                let mut state = self.state.lock();
                self.resolver.apply(&mut state, &conflict.remote, false)?;
                Ok(())
            }
        }
    }

    fn handle_error(&self, error: &ClientError) {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }
}

/// Outcome of the push phase.
#[derive(Debug, Clone, Copy)]
pub struct PushPhaseResult {
    /// Number of operations pushed.
    pub pushed: u64,
    /// Whether a gap escalated to a full-state upload.
    pub recovered_full_state: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::MemoryLogStore;
    use crate::transport::MockTransport;
    use opsync_model::{ClientId, EntityKind, FieldMap};
    use opsync_protocol::{OpKind, PullResponse};

    fn engine(transport: MockTransport) -> SyncEngine<MockTransport, MemoryLogStore> {
        let config = SyncConfig::new(ClientId::generate(), "https://test.example.com");
        SyncEngine::new(config, transport, MemoryLogStore::new()).unwrap()
    }

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Synced.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::Pulling.can_start_sync());
        assert!(!SyncState::RecoveringFullState.can_start_sync());

        assert!(SyncState::Pulling.is_active());
        assert!(SyncState::RecoveringFullState.is_active());
        assert!(!SyncState::Idle.is_active());
    }

    #[test]
    fn initial_state() {
        let engine = engine(MockTransport::new());
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().cycles_completed, 0);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn commit_updates_state_and_queues_push() {
        let engine = engine(MockTransport::new());
        let op = Operation::create(
            EntityKind::Task,
            "t1",
            fields(&[("title", "local")]),
            ClientId::generate(),
        );

        engine.commit_local(op).unwrap();

        assert_eq!(engine.pending_count(), 1);
        engine.read_state(|state| {
            assert_eq!(
                state.payload(EntityKind::Task, "t1").unwrap()["title"],
                "local"
            );
        });
    }

    #[test]
    fn failed_commit_applies_nothing() {
        let transport = MockTransport::new();
        let config = SyncConfig::new(ClientId::generate(), "https://test.example.com");
        let store = MemoryLogStore::new();
        store.fail_appends(true);
        let engine = SyncEngine::new(config, transport, store).unwrap();

        let op = Operation::create(
            EntityKind::Task,
            "t1",
            fields(&[("title", "lost")]),
            ClientId::generate(),
        );
        assert!(matches!(
            engine.commit_local(op),
            Err(ClientError::Storage(_))
        ));
        assert_eq!(engine.pending_count(), 0);
        engine.read_state(|state| assert!(state.payload(EntityKind::Task, "t1").is_none()));
    }

    #[test]
    fn push_acknowledges_accepted_batches() {
        let transport = MockTransport::new();
        transport.enqueue_push_response(PushResponse::Accepted { server_seq: 1 });
        let engine = engine(transport);

        let op = Operation::delete(EntityKind::Note, "n1", ClientId::generate());
        engine.commit_local(op).unwrap();

        let result = engine.push().unwrap();
        assert_eq!(result.pushed, 1);
        assert!(!result.recovered_full_state);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn gap_escalates_to_full_state_upload() {
        let transport = MockTransport::new();
        transport.enqueue_push_response(PushResponse::Gap);
        transport.enqueue_full_push_response(PushResponse::Accepted { server_seq: 5 });
        let engine = engine(transport);

        let op = Operation::create(
            EntityKind::Task,
            "t1",
            fields(&[("title", "kept")]),
            ClientId::generate(),
        );
        engine.commit_local(op).unwrap();
        engine.log.set_last_server_seq(3);

        let result = engine.push().unwrap();
        assert!(result.recovered_full_state);
        assert_eq!(engine.pending_count(), 0);
        // Cursor rewinds so the next pull re-walks the rebuilt server log.
        assert_eq!(engine.log.last_server_seq(), 0);
    }

    #[test]
    fn recovery_uploads_tombstones_for_pending_deletes() {
        let transport = MockTransport::new();
        transport.enqueue_push_response(PushResponse::Accepted { server_seq: 1 });
        transport.enqueue_push_response(PushResponse::Gap);
        transport.enqueue_full_push_response(PushResponse::Accepted { server_seq: 2 });
        let engine = engine(transport);
        let client = engine.config.client_id;

        engine
            .commit_local(Operation::create(
                EntityKind::Task,
                "t1",
                fields(&[("title", "doomed")]),
                client,
            ))
            .unwrap();
        engine.push().unwrap();

        let delete = Operation::delete(EntityKind::Task, "t1", client);
        engine.commit_local(delete.clone()).unwrap();
        engine.log.set_last_server_seq(1);

        let result = engine.push().unwrap();
        assert!(result.recovered_full_state);
        assert_eq!(engine.pending_count(), 0);

        // The recovery batch carries the tombstone under the delete's own
        // id, so the delete still reaches every peer.
        let uploads = engine.transport.full_push_requests();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].operations.iter().any(|op| {
            op.kind == OpKind::Delete && op.entity_id == "t1" && op.id == delete.id
        }));
    }

    #[test]
    fn pull_applies_and_advances_cursor() {
        let transport = MockTransport::new();
        let remote_client = ClientId::generate();
        let op = Operation::create(
            EntityKind::Note,
            "n1",
            fields(&[("body", "remote")]),
            remote_client,
        )
        .with_server_meta(7, 1);
        transport.enqueue_pull_response(PullResponse::new(vec![op], false));
        let engine = engine(transport);

        let applied = engine.pull().unwrap();
        assert_eq!(applied, 1);
        assert_eq!(engine.log.last_server_seq(), 7);
        engine.read_state(|state| {
            assert_eq!(
                state.payload(EntityKind::Note, "n1").unwrap()["body"],
                "remote"
            );
        });
    }

    #[test]
    fn pull_skips_own_operations() {
        let transport = MockTransport::new();
        let engine = engine(transport);

        let op = Operation::create(
            EntityKind::Task,
            "t1",
            fields(&[("title", "mine")]),
            engine.config.client_id,
        );
        engine.commit_local(op.clone()).unwrap();

        engine
            .transport
            .enqueue_pull_response(PullResponse::new(
                vec![op.with_server_meta(1, 1)],
                false,
            ));

        // Own op echoed back by the server is a duplicate, not a change.
        let applied = engine.pull().unwrap();
        assert_eq!(applied, 0);
        assert_eq!(engine.log.last_server_seq(), 1);
    }

    #[test]
    fn sync_cycle_updates_stats() {
        let transport = MockTransport::new();
        transport.enqueue_pull_response(PullResponse::new(vec![], false));
        transport.enqueue_push_response(PushResponse::Accepted { server_seq: 1 });
        let engine = engine(transport);

        engine
            .commit_local(Operation::delete(
                EntityKind::Tag,
                "g1",
                ClientId::generate(),
            ))
            .unwrap();

        let result = engine.sync().unwrap();
        assert!(result.success);
        assert_eq!(result.pushed, 1);
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(engine.stats().cycles_completed, 1);
        assert_eq!(engine.stats().operations_pushed, 1);
    }

    #[test]
    fn sync_error_sets_error_state() {
        let transport = MockTransport::new();
        transport.set_connected(false);
        let engine = engine(transport);

        assert!(engine.sync().is_err());
        assert_eq!(engine.state(), SyncState::Error);
        assert!(engine.stats().last_error.is_some());
    }

    #[test]
    fn sync_with_retry_recovers_from_transient_failure() {
        let transport = MockTransport::new();
        transport.enqueue_pull_response(PullResponse::new(vec![], false));
        let config = SyncConfig::new(ClientId::generate(), "https://test.example.com").with_retry(
            crate::config::RetryConfig::new(5).with_initial_delay(Duration::from_millis(30)),
        );
        let engine = SyncEngine::new(config, transport, MemoryLogStore::new()).unwrap();

        engine.transport.set_connected(false);
        let flipper = {
            let transport = Arc::clone(&engine.transport);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                transport.set_connected(true);
            })
        };

        let result = engine.sync_with_retry().unwrap();
        assert!(result.success);
        assert!(engine.stats().retries >= 1);
        flipper.join().unwrap();
    }

    #[test]
    fn singleton_conflict_parks_and_keep_local_reasserts() {
        let transport = MockTransport::new();
        let engine = engine(transport);

        engine
            .commit_local(Operation::create(
                EntityKind::GlobalConfig,
                "cfg",
                fields(&[("theme", "dark")]),
                engine.config.client_id,
            ))
            .unwrap();

        std::thread::sleep(Duration::from_millis(2));
        let remote = Operation::update(
            EntityKind::GlobalConfig,
            "cfg",
            fields(&[("theme", "light")]),
            ClientId::generate(),
        )
        .with_server_meta(1, 1);
        engine
            .transport
            .enqueue_pull_response(PullResponse::new(vec![remote.clone()], false));

        engine.pull().unwrap();
        let conflicts = engine.take_pending_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].remote.id, remote.id);

        engine
            .resolve_conflict(conflicts[0].clone(), ConflictChoice::KeepLocal)
            .unwrap();

        // Local value stands and a fresh op is queued to overwrite remote.
        engine.read_state(|state| {
            assert_eq!(
                state.payload(EntityKind::GlobalConfig, "cfg").unwrap()["theme"],
                "dark"
            );
            assert!(state.is_applied(remote.id));
        });
        assert!(engine.pending_count() >= 1);
    }

    #[test]
    fn singleton_conflict_accept_remote_discards_local() {
        let transport = MockTransport::new();
        let engine = engine(transport);

        engine
            .commit_local(Operation::create(
                EntityKind::GlobalConfig,
                "cfg",
                fields(&[("theme", "dark")]),
                engine.config.client_id,
            ))
            .unwrap();
        let pending_before = engine.pending_count();

        std::thread::sleep(Duration::from_millis(2));
        let remote = Operation::update(
            EntityKind::GlobalConfig,
            "cfg",
            fields(&[("theme", "light")]),
            ClientId::generate(),
        )
        .with_server_meta(1, 1);
        engine
            .transport
            .enqueue_pull_response(PullResponse::new(vec![remote], false));

        engine.pull().unwrap();
        let conflicts = engine.take_pending_conflicts();
        engine
            .resolve_conflict(conflicts[0].clone(), ConflictChoice::AcceptRemote)
            .unwrap();

        engine.read_state(|state| {
            assert_eq!(
                state.payload(EntityKind::GlobalConfig, "cfg").unwrap()["theme"],
                "light"
            );
        });
        assert!(engine.pending_count() < pending_before);
    }

    #[test]
    fn cancelled_sync_stops() {
        let transport = MockTransport::new();
        transport.enqueue_pull_response(PullResponse::new(vec![], false));
        let engine = engine(transport);

        engine.cancel();
        // sync() resets the flag; cancellation targets an in-flight cycle.
        assert!(engine.sync().is_ok());

        engine.cancel();
        assert!(matches!(engine.pull(), Err(ClientError::Cancelled)));
    }
}

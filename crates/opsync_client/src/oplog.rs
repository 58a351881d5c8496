//! Client-side append-only operation log.

use crate::error::{ClientError, ClientResult};
use opsync_model::{EntityKind, OpId};
use opsync_protocol::Operation;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Durable record storage for the operation log.
///
/// Stores are opaque byte-record stores; the log owns the CBOR encoding.
///
/// # Invariants
///
/// - `append_record` returns only after the record is durable
/// - `load` returns records in append order
/// - `rewrite` atomically replaces the full record set (used by pruning)
pub trait LogStore: Send + Sync {
    /// Appends one record durably.
    fn append_record(&self, bytes: &[u8]) -> ClientResult<()>;

    /// Loads all records in append order.
    fn load(&self) -> ClientResult<Vec<Vec<u8>>>;

    /// Replaces the entire record set.
    fn rewrite(&self, records: &[Vec<u8>]) -> ClientResult<()>;
}

impl<S: LogStore> LogStore for Arc<S> {
    fn append_record(&self, bytes: &[u8]) -> ClientResult<()> {
        S::append_record(self, bytes)
    }

    fn load(&self) -> ClientResult<Vec<Vec<u8>>> {
        S::load(self)
    }

    fn rewrite(&self, records: &[Vec<u8>]) -> ClientResult<()> {
        S::rewrite(self, records)
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryLogStore {
    records: Mutex<Vec<Vec<u8>>>,
    fail_appends: std::sync::atomic::AtomicBool,
}

impl MemoryLogStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent appends fail, simulating local storage loss.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

impl LogStore for MemoryLogStore {
    fn append_record(&self, bytes: &[u8]) -> ClientResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(ClientError::Storage("simulated append failure".into()));
        }
        self.records.lock().push(bytes.to_vec());
        Ok(())
    }

    fn load(&self) -> ClientResult<Vec<Vec<u8>>> {
        Ok(self.records.lock().clone())
    }

    fn rewrite(&self, records: &[Vec<u8>]) -> ClientResult<()> {
        *self.records.lock() = records.to_vec();
        Ok(())
    }
}

/// File-backed store: length-prefixed records in one append-only file.
///
/// Each append is flushed and `sync_all`ed before returning, so a completed
/// `append_record` survives process termination. Rewrites go through a temp
/// file and rename.
pub struct FileLogStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLogStore {
    /// Opens or creates the log file at `path`.
    pub fn open(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| ClientError::Storage(format!("cannot open oplog {path:?}: {e}")))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl LogStore for FileLogStore {
    fn append_record(&self, bytes: &[u8]) -> ClientResult<()> {
        let mut file = self.file.lock();
        let len = u32::try_from(bytes.len())
            .map_err(|_| ClientError::Storage("oplog record too large".into()))?;
        file.write_all(&len.to_le_bytes())
            .and_then(|()| file.write_all(bytes))
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_all())
            .map_err(|e| ClientError::Storage(format!("oplog append failed: {e}")))
    }

    fn load(&self) -> ClientResult<Vec<Vec<u8>>> {
        let mut buf = Vec::new();
        let mut file = File::open(&self.path)
            .map_err(|e| ClientError::Storage(format!("cannot read oplog: {e}")))?;
        file.read_to_end(&mut buf)
            .map_err(|e| ClientError::Storage(format!("cannot read oplog: {e}")))?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos + 4 <= buf.len() {
            let len = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
                as usize;
            pos += 4;
            if pos + len > buf.len() {
                // Torn tail from a crash mid-append; everything before it is
                // intact.
                break;
            }
            records.push(buf[pos..pos + len].to_vec());
            pos += len;
        }
        Ok(records)
    }

    fn rewrite(&self, records: &[Vec<u8>]) -> ClientResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path)
            .map_err(|e| ClientError::Storage(format!("cannot create temp oplog: {e}")))?;
        for record in records {
            let len = u32::try_from(record.len())
                .map_err(|_| ClientError::Storage("oplog record too large".into()))?;
            tmp.write_all(&len.to_le_bytes())
                .and_then(|()| tmp.write_all(record))
                .map_err(|e| ClientError::Storage(format!("oplog rewrite failed: {e}")))?;
        }
        tmp.sync_all()
            .map_err(|e| ClientError::Storage(format!("oplog rewrite sync failed: {e}")))?;

        let mut file = self.file.lock();
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| ClientError::Storage(format!("oplog rewrite rename failed: {e}")))?;
        *file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ClientError::Storage(format!("cannot reopen oplog: {e}")))?;
        Ok(())
    }
}

struct LogEntry {
    op: Operation,
    acknowledged: bool,
}

/// The client's append-only record of entity mutations.
///
/// Entries stay in commit order. Acknowledged entries are pruned only after
/// the server has confirmed receipt — never before — by rewriting the
/// backing store with the still-pending remainder.
pub struct OperationLog<S: LogStore> {
    store: S,
    entries: Mutex<VecDeque<LogEntry>>,
    last_server_seq: AtomicU64,
}

impl<S: LogStore> OperationLog<S> {
    /// Opens the log, loading any persisted pending operations.
    pub fn open(store: S) -> ClientResult<Self> {
        let mut entries = VecDeque::new();
        for record in store.load()? {
            let op: Operation = ciborium::de::from_reader(record.as_slice())
                .map_err(|e| ClientError::Storage(format!("corrupt oplog record: {e}")))?;
            entries.push_back(LogEntry {
                op,
                acknowledged: false,
            });
        }
        Ok(Self {
            store,
            entries: Mutex::new(entries),
            last_server_seq: AtomicU64::new(0),
        })
    }

    /// Durably appends one operation.
    ///
    /// The record is on stable storage before this returns; a write that
    /// cannot persist fails the whole append and nothing is queued.
    ///
    /// The entries lock is held across the store write so a concurrent
    /// [`prune_acknowledged`] rewrite cannot rename the backing store out
    /// from under a record that just reached disk.
    ///
    /// [`prune_acknowledged`]: OperationLog::prune_acknowledged
    pub fn append(&self, op: &Operation) -> ClientResult<()> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(op, &mut bytes)
            .map_err(|e| ClientError::Storage(format!("cannot encode operation: {e}")))?;
        let mut entries = self.entries.lock();
        self.store.append_record(&bytes)?;
        entries.push_back(LogEntry {
            op: op.clone(),
            acknowledged: false,
        });
        Ok(())
    }

    /// Pending (unacknowledged) operations, up to `limit`, in commit order.
    pub fn pending_batch(&self, limit: usize) -> Vec<Operation> {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.acknowledged)
            .take(limit)
            .map(|e| e.op.clone())
            .collect()
    }

    /// Ids of all pending operations, in commit order.
    pub fn pending_ids(&self) -> Vec<OpId> {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.acknowledged)
            .map(|e| e.op.id)
            .collect()
    }

    /// Number of pending operations.
    pub fn pending_count(&self) -> usize {
        self.entries.lock().iter().filter(|e| !e.acknowledged).count()
    }

    /// True if a pending operation touches the given entity.
    pub fn has_pending_for(&self, kind: EntityKind, entity_id: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| !e.acknowledged && e.op.entity_kind == kind && e.op.entity_id == entity_id)
    }

    /// Marks the given operations as acknowledged by the server.
    pub fn acknowledge(&self, op_ids: &[OpId]) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if op_ids.contains(&entry.op.id) {
                entry.acknowledged = true;
            }
        }
    }

    /// Drops pending operations for one entity without pushing them.
    ///
    /// Used when a manual conflict resolution accepts the remote version.
    pub fn discard_pending_for(&self, kind: EntityKind, entity_id: &str) {
        for entry in self.entries.lock().iter_mut() {
            if !entry.acknowledged && entry.op.entity_kind == kind && entry.op.entity_id == entity_id
            {
                entry.acknowledged = true;
            }
        }
    }

    /// Drops acknowledged entries and rewrites the backing store with the
    /// pending remainder.
    ///
    /// Holds the entries lock for the whole rewrite, excluding appenders,
    /// so the store always matches the in-memory entry set.
    pub fn prune_acknowledged(&self) -> ClientResult<()> {
        let mut entries = self.entries.lock();
        entries.retain(|e| !e.acknowledged);

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            let mut bytes = Vec::new();
            ciborium::ser::into_writer(&entry.op, &mut bytes)
                .map_err(|e| ClientError::Storage(format!("cannot encode operation: {e}")))?;
            records.push(bytes);
        }
        self.store.rewrite(&records)
    }

    /// Last server sequence this device has fully applied.
    pub fn last_server_seq(&self) -> u64 {
        self.last_server_seq.load(Ordering::SeqCst)
    }

    /// Updates the server cursor.
    pub fn set_last_server_seq(&self, seq: u64) {
        self.last_server_seq.store(seq, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsync_model::ClientId;

    fn make_op(entity_id: &str) -> Operation {
        Operation::delete(EntityKind::Task, entity_id, ClientId::generate())
    }

    #[test]
    fn append_preserves_order() {
        let log = OperationLog::open(MemoryLogStore::new()).unwrap();
        let ops = [make_op("a"), make_op("b"), make_op("c")];
        for op in &ops {
            log.append(op).unwrap();
        }

        let pending = log.pending_batch(10);
        let ids: Vec<_> = pending.iter().map(|o| o.id).collect();
        assert_eq!(ids, ops.iter().map(|o| o.id).collect::<Vec<_>>());
    }

    #[test]
    fn failed_append_is_fatal_and_queues_nothing() {
        let store = MemoryLogStore::new();
        store.fail_appends(true);
        let log = OperationLog::open(MemoryLogStore::new()).unwrap();

        // Rebuild the log over the failing store.
        let log_with_failing = OperationLog {
            store,
            entries: Mutex::new(VecDeque::new()),
            last_server_seq: AtomicU64::new(0),
        };

        let result = log_with_failing.append(&make_op("a"));
        assert!(matches!(result, Err(ClientError::Storage(_))));
        assert_eq!(log_with_failing.pending_count(), 0);
        assert_eq!(log.pending_count(), 0);
    }

    #[test]
    fn acknowledge_and_prune() {
        let log = OperationLog::open(MemoryLogStore::new()).unwrap();
        let a = make_op("a");
        let b = make_op("b");
        log.append(&a).unwrap();
        log.append(&b).unwrap();

        log.acknowledge(&[a.id]);
        assert_eq!(log.pending_count(), 1);

        log.prune_acknowledged().unwrap();
        assert_eq!(log.pending_count(), 1);
        assert_eq!(log.pending_batch(10)[0].id, b.id);
    }

    #[test]
    fn pending_lookup_by_entity() {
        let log = OperationLog::open(MemoryLogStore::new()).unwrap();
        let op = make_op("a");
        log.append(&op).unwrap();

        assert!(log.has_pending_for(EntityKind::Task, "a"));
        assert!(!log.has_pending_for(EntityKind::Task, "b"));
        assert!(!log.has_pending_for(EntityKind::Note, "a"));

        log.acknowledge(&[op.id]);
        assert!(!log.has_pending_for(EntityKind::Task, "a"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog.bin");

        let a = make_op("a");
        let b = make_op("b");
        {
            let log = OperationLog::open(FileLogStore::open(&path).unwrap()).unwrap();
            log.append(&a).unwrap();
            log.append(&b).unwrap();
        }

        let log = OperationLog::open(FileLogStore::open(&path).unwrap()).unwrap();
        let pending = log.pending_batch(10);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, a.id);
        assert_eq!(pending[1].id, b.id);
    }

    #[test]
    fn file_store_prune_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog.bin");

        let a = make_op("a");
        let b = make_op("b");
        {
            let log = OperationLog::open(FileLogStore::open(&path).unwrap()).unwrap();
            log.append(&a).unwrap();
            log.append(&b).unwrap();
            log.acknowledge(&[a.id]);
            log.prune_acknowledged().unwrap();
        }

        let log = OperationLog::open(FileLogStore::open(&path).unwrap()).unwrap();
        let pending = log.pending_batch(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
    }

    #[test]
    fn file_store_ignores_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog.bin");

        let a = make_op("a");
        {
            let log = OperationLog::open(FileLogStore::open(&path).unwrap()).unwrap();
            log.append(&a).unwrap();
        }
        // Simulate a crash mid-append: a length prefix with no body.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&999u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let log = OperationLog::open(FileLogStore::open(&path).unwrap()).unwrap();
        let pending = log.pending_batch(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);
    }

    #[test]
    fn concurrent_appends_survive_pruning() {
        let store = Arc::new(MemoryLogStore::new());
        let log = Arc::new(OperationLog::open(Arc::clone(&store)).unwrap());

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        log.append(&make_op(&format!("w{t}-{i}"))).unwrap();
                    }
                })
            })
            .collect();

        // Prune repeatedly while the writers are appending.
        for _ in 0..50 {
            let batch = log.pending_batch(5);
            let ids: Vec<_> = batch.iter().map(|o| o.id).collect();
            log.acknowledge(&ids);
            log.prune_acknowledged().unwrap();
        }
        for handle in writers {
            handle.join().unwrap();
        }
        log.prune_acknowledged().unwrap();

        // The store holds exactly the pending remainder: no durably
        // appended record was clobbered by a concurrent rewrite.
        let reopened = OperationLog::open(Arc::clone(&store)).unwrap();
        let on_store: Vec<_> = reopened
            .pending_batch(usize::MAX)
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(on_store, log.pending_ids());
    }

    #[test]
    fn server_cursor() {
        let log = OperationLog::open(MemoryLogStore::new()).unwrap();
        assert_eq!(log.last_server_seq(), 0);
        log.set_last_server_seq(42);
        assert_eq!(log.last_server_seq(), 42);
    }
}

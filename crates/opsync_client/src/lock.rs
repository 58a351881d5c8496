//! Named FIFO lock service and flush barrier.
//!
//! All operation-log writers run under [`LockService::request`] with the same
//! lock name. Because admission is strict FIFO, a no-op request on that name
//! ([`LockService::flush_pending_writes`]) cannot return before every write
//! queued ahead of it has completed; the sync pusher uses this as its
//! "everything dispatched so far is durable" barrier.
//!
//! Hazard: the barrier only works when writers and the barrier use the
//! *identical* lock name. A different name silently defeats the guarantee,
//! which is why the write path pins [`crate::engine::WRITE_LOCK_NAME`].

use crate::error::{ClientError, ClientResult};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

/// One named lock: a ticket queue served strictly in order.
struct NamedLock {
    tickets: Mutex<Tickets>,
    cond: Condvar,
}

struct Tickets {
    next: u64,
    serving: u64,
}

impl NamedLock {
    fn new() -> Self {
        Self {
            tickets: Mutex::new(Tickets {
                next: 0,
                serving: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            self.cond.wait(&mut tickets);
        }
    }

    fn release(&self) {
        let mut tickets = self.tickets.lock();
        tickets.serving += 1;
        drop(tickets);
        self.cond.notify_all();
    }
}

/// Fair, named mutual exclusion across all holders in the process, and —
/// when a lock directory is configured — across processes of the same
/// logical client via fs2 advisory file locks.
///
/// Without a lock directory the service degrades to a single-process
/// guarantee; multi-window deployments must configure one.
pub struct LockService {
    locks: Mutex<HashMap<String, Arc<NamedLock>>>,
    lock_dir: Option<PathBuf>,
}

impl LockService {
    /// Creates an in-process lock service.
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            lock_dir: None,
        }
    }

    /// Creates a lock service that also takes an advisory file lock per name.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Lock`] if the directory cannot be created;
    /// running without the cross-process guarantee risks silent data loss, so
    /// the failure propagates instead of degrading quietly.
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> ClientResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| ClientError::Lock(format!("cannot create lock dir: {e}")))?;
        Ok(Self {
            locks: Mutex::new(HashMap::new()),
            lock_dir: Some(dir),
        })
    }

    fn named(&self, name: &str) -> Arc<NamedLock> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(NamedLock::new())),
        )
    }

    fn file_lock(&self, name: &str) -> ClientResult<Option<File>> {
        let Some(dir) = &self.lock_dir else {
            return Ok(None);
        };
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let path = dir.join(format!("{sanitized}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| ClientError::Lock(format!("cannot open lock file {path:?}: {e}")))?;
        file.lock_exclusive()
            .map_err(|e| ClientError::Lock(format!("cannot lock {path:?}: {e}")))?;
        Ok(Some(file))
    }

    /// Runs `f` while holding the named lock.
    ///
    /// Requests on one name are admitted in the exact order they arrive
    /// (FIFO), so completion order equals request order.
    pub fn request<R>(&self, name: &str, f: impl FnOnce() -> R) -> ClientResult<R> {
        let lock = self.named(name);
        lock.acquire();

        let file = match self.file_lock(name) {
            Ok(file) => file,
            Err(e) => {
                lock.release();
                return Err(e);
            }
        };

        let result = f();

        if let Some(file) = file {
            // Unlock errors are unrecoverable noise; dropping the handle
            // releases the advisory lock regardless.
            let _ = fs2::FileExt::unlock(&file);
        }
        lock.release();

        Ok(result)
    }

    /// FIFO barrier: returns only after every request queued on `name`
    /// before this call has completed.
    pub fn flush_pending_writes(&self, name: &str) -> ClientResult<()> {
        self.request(name, || ())
    }
}

impl Default for LockService {
    fn default() -> Self {
        Self::new()
    }
}

//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::UserStore;
use opsync_model::{ClientId, UserId};
use opsync_protocol::{PullRequest, PullResponse, PushRequest, PushResponse};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Handler for sync requests.
///
/// Holds one [`UserStore`] per user behind a per-user mutex: everything a
/// push does — the gap check, dedup, sequence allocation, persistence — runs
/// under that one lock, which is the transaction serializing concurrent
/// devices of the same user. No cross-user locking exists; sequences are
/// scoped per user.
pub struct RequestHandler {
    config: ServerConfig,
    users: RwLock<HashMap<UserId, Arc<Mutex<UserStore>>>>,
}

impl RequestHandler {
    /// Creates a new handler.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the store for a user, creating it on first contact.
    pub fn user_store(&self, user_id: UserId) -> Arc<Mutex<UserStore>> {
        if let Some(store) = self.users.read().get(&user_id) {
            return Arc::clone(store);
        }
        let mut users = self.users.write();
        Arc::clone(
            users
                .entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(UserStore::new(user_id)))),
        )
    }

    /// Handles an incremental push.
    ///
    /// Replies [`PushResponse::Gap`] — accepting nothing — when the client's
    /// claimed cursor does not connect to retained history. Everything else
    /// is sequenced under the user's transaction lock.
    pub fn handle_push(&self, user_id: UserId, request: PushRequest) -> ServerResult<PushResponse> {
        if request.operations.len() > self.config.max_push_batch as usize {
            return Err(ServerError::InvalidRequest(format!(
                "push batch too large: {} > {}",
                request.operations.len(),
                self.config.max_push_batch
            )));
        }

        let store = self.user_store(user_id);
        let mut store = store.lock();
        let now = now_ms();
        store.touch_device(request.client_id, now);

        if store.has_gap(request.since_seq) {
            tracing::warn!(
                user = %user_id,
                client = %request.client_id,
                since_seq = request.since_seq,
                earliest_retained = store.earliest_retained_seq(),
                last_seq = store.last_seq(),
                "gap detected, requesting full-state upload"
            );
            return Ok(PushResponse::Gap);
        }

        let accepted = store.ingest(request.operations, now);
        tracing::debug!(
            user = %user_id,
            client = %request.client_id,
            accepted,
            last_seq = store.last_seq(),
            "push accepted"
        );

        Ok(PushResponse::Accepted {
            server_seq: store.last_seq(),
        })
    }

    /// Handles a full-state push after a gap.
    ///
    /// Same sequencing and dedup as an incremental push, but the gap check is
    /// bypassed: the batch is a complete snapshot, so there is no prior
    /// cursor to validate.
    pub fn handle_full_push(
        &self,
        user_id: UserId,
        request: PushRequest,
    ) -> ServerResult<PushResponse> {
        if request.operations.len() > self.config.max_full_push_batch as usize {
            return Err(ServerError::InvalidRequest(format!(
                "full-state batch too large: {} > {}",
                request.operations.len(),
                self.config.max_full_push_batch
            )));
        }

        let store = self.user_store(user_id);
        let mut store = store.lock();
        let now = now_ms();
        store.touch_device(request.client_id, now);

        let total = request.operations.len();
        let accepted = store.ingest(request.operations, now);
        tracing::info!(
            user = %user_id,
            client = %request.client_id,
            accepted,
            total,
            last_seq = store.last_seq(),
            "full-state push ingested"
        );

        Ok(PushResponse::Accepted {
            server_seq: store.last_seq(),
        })
    }

    /// Handles a pull.
    pub fn handle_pull(
        &self,
        user_id: UserId,
        client_id: ClientId,
        request: PullRequest,
    ) -> ServerResult<PullResponse> {
        let limit = request.limit.min(self.config.max_pull_batch);

        let store = self.user_store(user_id);
        let mut store = store.lock();

        let operations = store.operations_after(request.after_seq, limit);
        let has_more = store.has_more_after(request.after_seq, limit);

        let through = operations
            .iter()
            .filter_map(|op| op.server_seq)
            .max()
            .unwrap_or(request.after_seq);
        store.record_pull(client_id, through, now_ms());

        tracing::debug!(
            user = %user_id,
            client = %client_id,
            after_seq = request.after_seq,
            served = operations.len(),
            has_more,
            "pull served"
        );

        Ok(PullResponse::new(operations, has_more))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

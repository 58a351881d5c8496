//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::store::UserStore;
use opsync_model::{ClientId, UserId};
use opsync_protocol::{
    decode_body_auto, encode_body, PullRequest, PullResponse, PushRequest, PushResponse,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// The sync server.
///
/// Wraps a [`RequestHandler`] and adds the wire dispatch layer: compressed
/// CBOR bodies on `/sync/push`, `/sync/pull`, and `/sync/push-full`.
/// User and device identity arrive from the authentication layer, which is
/// outside this crate.
///
/// # Example
///
/// ```
/// use opsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// // Expose transport endpoints that call server.handle_request(...)
/// // or the typed handle_push/handle_pull/handle_full_push methods.
/// ```
pub struct SyncServer {
    handler: RequestHandler,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            handler: RequestHandler::new(config),
        }
    }

    /// Handles an incremental push.
    pub fn handle_push(&self, user_id: UserId, request: PushRequest) -> ServerResult<PushResponse> {
        self.handler.handle_push(user_id, request)
    }

    /// Handles a full-state push.
    pub fn handle_full_push(
        &self,
        user_id: UserId,
        request: PushRequest,
    ) -> ServerResult<PushResponse> {
        self.handler.handle_full_push(user_id, request)
    }

    /// Handles a pull.
    pub fn handle_pull(
        &self,
        user_id: UserId,
        client_id: ClientId,
        request: PullRequest,
    ) -> ServerResult<PullResponse> {
        self.handler.handle_pull(user_id, client_id, request)
    }

    /// Dispatches an encoded request body to the endpoint at `path`.
    ///
    /// Bodies may be raw compressed CBOR or the base64-wrapped form; the
    /// wrapped form is unwrapped before decompression. Responses are always
    /// raw compressed CBOR.
    pub fn handle_request(
        &self,
        user_id: UserId,
        client_id: ClientId,
        path: &str,
        body: &[u8],
    ) -> ServerResult<Vec<u8>> {
        match path {
            "/sync/push" => {
                let request: PushRequest = decode_body_auto(body)?;
                let response = self.handle_push(user_id, request)?;
                Ok(encode_body(&response)?)
            }
            "/sync/push-full" => {
                let request: PushRequest = decode_body_auto(body)?;
                let response = self.handle_full_push(user_id, request)?;
                Ok(encode_body(&response)?)
            }
            "/sync/pull" => {
                let request: PullRequest = decode_body_auto(body)?;
                let response = self.handle_pull(user_id, client_id, request)?;
                Ok(encode_body(&response)?)
            }
            other => Err(ServerError::UnknownEndpoint(other.to_string())),
        }
    }

    /// Number of retained operations for a user.
    pub fn operation_count(&self, user_id: UserId) -> usize {
        self.handler.user_store(user_id).lock().operation_count()
    }

    /// Direct access to a user's store, for pruning and inspection.
    pub fn user_store(&self, user_id: UserId) -> Arc<Mutex<UserStore>> {
        self.handler.user_store(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsync_model::EntityKind;
    use opsync_protocol::{encode_body_b64, Operation};

    #[test]
    fn wire_dispatch_roundtrip() {
        let server = SyncServer::new(ServerConfig::default());
        let user = UserId::generate();
        let client = ClientId::generate();

        let push = PushRequest::new(
            client,
            0,
            vec![Operation::delete(EntityKind::Task, "t1", client)],
        );
        let body = encode_body(&push).unwrap();
        let resp_body = server
            .handle_request(user, client, "/sync/push", &body)
            .unwrap();
        let resp: PushResponse = decode_body_auto(&resp_body).unwrap();
        assert_eq!(resp.accepted_seq(), Some(1));

        let pull_body = encode_body(&PullRequest::new(0, 10)).unwrap();
        let resp_body = server
            .handle_request(user, client, "/sync/pull", &pull_body)
            .unwrap();
        let resp: PullResponse = decode_body_auto(&resp_body).unwrap();
        assert_eq!(resp.operations.len(), 1);
    }

    #[test]
    fn base64_wrapped_bodies_are_accepted() {
        let server = SyncServer::new(ServerConfig::default());
        let user = UserId::generate();
        let client = ClientId::generate();

        let push = PushRequest::new(
            client,
            0,
            vec![Operation::delete(EntityKind::Note, "n1", client)],
        );
        let wrapped = encode_body_b64(&push).unwrap();
        let resp_body = server
            .handle_request(user, client, "/sync/push", wrapped.as_bytes())
            .unwrap();
        let resp: PushResponse = decode_body_auto(&resp_body).unwrap();
        assert_eq!(resp.accepted_seq(), Some(1));
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        let server = SyncServer::new(ServerConfig::default());
        let result = server.handle_request(
            UserId::generate(),
            ClientId::generate(),
            "/sync/bogus",
            b"",
        );
        assert!(matches!(result, Err(ServerError::UnknownEndpoint(_))));
    }

    #[test]
    fn users_are_sequenced_independently() {
        let server = SyncServer::new(ServerConfig::default());
        let user_a = UserId::generate();
        let user_b = UserId::generate();
        let client = ClientId::generate();

        for user in [user_a, user_b] {
            let resp = server
                .handle_push(
                    user,
                    PushRequest::new(
                        client,
                        0,
                        vec![Operation::delete(EntityKind::Tag, "g", client)],
                    ),
                )
                .unwrap();
            // Each user starts at sequence 1.
            assert_eq!(resp.accepted_seq(), Some(1));
        }
    }
}

//! Protocol messages for sync.

use crate::operation::Operation;
use opsync_model::ClientId;
use serde::{Deserialize, Serialize};

/// Push request from a client.
///
/// `since_seq` is the last server sequence this device has fully applied.
/// The server validates it against its own retained history before accepting
/// anything; a full-state push reuses this shape on the `/sync/push-full`
/// endpoint with `since_seq = 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Originating device.
    pub client_id: ClientId,
    /// Last server sequence the device has fully applied.
    pub since_seq: u64,
    /// Operations to push, in local commit order.
    pub operations: Vec<Operation>,
}

impl PushRequest {
    /// Creates a new push request.
    pub fn new(client_id: ClientId, since_seq: u64, operations: Vec<Operation>) -> Self {
        Self {
            client_id,
            since_seq,
            operations,
        }
    }
}

/// Push response from the server.
///
/// `gap` is a protocol signal, not an error: the server's retained history
/// does not connect to the client's claimed cursor, so the client must
/// escalate to a full-state upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PushResponse {
    /// All operations accepted (or deduplicated).
    Accepted {
        /// The user's sequence after this batch.
        server_seq: u64,
    },
    /// Discontinuity detected between the client cursor and server history.
    Gap,
}

impl PushResponse {
    /// Returns the new server sequence if the push was accepted.
    pub fn accepted_seq(&self) -> Option<u64> {
        match self {
            PushResponse::Accepted { server_seq } => Some(*server_seq),
            PushResponse::Gap => None,
        }
    }

    /// Returns true for a gap response.
    pub fn is_gap(&self) -> bool {
        matches!(self, PushResponse::Gap)
    }
}

/// Pull request from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Return operations with `server_seq` greater than this.
    pub after_seq: u64,
    /// Maximum number of operations to return.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a new pull request.
    pub fn new(after_seq: u64, limit: u32) -> Self {
        Self { after_seq, limit }
    }
}

/// Pull response from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Operations after the requested sequence, ascending by `server_seq`.
    pub operations: Vec<Operation>,
    /// Whether more operations remain; callers page until false.
    pub has_more: bool,
}

impl PullResponse {
    /// Creates a new pull response.
    pub fn new(operations: Vec<Operation>, has_more: bool) -> Self {
        Self {
            operations,
            has_more,
        }
    }

    /// The highest server sequence in this page, if any.
    pub fn last_seq(&self) -> Option<u64> {
        self.operations.iter().filter_map(|op| op.server_seq).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsync_model::EntityKind;

    #[test]
    fn push_response_status_tagging() {
        let json = serde_json::to_value(PushResponse::Accepted { server_seq: 12 }).unwrap();
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["server_seq"], 12);

        let json = serde_json::to_value(PushResponse::Gap).unwrap();
        assert_eq!(json["status"], "gap");

        let back: PushResponse = serde_json::from_value(json).unwrap();
        assert!(back.is_gap());
    }

    #[test]
    fn accepted_seq_accessor() {
        assert_eq!(
            PushResponse::Accepted { server_seq: 3 }.accepted_seq(),
            Some(3)
        );
        assert_eq!(PushResponse::Gap.accepted_seq(), None);
    }

    #[test]
    fn pull_response_last_seq() {
        let client = ClientId::generate();
        let ops = vec![
            Operation::delete(EntityKind::Task, "a", client).with_server_meta(4, 1),
            Operation::delete(EntityKind::Task, "b", client).with_server_meta(5, 2),
        ];
        let resp = PullResponse::new(ops, false);
        assert_eq!(resp.last_seq(), Some(5));

        assert_eq!(PullResponse::new(vec![], false).last_seq(), None);
    }
}

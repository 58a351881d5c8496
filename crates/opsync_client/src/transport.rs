//! Transport layer abstraction for sync operations.

use crate::error::{ClientError, ClientResult};
use opsync_protocol::{PullRequest, PullResponse, PushRequest, PushResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A sync transport handles communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, loopback, mock for testing, etc.).
pub trait SyncTransport: Send + Sync {
    /// Pushes a batch of pending operations.
    fn push(&self, request: &PushRequest) -> ClientResult<PushResponse>;

    /// Pushes a full-state snapshot (gap recovery).
    fn push_full(&self, request: &PushRequest) -> ClientResult<PushResponse>;

    /// Pulls operations after a sequence cursor.
    fn pull(&self, request: &PullRequest) -> ClientResult<PullResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> ClientResult<()>;
}

/// A mock transport for testing.
///
/// Push and pull responses are queues: each call consumes the next scripted
/// response, falling back to the last one when the queue runs dry.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    push_responses: Mutex<VecDeque<PushResponse>>,
    full_push_responses: Mutex<VecDeque<PushResponse>>,
    full_push_requests: Mutex<Vec<PushRequest>>,
    pull_responses: Mutex<VecDeque<PullResponse>>,
    push_count: AtomicUsize,
    full_push_count: AtomicUsize,
    pull_count: AtomicUsize,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Queues a push response.
    pub fn enqueue_push_response(&self, response: PushResponse) {
        self.push_responses.lock().push_back(response);
    }

    /// Queues a full-push response.
    pub fn enqueue_full_push_response(&self, response: PushResponse) {
        self.full_push_responses.lock().push_back(response);
    }

    /// Queues a pull response.
    pub fn enqueue_pull_response(&self, response: PullResponse) {
        self.pull_responses.lock().push_back(response);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of push calls made.
    pub fn push_count(&self) -> usize {
        self.push_count.load(Ordering::SeqCst)
    }

    /// Number of full-push calls made.
    pub fn full_push_count(&self) -> usize {
        self.full_push_count.load(Ordering::SeqCst)
    }

    /// Full-push requests received, in call order.
    pub fn full_push_requests(&self) -> Vec<PushRequest> {
        self.full_push_requests.lock().clone()
    }

    /// Number of pull calls made.
    pub fn pull_count(&self) -> usize {
        self.pull_count.load(Ordering::SeqCst)
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<T>>, what: &str) -> ClientResult<T> {
        let mut queue = queue.lock();
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap_or_else(|| unreachable!()))
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| ClientError::Protocol(format!("no mock {what} response set")))
        }
    }
}

impl SyncTransport for MockTransport {
    fn push(&self, _request: &PushRequest) -> ClientResult<PushResponse> {
        if !self.is_connected() {
            return Err(ClientError::transport_retryable("not connected"));
        }
        self.push_count.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.push_responses, "push")
    }

    fn push_full(&self, request: &PushRequest) -> ClientResult<PushResponse> {
        if !self.is_connected() {
            return Err(ClientError::transport_retryable("not connected"));
        }
        self.full_push_count.fetch_add(1, Ordering::SeqCst);
        self.full_push_requests.lock().push(request.clone());
        Self::next(&self.full_push_responses, "full-push")
    }

    fn pull(&self, _request: &PullRequest) -> ClientResult<PullResponse> {
        if !self.is_connected() {
            return Err(ClientError::transport_retryable("not connected"));
        }
        self.pull_count.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.pull_responses, "pull")
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> ClientResult<()> {
        self.set_connected(false);
        Ok(())
    }
}

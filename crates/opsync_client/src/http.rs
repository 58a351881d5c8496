//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, ureq, or an in-process loopback).

use crate::config::SyncConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::SyncTransport;
use opsync_protocol::{
    decode_body_auto, encode_body, encode_body_b64, PullRequest, PullResponse, PushRequest,
    PushResponse,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. This allows
/// using different HTTP libraries or even non-HTTP transports.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
///
/// Bodies are compressed CBOR; when the configuration enables base64 mode
/// (for runtimes without binary upload) the compressed bytes are wrapped in
/// base64. Responses are decoded with auto-detection, so either form is
/// accepted regardless of the request mode.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    base64_bodies: bool,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport from the sync configuration.
    pub fn new(config: &SyncConfig, client: C) -> Self {
        Self {
            base_url: config.server_url.clone(),
            base64_bodies: config.base64_bodies,
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post_wire<Req, Res>(&self, endpoint: &str, request: &Req) -> ClientResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        if !self.is_connected() {
            return Err(ClientError::transport_retryable("not connected"));
        }

        let body = if self.base64_bodies {
            encode_body_b64(request)?.into_bytes()
        } else {
            encode_body(request)?
        };

        let url = format!("{}{}", self.base_url, endpoint);
        let response_body = self.client.post(&url, body).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            self.connected.store(false, Ordering::SeqCst);
            ClientError::transport_retryable(e)
        })?;

        *self.last_error.write() = None;
        Ok(decode_body_auto(&response_body)?)
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push(&self, request: &PushRequest) -> ClientResult<PushResponse> {
        self.post_wire("/sync/push", request)
    }

    fn push_full(&self, request: &PushRequest) -> ClientResult<PushResponse> {
        self.post_wire("/sync/push-full", request)
    }

    fn pull(&self, request: &PullRequest) -> ClientResult<PullResponse> {
        self.post_wire("/sync/pull", request)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> ClientResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

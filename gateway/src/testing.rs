//! Test-only fake transport: scripts a sequence of raw HTTP responses so `RestClient`/`ExecutionEngine`
//! tests exercise signing, rate limiting, breaker transitions and response classification without
//! touching a socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use hyper::Method;
use parking_lot::Mutex;

use crate::rest::transport::{HttpTransport, RawResponse, TransportError};

pub struct ScriptedResponse {
    pub status: u16,
    pub body: String,
}

/// A transport that replays a fixed queue of responses in order, regardless of which endpoint
/// asked. Good enough for scripting one call sequence per test; push enough responses for every
/// request the scenario makes.
pub struct FakeTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    call_count: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, status: u16, body: impl Into<String>) -> &Self {
        self.responses.lock().push_back(ScriptedResponse {
            status,
            body: body.into(),
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(
        &self,
        method: Method,
        uri: String,
        _body: Option<String>,
        _headers: Vec<(String, String)>,
    ) -> Result<RawResponse, TransportError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().pop_front();
        match next {
            Some(response) => Ok(RawResponse {
                status: response.status,
                body: response.body,
            }),
            None => Err(TransportError {
                method: method.to_string(),
                uri,
                source: anyhow::anyhow!("FakeTransport: no scripted response left"),
            }),
        }
    }
}

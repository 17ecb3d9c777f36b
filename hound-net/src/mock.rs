//! Scripted transport for tests
//!
//! Replies are scripted per exact URL. A route with several replies hands them
//! out in order and then keeps repeating the last one. Unscripted URLs get the
//! fallback reply, a bare 404 unless changed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::{FetchRequest, RawResponse, Transport, TransportError};

/// One scripted answer
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Response(RawResponse),
    Error(TransportError),
}

impl ScriptedReply {
    pub fn status(status: u16, body: &str) -> Self {
        ScriptedReply::Response(RawResponse {
            status,
            body: body.to_string(),
            final_url: String::new(),
            retry_after: None,
        })
    }

    pub fn error(err: TransportError) -> Self {
        ScriptedReply::Error(err)
    }

    pub fn with_retry_after(mut self, value: &str) -> Self {
        if let ScriptedReply::Response(response) = &mut self {
            response.retry_after = Some(value.to_string());
        }
        self
    }

    /// Pretend redirects ended at `final_url`
    pub fn with_final_url(mut self, final_url: &str) -> Self {
        if let ScriptedReply::Response(response) = &mut self {
            response.final_url = final_url.to_string();
        }
        self
    }
}

#[derive(Debug, Default)]
struct Route {
    replies: VecDeque<ScriptedReply>,
    delay: Duration,
}

/// In-memory [`Transport`] with per-URL scripts, delays and call counters
#[derive(Debug)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Route>>,
    fallback: Mutex<ScriptedReply>,
    calls: Mutex<HashMap<String, usize>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            fallback: Mutex::new(ScriptedReply::status(404, "")),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) -> &Self {
        self.respond_sequence(url, vec![ScriptedReply::status(status, body)])
    }

    pub fn respond_sequence(&self, url: &str, replies: Vec<ScriptedReply>) -> &Self {
        let mut routes = self.routes.lock();
        let route = routes.entry(url.to_string()).or_default();
        route.replies = replies.into();
        self
    }

    pub fn fail(&self, url: &str, err: TransportError) -> &Self {
        self.respond_sequence(url, vec![ScriptedReply::Error(err)])
    }

    /// Delay every reply on `url`
    pub fn delay(&self, url: &str, delay: Duration) -> &Self {
        self.routes.lock().entry(url.to_string()).or_default().delay = delay;
        self
    }

    /// Reply used for unscripted URLs
    pub fn set_fallback(&self, reply: ScriptedReply) -> &Self {
        *self.fallback.lock() = reply;
        self
    }

    /// Number of sends to `url`
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn next_reply(&self, url: &str) -> (ScriptedReply, Duration) {
        let mut routes = self.routes.lock();
        match routes.get_mut(url) {
            Some(route) if !route.replies.is_empty() => {
                let reply = if route.replies.len() > 1 {
                    route.replies.pop_front()
                } else {
                    route.replies.front().cloned()
                };
                let reply = reply.unwrap_or_else(|| self.fallback.lock().clone());
                (reply, route.delay)
            }
            Some(route) => (self.fallback.lock().clone(), route.delay),
            None => (self.fallback.lock().clone(), Duration::ZERO),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse, TransportError> {
        *self.calls.lock().entry(request.url.clone()).or_insert(0) += 1;
        let (reply, delay) = self.next_reply(&request.url);

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            ScriptedReply::Response(mut response) => {
                if response.final_url.is_empty() {
                    response.final_url = request.url.clone();
                }
                Ok(response)
            }
            ScriptedReply::Error(err) => Err(err),
        }
    }
}

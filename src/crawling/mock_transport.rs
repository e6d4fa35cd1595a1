//! Scripted transport for tests and dry runs
//!
//! Routes are matched by URL substring, longest pattern first. Each route
//! plays its replies in order and then keeps repeating the last one.
//! Unmatched URLs get an empty 404.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::infrastructure::http_transport::{HttpRequest, HttpResponse, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct ScriptedReply {
    result: Result<HttpResponse, TransportError>,
    delay: Option<Duration>,
}

impl ScriptedReply {
    #[must_use]
    pub fn body(status: u16, body: impl Into<String>) -> Self {
        Self {
            result: Ok(HttpResponse {
                status,
                body: body.into(),
                retry_after: None,
            }),
            delay: None,
        }
    }

    #[must_use]
    pub fn json(status: u16, value: Value) -> Self {
        Self::body(status, value.to_string())
    }

    #[must_use]
    pub fn status(status: u16) -> Self {
        Self::body(status, "{}")
    }

    #[must_use]
    pub fn error(error: TransportError) -> Self {
        Self {
            result: Err(error),
            delay: None,
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        if let Ok(response) = &mut self.result {
            response.retry_after = Some(retry_after);
        }
        self
    }

    /// Hold the reply back, simulating a slow backend
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug)]
struct Route {
    pattern: String,
    replies: VecDeque<ScriptedReply>,
}

impl Route {
    fn next_reply(&mut self) -> Option<ScriptedReply> {
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the replies for URLs containing `pattern`; replaces an
    /// existing route with the same pattern
    pub fn on(&self, pattern: impl Into<String>, replies: Vec<ScriptedReply>) {
        let pattern = pattern.into();
        let mut routes = lock(&self.routes);
        routes.retain(|route| route.pattern != pattern);
        routes.push(Route {
            pattern,
            replies: replies.into(),
        });
    }

    /// Every request seen so far, in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<HttpRequest> {
        lock(&self.calls).clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    #[must_use]
    pub fn calls_matching(&self, pattern: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.url.contains(pattern))
            .count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        lock(&self.calls).push(request.clone());

        let reply = {
            let mut routes = lock(&self.routes);
            routes
                .iter_mut()
                .filter(|route| request.url.contains(&route.pattern))
                .max_by_key(|route| route.pattern.len())
                .and_then(Route::next_reply)
        };

        let Some(reply) = reply else {
            return Ok(HttpResponse {
                status: 404,
                body: String::new(),
                retry_after: None,
            });
        };
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result
    }
}

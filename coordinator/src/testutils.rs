use crate::outbound::UpstreamError;
use crate::upstream::{Upstream, UpstreamRequest, UpstreamResponse};
use async_trait::async_trait;
use http::StatusCode;
use hyper::body::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A canned upstream answer.
#[derive(Clone, Debug)]
pub enum Reply {
    /// 200 with the success code, echoing session id and idempotency key like the simulator.
    Echo,
    /// Non-2xx status with a `{code}` body.
    Status(StatusCode, &'static str),
    /// 200 with a non-success business code.
    Business(&'static str),
    /// Transport-level failure.
    Refused,
    /// The attempt panics, taking its execution task down with it.
    Panic,
}

/// Upstream that plays a script of replies and records how it was called.
pub struct ScriptedUpstream {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    idempotency_keys: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub fn always(reply: Reply) -> Self {
        Self::scripted(Vec::new(), reply)
    }

    /// Plays `script` in order, then answers with `fallback` forever.
    pub fn scripted(script: Vec<Reply>, fallback: Reply) -> Self {
        ScriptedUpstream {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            idempotency_keys: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Attempts currently in progress.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of attempts ever in progress at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn idempotency_keys(&self) -> Vec<String> {
        self.idempotency_keys.lock().clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.idempotency_keys
            .lock()
            .push(request.idempotency_key.clone());

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let (status, body) = match reply {
            Reply::Echo => (
                StatusCode::OK,
                json!({
                    "code": "0000",
                    "data": {
                        "sessionId": request.body.session_id,
                        "idem": request.idempotency_key,
                    },
                }),
            ),
            Reply::Status(status, code) => (status, json!({ "code": code })),
            Reply::Business(code) => (StatusCode::OK, json!({ "code": code })),
            Reply::Refused => return Err(UpstreamError::Transport("connection refused".into())),
            Reply::Panic => panic!("scripted upstream panic"),
        };

        Ok(UpstreamResponse {
            status,
            body: Bytes::from(body.to_string()),
        })
    }
}

//! Session coordination: idempotent replay, single-flight join and execution.
//!
//! Every session id owns one [`SessionSlot`]. The decision between the three
//! paths is taken under that slot's mutex, so two concurrent requests for the
//! same session can never both start an upstream execution. Sessions never
//! share a lock with each other; the table itself is a concurrent cache whose
//! `get_with` coalesces concurrent creation of the same entry.

use crate::config::{Config, UpstreamTarget};
use crate::errors::CoordinatorError;
use crate::fingerprint::Fingerprint;
use crate::metrics_defs::{
    AUTH_REJECTIONS, EXECUTIONS_INFLIGHT, REQUEST_DURATION, REQUESTS, UPSTREAM_ATTEMPTS,
    UPSTREAM_FAILURES,
};
use crate::outbound::OutboundCaller;
use crate::outcome::{Delivery, ExecutionResult, Outcome};
use crate::request::CoordinationRequest;
use crate::retry::RetryPolicy;
use crate::upstream::{HttpUpstream, SimulatedUpstream, Upstream};
use mock_upstream::simulator::Simulator;
use moka::sync::Cache;
use parking_lot::Mutex;
use shared::{counter, gauge, histogram};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Read-only view of a session, for diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub completed: bool,
    pub last_fingerprint: Option<Fingerprint>,
    pub last_result: Option<ExecutionResult>,
    pub inflight: bool,
}

#[derive(Default)]
struct SessionState {
    completed: bool,
    last_fingerprint: Option<Fingerprint>,
    last_result: Option<ExecutionResult>,
    inflight: Option<InflightHandle>,
}

/// Handle on a running execution. Every clone observes the same result.
#[derive(Clone)]
struct InflightHandle {
    id: u64,
    rx: watch::Receiver<Option<ExecutionResult>>,
}

impl InflightHandle {
    /// The execution task is gone without having published a result.
    fn is_abandoned(&self) -> bool {
        self.rx.has_changed().is_err()
    }

    /// Resolves to `None` if the execution went away without publishing.
    async fn wait(mut self) -> Option<ExecutionResult> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(result) => (*result).clone(),
            Err(_) => None,
        }
    }
}

#[derive(Default)]
struct SessionSlot {
    state: Mutex<SessionState>,
}

impl SessionSlot {
    /// Records a finished execution and frees the inflight slot it occupied.
    fn finish(&self, id: u64, fingerprint: Fingerprint, result: ExecutionResult) {
        let mut state = self.state.lock();
        if result.is_success() {
            state.completed = true;
        }
        state.last_fingerprint = Some(fingerprint);
        state.last_result = Some(result);
        Self::clear_inflight(&mut state, id);
    }

    fn clear_inflight(state: &mut SessionState, id: u64) {
        // A newer execution may already occupy the slot
        if state.inflight.as_ref().is_some_and(|handle| handle.id == id) {
            state.inflight = None;
        }
    }

    async fn wait(&self, handle: InflightHandle) -> ExecutionResult {
        let id = handle.id;
        match handle.wait().await {
            Some(result) => result,
            None => {
                tracing::error!(execution_id = id, "Execution ended without a result");
                Self::clear_inflight(&mut self.state.lock(), id);
                ExecutionResult::UpstreamFailure("execution ended without a result".into())
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            completed: state.completed,
            last_fingerprint: state.last_fingerprint,
            last_result: state.last_result.clone(),
            inflight: state.inflight.is_some(),
        }
    }
}

enum Decision {
    Replay(ExecutionResult),
    Rejected(ExecutionResult),
    Join(InflightHandle),
    Run(InflightHandle),
}

struct CoordinatorInner {
    sessions: Cache<String, Arc<SessionSlot>>,
    expected_token: String,
    retry: RetryPolicy,
    caller: OutboundCaller,
    next_execution_id: AtomicU64,
}

impl CoordinatorInner {
    async fn execute(
        &self,
        request: &CoordinationRequest,
        fingerprint: &Fingerprint,
    ) -> ExecutionResult {
        let upstream = self.caller.upstream_name().to_string();

        let result = self
            .retry
            .run(|attempt| {
                counter!(UPSTREAM_ATTEMPTS, "upstream" => upstream.clone()).increment(1);
                tracing::debug!(
                    session_id = %request.session_id,
                    %fingerprint,
                    attempt,
                    "Calling upstream"
                );
                async move {
                    self.caller
                        .call(&request.session_id, request.payload.as_ref(), fingerprint)
                        .await
                        .inspect_err(|e| {
                            counter!(UPSTREAM_FAILURES, "kind" => e.kind()).increment(1);
                        })
                }
            })
            .await;

        match result {
            Ok(body) => ExecutionResult::UpstreamSuccess(body),
            Err(e) => {
                tracing::warn!(
                    session_id = %request.session_id,
                    %fingerprint,
                    error = %e,
                    "Upstream execution failed"
                );
                ExecutionResult::UpstreamFailure(e.to_string())
            }
        }
    }
}

/// Front door for coordination requests. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    pub fn new<T: Into<String>>(
        caller: OutboundCaller,
        retry: RetryPolicy,
        expected_token: T,
    ) -> Self {
        Coordinator {
            inner: Arc::new(CoordinatorInner {
                // Unbounded and without expiry. Session eviction would be
                // configured here via max_capacity / time_to_idle.
                sessions: Cache::builder().build(),
                expected_token: expected_token.into(),
                retry,
                caller,
                next_execution_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, CoordinatorError> {
        let upstream: Arc<dyn Upstream> = match &config.upstream.target {
            UpstreamTarget::Simulated { simulator } => Arc::new(SimulatedUpstream::new(
                Simulator::new(simulator.clone()),
            )),
            UpstreamTarget::Http { url } => Arc::new(HttpUpstream::new(url.clone())?),
        };

        let caller = OutboundCaller::new(
            upstream,
            Duration::from_millis(config.upstream.timeout_ms),
        );

        Ok(Coordinator::new(
            caller,
            RetryPolicy::from(&config.retry),
            config.auth.expected_token.clone(),
        ))
    }

    /// Answers a validated coordination request.
    pub async fn handle(&self, request: CoordinationRequest) -> Result<Outcome, CoordinatorError> {
        let start = Instant::now();
        let fingerprint = Fingerprint::of(&request)?;
        let slot = self
            .inner
            .sessions
            .get_with_by_ref(request.session_id.as_str(), || {
                Arc::new(SessionSlot::default())
            });

        let outcome = match self.decide(&slot, request, fingerprint) {
            Decision::Replay(result) => Outcome::new(result, Delivery::Replayed),
            Decision::Rejected(result) => Outcome::new(result, Delivery::Fresh),
            Decision::Join(handle) => Outcome::new(slot.wait(handle).await, Delivery::Joined),
            Decision::Run(handle) => Outcome::new(slot.wait(handle).await, Delivery::Fresh),
        };

        counter!(
            REQUESTS,
            "delivery" => outcome.delivery.as_str(),
            "status" => outcome.status().as_str().to_string()
        )
        .increment(1);
        histogram!(REQUEST_DURATION, "delivery" => outcome.delivery.as_str())
            .record(start.elapsed().as_secs_f64());

        Ok(outcome)
    }

    /// Picks replay, join, rejection or a new execution. Runs entirely under
    /// the session lock, which is never held across an await.
    fn decide(
        &self,
        slot: &Arc<SessionSlot>,
        request: CoordinationRequest,
        fingerprint: Fingerprint,
    ) -> Decision {
        let mut state = slot.state.lock();

        if state.last_fingerprint == Some(fingerprint)
            && let Some(result) = &state.last_result
        {
            tracing::debug!(session_id = %request.session_id, %fingerprint, "Replaying cached result");
            return Decision::Replay(result.clone());
        }

        if state.inflight.as_ref().is_some_and(InflightHandle::is_abandoned) {
            tracing::warn!(
                session_id = %request.session_id,
                "Discarding inflight execution that never published"
            );
            state.inflight = None;
        }

        if let Some(handle) = &state.inflight {
            tracing::debug!(
                session_id = %request.session_id,
                %fingerprint,
                execution_id = handle.id,
                "Joining inflight execution"
            );
            return Decision::Join(handle.clone());
        }

        if request.token != self.inner.expected_token {
            tracing::info!(session_id = %request.session_id, %fingerprint, "Rejected invalid token");
            counter!(AUTH_REJECTIONS).increment(1);
            state.last_fingerprint = Some(fingerprint);
            state.last_result = Some(ExecutionResult::AuthRejected);
            return Decision::Rejected(ExecutionResult::AuthRejected);
        }

        let handle = self.spawn_execution(slot.clone(), request, fingerprint);
        state.inflight = Some(handle.clone());
        Decision::Run(handle)
    }

    /// Runs the execution on its own task so it completes, and publishes to
    /// every waiter, even if the caller that started it goes away.
    fn spawn_execution(
        &self,
        slot: Arc<SessionSlot>,
        request: CoordinationRequest,
        fingerprint: Fingerprint,
    ) -> InflightHandle {
        let id = self.inner.next_execution_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let inner = self.inner.clone();

        tracing::info!(
            session_id = %request.session_id,
            %fingerprint,
            execution_id = id,
            "Starting upstream execution"
        );

        tokio::spawn(async move {
            gauge!(EXECUTIONS_INFLIGHT).increment(1.0);
            let result = inner.execute(&request, &fingerprint).await;
            gauge!(EXECUTIONS_INFLIGHT).decrement(1.0);

            // State first, then wake waiters, so a follow-up request sees the cache
            slot.finish(id, fingerprint, result.clone());
            let _ = tx.send(Some(result));
        });

        InflightHandle { id, rx }
    }

    /// Drops all session state.
    pub fn reset(&self) {
        self.inner.sessions.invalidate_all();
        tracing::info!("Session state cleared");
    }

    pub fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.inner
            .sessions
            .get(session_id)
            .map(|slot| slot.snapshot())
    }
}

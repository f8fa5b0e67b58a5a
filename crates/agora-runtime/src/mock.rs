//! In-process collaborators for deterministic testing.
//!
//! None of these touch the network or a clock: the transport records what
//! it is asked to send, the scheduler records what it is asked to run, and
//! the racing state store injects conditional-update conflicts on demand.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use agora_core::{
    AgoraError, Result, RpcRequest, RpcResponse, Scheduler, StateStore, TaskId, Transport,
};

// ── Transport ──────────────────────────────────────────────────

/// A transport that records every request and answers from a table of
/// canned results keyed by method name.
///
/// # Example
/// ```
/// use agora_runtime::mock::MockTransport;
/// let transport = MockTransport::new().with_response("getValue", serde_json::json!(42));
/// ```
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<(String, RpcRequest)>>,
    deliveries: Mutex<Vec<(String, RpcRequest)>>,
    responses: Mutex<HashMap<String, Value>>,
    failing_urls: Mutex<HashSet<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls to `method` with `result`.
    pub fn with_response(self, method: &str, result: Value) -> Self {
        self.set_response(method, result);
        self
    }

    pub fn set_response(&self, method: &str, result: Value) {
        self.responses.lock().insert(method.to_string(), result);
    }

    /// Make every call and delivery to `url` fail at the transport level.
    pub fn fail_url(&self, url: &str) {
        self.failing_urls.lock().insert(url.to_string());
    }

    /// Requests sent with `call`, in order.
    pub fn calls(&self) -> Vec<(String, RpcRequest)> {
        self.calls.lock().clone()
    }

    /// Requests sent with `deliver`, in order.
    pub fn deliveries(&self) -> Vec<(String, RpcRequest)> {
        self.deliveries.lock().clone()
    }

    /// Calls and deliveries of `method`, in order.
    pub fn sent(&self, method: &str) -> Vec<(String, RpcRequest)> {
        self.calls()
            .into_iter()
            .chain(self.deliveries())
            .filter(|(_, r)| r.method == method)
            .collect()
    }

    fn check_url(&self, url: &str) -> Result<()> {
        if self.failing_urls.lock().contains(url) {
            return Err(AgoraError::Transport {
                url: url.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, url: &str, request: RpcRequest) -> Result<RpcResponse> {
        self.calls.lock().push((url.to_string(), request.clone()));
        self.check_url(url)?;
        let response = match self.responses.lock().get(&request.method) {
            Some(result) => RpcResponse::ok(result.clone()),
            None => RpcResponse::err(
                AgoraError::MethodNotFound(request.method.clone()).to_rpc_error(),
            ),
        };
        Ok(response)
    }

    async fn deliver(&self, url: &str, request: RpcRequest) -> Result<()> {
        self.deliveries.lock().push((url.to_string(), request));
        self.check_url(url)
    }
}

// ── Scheduler ──────────────────────────────────────────────────

/// A scheduler that only records what it was asked to do.
#[derive(Default)]
pub struct ManualScheduler {
    scheduled: Mutex<Vec<(TaskId, RpcRequest, Duration)>>,
    cancelled: Mutex<Vec<TaskId>>,
    next_id: AtomicUsize,
    fail: Mutex<bool>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `schedule` calls fail.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn scheduled(&self) -> Vec<(TaskId, RpcRequest, Duration)> {
        self.scheduled.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.lock().clone()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, request: RpcRequest, interval: Duration) -> Result<TaskId> {
        if *self.fail.lock() {
            return Err(AgoraError::State("scheduler unavailable".into()));
        }
        let id = format!("task-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.scheduled.lock().push((id.clone(), request, interval));
        Ok(id)
    }

    fn cancel(&self, task_id: &str) -> Result<()> {
        self.cancelled.lock().push(task_id.to_string());
        Ok(())
    }
}

// ── State ──────────────────────────────────────────────────────

type Interference = Box<dyn FnOnce(&dyn StateStore) + Send>;

/// Wraps a state store and makes conditional updates lose races on demand.
pub struct RacingState {
    inner: Arc<dyn StateStore>,
    forced_conflicts: AtomicU32,
    interference: Mutex<Option<Interference>>,
    attempts: AtomicU32,
}

impl RacingState {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            forced_conflicts: AtomicU32::new(0),
            interference: Mutex::new(None),
            attempts: AtomicU32::new(0),
        }
    }

    /// Reject the next `n` conditional updates without writing.
    pub fn fail_next(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Run `f` against the wrapped store right before the next conditional
    /// update, as a competing writer would.
    pub fn interfere_once(&self, f: impl FnOnce(&dyn StateStore) + Send + 'static) {
        *self.interference.lock() = Some(Box::new(f));
    }

    /// Conditional updates attempted so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<dyn StateStore> {
        &self.inner
    }
}

impl StateStore for RacingState {
    fn owner_id(&self) -> &str {
        self.inner.owner_id()
    }

    fn owner_type(&self) -> &str {
        self.inner.owner_type()
    }

    fn owner_url(&self) -> Result<String> {
        self.inner.owner_url()
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        self.inner.put(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }

    fn conditional_update(
        &self,
        key: &str,
        new_value: Value,
        expected: Option<&Value>,
    ) -> Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = self.interference.lock().take() {
            f(self.inner.as_ref());
        }
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Ok(false);
        }
        self.inner.conditional_update(key, new_value, expected)
    }
}

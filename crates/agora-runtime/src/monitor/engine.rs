use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_core::{
    AgoraError, Params, Result, RpcRequest, Scheduler, StateStore, TaskId, Transport,
};

use super::cache::{Cache, CacheRegistry};
use super::{
    MONITORS_KEY, Monitor, MonitorFeature, POLL_METHOD, PUSH_CALLBACK_METHOD, Poll, Push,
};
use crate::persist::{RetryPolicy, update_with_retry};

/// What the engine needs to reach an agent.
#[derive(Clone)]
pub struct AgentHandle {
    pub agent_id: String,
    pub agent_type: String,
    pub state: Arc<dyn StateStore>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Host lookup used by the engine.
#[async_trait]
pub trait AgentResolver: Send + Sync {
    /// Fails with `NotFound` when no such agent exists.
    fn resolve_agent(&self, agent_id: &str) -> Result<AgentHandle>;

    /// Invoke `method` on the agent as the host itself, bypassing the
    /// private-access check.
    async fn invoke_local(&self, agent_id: &str, method: &str, params: Params) -> Result<Value>;
}

fn monitor_map(value: Option<&Value>) -> Result<Map<String, Value>> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(AgoraError::State(format!(
            "{} is not a map: {}",
            MONITORS_KEY, other
        ))),
    }
}

/// Creates, persists and resolves [`Monitor`]s and feeds their caches.
pub struct ResultMonitorEngine {
    resolver: Arc<dyn AgentResolver>,
    transport: Arc<dyn Transport>,
    caches: Arc<CacheRegistry>,
    policy: RetryPolicy,
    default_cache_kind: String,
}

impl ResultMonitorEngine {
    pub fn new(
        resolver: Arc<dyn AgentResolver>,
        transport: Arc<dyn Transport>,
        caches: Arc<CacheRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            resolver,
            transport,
            caches,
            policy,
            default_cache_kind: super::LATEST_CACHE_KIND.to_string(),
        }
    }

    pub fn with_default_cache_kind(mut self, kind: impl Into<String>) -> Self {
        self.default_cache_kind = kind.into();
        self
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// A new, unpersisted monitor with a fresh id.
    pub fn create(
        &self,
        agent_id: &str,
        url: &str,
        method: &str,
        params: Value,
        callback_method: Option<&str>,
    ) -> Monitor {
        Monitor {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            url: url.to_string(),
            method: method.to_string(),
            params,
            callback_method: callback_method.map(str::to_string),
            scheduler_ids: Vec::new(),
            remote_ids: Vec::new(),
            cache_type: None,
        }
    }

    // ── Features ───────────────────────────────────────────────

    pub async fn attach(&self, monitor: &mut Monitor, feature: MonitorFeature) -> Result<()> {
        match feature {
            MonitorFeature::Cache(kind) => {
                self.add_cache(monitor, &kind)?;
            }
            MonitorFeature::Poll(poll) => {
                self.add_poll(monitor, poll);
            }
            MonitorFeature::Push(push) => {
                self.add_push(monitor, push).await;
            }
        }
        Ok(())
    }

    /// Register a cache of `kind` for the monitor and record the kind tag.
    pub fn add_cache(&self, monitor: &mut Monitor, kind: &str) -> Result<Arc<dyn Cache>> {
        let cache = self.caches.build(kind)?;
        self.caches.insert(&monitor.id, Arc::clone(&cache));
        monitor.cache_type = Some(kind.to_string());
        debug!(monitor_id = %monitor.id, kind, "cache attached");
        Ok(cache)
    }

    pub fn add_default_cache(&self, monitor: &mut Monitor) -> Result<Arc<dyn Cache>> {
        let kind = self.default_cache_kind.clone();
        self.add_cache(monitor, &kind)
    }

    /// Schedule `onMonitorPoll` on the owning agent. A failure is logged and
    /// leaves the monitor without a poll task.
    pub fn add_poll(&self, monitor: &mut Monitor, poll: Poll) -> Option<TaskId> {
        let scheduled = self.resolver.resolve_agent(&monitor.agent_id).and_then(|handle| {
            let mut params = Params::new();
            params.insert("monitorId".into(), Value::String(monitor.id.clone()));
            handle
                .scheduler
                .schedule(RpcRequest::new(POLL_METHOD, params), poll.interval)
        });
        match scheduled {
            Ok(task_id) => {
                info!(
                    monitor_id = %monitor.id,
                    task_id = %task_id,
                    interval_ms = poll.interval.as_millis() as u64,
                    "poll attached"
                );
                monitor.scheduler_ids.push(task_id.clone());
                Some(task_id)
            }
            Err(e) => {
                warn!(monitor_id = %monitor.id, error = %e, "failed to attach poll");
                None
            }
        }
    }

    /// Ask the target to push updates to this monitor. Returned remote ids
    /// are appended to the monitor; a failure is logged and leaves it as is.
    pub async fn add_push(&self, monitor: &mut Monitor, push: Push) -> Vec<String> {
        match self.register_push(monitor, &push).await {
            Ok(ids) => {
                info!(monitor_id = %monitor.id, target = %monitor.url, remote_ids = ?ids, "push attached");
                monitor.remote_ids.extend(ids.iter().cloned());
                ids
            }
            Err(e) => {
                warn!(monitor_id = %monitor.id, target = %monitor.url, error = %e, "failed to attach push");
                Vec::new()
            }
        }
    }

    async fn register_push(&self, monitor: &Monitor, push: &Push) -> Result<Vec<String>> {
        let owner = self.resolver.resolve_agent(&monitor.agent_id)?;
        let callback_url = owner.state.owner_url()?;

        let mut params = Params::new();
        params.insert("pushId".into(), Value::String(Uuid::new_v4().to_string()));
        params.insert("callbackUrl".into(), Value::String(callback_url));
        params.insert("callbackMethod".into(), PUSH_CALLBACK_METHOD.into());
        params.insert("monitorId".into(), Value::String(monitor.id.clone()));
        params.insert("method".into(), Value::String(monitor.method.clone()));
        if !monitor.params.is_null() {
            params.insert("params".into(), monitor.params.clone());
        }
        if let Some(interval) = push.interval {
            params.insert("interval".into(), (interval.as_millis() as u64).into());
        }
        if let Some(event) = &push.event {
            params.insert("event".into(), Value::String(event.clone()));
        }

        let result = self
            .transport
            .call_value(&monitor.url, RpcRequest::new("registerPush", params))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    // ── Persistence ────────────────────────────────────────────

    /// Write the monitor into its agent's `_monitors` map, replacing any
    /// record with the same id.
    pub async fn store(&self, monitor: &Monitor) -> Result<()> {
        let handle = self.resolver.resolve_agent(&monitor.agent_id)?;
        let record = serde_json::to_value(monitor)?;
        update_with_retry(handle.state.as_ref(), MONITORS_KEY, &self.policy, |current| {
            let mut map = monitor_map(current)?;
            if map.get(&monitor.id) == Some(&record) {
                return Ok(None);
            }
            map.insert(monitor.id.clone(), record.clone());
            Ok(Some(Value::Object(map)))
        })
        .await?;
        debug!(agent_id = %monitor.agent_id, monitor_id = %monitor.id, "monitor stored");
        Ok(())
    }

    /// Remove the monitor, cancel its poll tasks and unregister its pushes.
    /// An absent owning agent is logged and ignored.
    pub async fn delete(&self, monitor: &Monitor) -> Result<()> {
        self.caches.remove(&monitor.id);
        let handle = match self.resolver.resolve_agent(&monitor.agent_id) {
            Ok(handle) => handle,
            Err(AgoraError::NotFound(_)) => {
                warn!(
                    agent_id = %monitor.agent_id,
                    monitor_id = %monitor.id,
                    "owning agent not found, nothing to delete"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for task_id in &monitor.scheduler_ids {
            if let Err(e) = handle.scheduler.cancel(task_id) {
                warn!(monitor_id = %monitor.id, task_id = %task_id, error = %e, "failed to cancel poll");
            }
        }
        for push_id in &monitor.remote_ids {
            let mut params = Params::new();
            params.insert("pushId".into(), Value::String(push_id.clone()));
            if let Err(e) = self
                .transport
                .call_value(&monitor.url, RpcRequest::new("unregisterPush", params))
                .await
            {
                warn!(monitor_id = %monitor.id, push_id = %push_id, error = %e, "failed to unregister push");
            }
        }

        let removed =
            update_with_retry(handle.state.as_ref(), MONITORS_KEY, &self.policy, |current| {
                let mut map = monitor_map(current)?;
                if map.remove(&monitor.id).is_none() {
                    return Ok(None);
                }
                Ok(Some(Value::Object(map)))
            })
            .await?;
        info!(agent_id = %monitor.agent_id, monitor_id = %monitor.id, removed, "monitor deleted");
        Ok(())
    }

    /// Look up and delete a monitor by id. Returns whether it existed.
    pub async fn delete_by_id(&self, agent_id: &str, monitor_id: &str) -> Result<bool> {
        match self.get_monitor_by_id(agent_id, monitor_id)? {
            Some(monitor) => {
                self.delete(&monitor).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The stored monitor, `None` if the agent has no monitor with that id.
    ///
    /// A monitor declaring a cache kind gets a fresh cache of that kind when
    /// none is live in this process.
    pub fn get_monitor_by_id(&self, agent_id: &str, monitor_id: &str) -> Result<Option<Monitor>> {
        let handle = self.resolver.resolve_agent(agent_id)?;
        let map = monitor_map(handle.state.get(MONITORS_KEY)?.as_ref())?;
        let Some(raw) = map.get(monitor_id) else {
            return Ok(None);
        };
        let monitor: Monitor = match serde_json::from_value(raw.clone()) {
            Ok(monitor) => monitor,
            Err(e) => {
                warn!(agent_id, monitor_id, error = %e, "malformed monitor record");
                return Ok(None);
            }
        };
        if let Some(kind) = &monitor.cache_type {
            self.caches.get_or_rebuild(&monitor.id, kind);
        }
        Ok(Some(monitor))
    }

    /// All monitors stored for `agent_id`, ordered by id.
    pub fn monitors(&self, agent_id: &str) -> Result<Vec<Monitor>> {
        let handle = self.resolver.resolve_agent(agent_id)?;
        let map = monitor_map(handle.state.get(MONITORS_KEY)?.as_ref())?;
        let mut monitors = Vec::with_capacity(map.len());
        for (id, raw) in map {
            match serde_json::from_value::<Monitor>(raw) {
                Ok(monitor) => monitors.push(monitor),
                Err(e) => warn!(agent_id, monitor_id = %id, error = %e, "malformed monitor record"),
            }
        }
        Ok(monitors)
    }

    /// Live cache of a monitor, if one is registered.
    pub fn cache(&self, monitor_id: &str) -> Option<Arc<dyn Cache>> {
        self.caches.get(monitor_id)
    }

    // ── Values ─────────────────────────────────────────────────

    fn require(&self, agent_id: &str, monitor_id: &str) -> Result<Monitor> {
        self.get_monitor_by_id(agent_id, monitor_id)?.ok_or_else(|| {
            AgoraError::NotFound(format!("monitor '{}' of agent '{}'", monitor_id, agent_id))
        })
    }

    async fn fetch(&self, monitor: &Monitor) -> Result<Value> {
        let request = RpcRequest::from_value(monitor.method.clone(), monitor.params.clone())?;
        self.transport.call_value(&monitor.url, request).await
    }

    /// The monitored value: from the cache when it is younger than
    /// `max_age`, otherwise fetched from the target (and cached).
    pub async fn get_result(
        &self,
        agent_id: &str,
        monitor_id: &str,
        max_age: Option<Duration>,
    ) -> Result<Value> {
        let monitor = self.require(agent_id, monitor_id)?;
        let cache = self.caches.get(&monitor.id);
        if let Some(value) = cache.as_ref().and_then(|c| c.get(max_age)) {
            debug!(monitor_id, "served from cache");
            return Ok(value);
        }
        let value = self.fetch(&monitor).await?;
        if let Some(cache) = cache {
            cache.store(value.clone());
        }
        Ok(value)
    }

    /// A poll tick: fetch the target and hand the value to the monitor.
    pub async fn handle_poll(&self, agent_id: &str, monitor_id: &str) -> Result<()> {
        let monitor = self.require(agent_id, monitor_id)?;
        let value = self.fetch(&monitor).await?;
        self.deliver(&monitor, value).await
    }

    /// A value pushed by the target. `push_id` must be one of the pushes
    /// the monitor registered.
    pub async fn handle_push(
        &self,
        agent_id: &str,
        monitor_id: &str,
        push_id: &str,
        result: Value,
    ) -> Result<()> {
        let monitor = self.require(agent_id, monitor_id)?;
        if !monitor.remote_ids.iter().any(|id| id == push_id) {
            warn!(agent_id, monitor_id, push_id, "rejected push from unknown registration");
            return Err(AgoraError::AccessDenied(format!(
                "push '{}' is not registered for monitor '{}'",
                push_id, monitor_id
            )));
        }
        self.deliver(&monitor, result).await
    }

    async fn deliver(&self, monitor: &Monitor, value: Value) -> Result<()> {
        if let Some(cache) = self.caches.get(&monitor.id) {
            cache.store(value.clone());
        }
        if let Some(callback) = &monitor.callback_method {
            let mut params = Params::new();
            params.insert("result".into(), value);
            self.resolver
                .invoke_local(&monitor.agent_id, callback, params)
                .await?;
        }
        Ok(())
    }
}

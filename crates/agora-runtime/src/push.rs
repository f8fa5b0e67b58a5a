//! Target side of push monitoring.
//!
//! A monitor asks its target to `registerPush`; the target keeps the request
//! under `_pushes` and, on a timer or on one of its own events, evaluates the
//! requested method and delivers `{monitorId, pushId, result}` back to the monitor.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use agora_core::{AgoraError, Callback, Params, Result, RpcRequest, TaskId};

use crate::agent::AgentContext;
use crate::persist::update_with_retry;

/// State key of the push map.
pub const PUSHES_KEY: &str = "_pushes";

/// Scheduled on the target for interval-driven pushes.
pub const PUSH_TICK_METHOD: &str = "onPushTick";

/// Callback the target subscribes to its own events for event-driven pushes.
pub const PUSH_EVENT_METHOD: &str = "onPushEvent";

/// A push registered on this agent by a remote monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRecord {
    pub push_id: String,
    pub callback_url: String,
    pub callback_method: String,
    pub monitor_id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Milliseconds between pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl PushRecord {
    /// Parse the arguments of a `registerPush` call.
    pub fn from_params(params: &Params) -> Result<Self> {
        let mut record: Self = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| AgoraError::invalid_params("registerPush", e.to_string()))?;
        record.task_id = None;
        Ok(record)
    }

    /// The request carrying `result` back to the monitor, tagged with the
    /// push id the monitor checks it against.
    pub fn delivery(&self, result: Value) -> RpcRequest {
        let mut params = Params::new();
        params.insert("monitorId".into(), Value::String(self.monitor_id.clone()));
        params.insert("pushId".into(), Value::String(self.push_id.clone()));
        params.insert("result".into(), result);
        RpcRequest::new(self.callback_method.clone(), params)
    }
}

fn push_map(value: Option<&Value>) -> Result<Map<String, Value>> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(AgoraError::State(format!(
            "{} is not a map: {}",
            PUSHES_KEY, other
        ))),
    }
}

/// The pushes registered on one agent.
pub struct PushRegistry<'a> {
    ctx: &'a AgentContext,
}

impl<'a> PushRegistry<'a> {
    pub fn new(ctx: &'a AgentContext) -> Self {
        Self { ctx }
    }

    pub fn all(&self) -> Result<Vec<PushRecord>> {
        let map = push_map(self.ctx.state().get(PUSHES_KEY)?.as_ref())?;
        let mut records = Vec::with_capacity(map.len());
        for (id, raw) in map {
            match serde_json::from_value(raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(agent_id = %self.ctx.id(), push_id = %id, error = %e, "malformed push record"),
            }
        }
        Ok(records)
    }

    pub fn get(&self, push_id: &str) -> Result<Option<PushRecord>> {
        Ok(self.all()?.into_iter().find(|r| r.push_id == push_id))
    }

    /// Pushes driven by `event`.
    pub fn for_event(&self, event: &str) -> Result<Vec<PushRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|r| r.event.as_deref() == Some(event))
            .collect())
    }

    /// Start pushing for `record`. Returns the remote ids the monitor
    /// records, currently just the push id.
    pub async fn register(&self, mut record: PushRecord) -> Result<Vec<String>> {
        if record.interval.is_none() && record.event.is_none() {
            return Err(AgoraError::invalid_params(
                "registerPush",
                "either 'interval' or 'event' is required",
            ));
        }

        if let Some(ms) = record.interval {
            let mut params = Params::new();
            params.insert("pushId".into(), Value::String(record.push_id.clone()));
            let task_id = self.ctx.scheduler().schedule(
                RpcRequest::new(PUSH_TICK_METHOD, params),
                Duration::from_millis(ms.max(1)),
            )?;
            record.task_id = Some(task_id);
        }
        if let Err(e) = self.activate(&record).await {
            self.roll_back(&record).await;
            return Err(e);
        }

        info!(
            agent_id = %self.ctx.id(),
            push_id = %record.push_id,
            monitor_id = %record.monitor_id,
            method = %record.method,
            interval_ms = ?record.interval,
            event = ?record.event,
            "push registered"
        );
        Ok(vec![record.push_id])
    }

    /// Subscribe to the push's event and persist the record, cancelling the
    /// task of any record it replaces.
    async fn activate(&self, record: &PushRecord) -> Result<()> {
        if let Some(event) = &record.event {
            let own = Callback::new(self.ctx.url()?, PUSH_EVENT_METHOD);
            self.ctx.add_subscriber(event, own).await?;
        }

        let value = serde_json::to_value(record)?;
        let mut replaced: Option<PushRecord> = None;
        update_with_retry(
            self.ctx.state().as_ref(),
            PUSHES_KEY,
            self.ctx.monitors().policy(),
            |current| {
                let mut map = push_map(current)?;
                replaced = map
                    .insert(record.push_id.clone(), value.clone())
                    .and_then(|old| serde_json::from_value(old).ok());
                Ok(Some(Value::Object(map)))
            },
        )
        .await?;
        if let Some(task_id) = replaced.and_then(|old| old.task_id) {
            self.ctx.scheduler().cancel(&task_id)?;
        }
        Ok(())
    }

    /// Undo a registration that was never persisted. Failures are logged.
    async fn roll_back(&self, record: &PushRecord) {
        if let Some(task_id) = &record.task_id {
            if let Err(e) = self.ctx.scheduler().cancel(task_id) {
                warn!(agent_id = %self.ctx.id(), push_id = %record.push_id, task_id = %task_id, error = %e, "failed to cancel push task");
            }
        }
        let Some(event) = &record.event else {
            return;
        };
        match self.for_event(event) {
            Ok(others) if others.is_empty() => {
                let unsubscribed = match self.ctx.url() {
                    Ok(url) => {
                        let own = Callback::new(url, PUSH_EVENT_METHOD);
                        self.ctx.subscriptions().unsubscribe(event, &own).await
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = unsubscribed {
                    warn!(agent_id = %self.ctx.id(), push_id = %record.push_id, event = %event, error = %e, "failed to drop push subscription");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(agent_id = %self.ctx.id(), push_id = %record.push_id, error = %e, "failed to list pushes");
            }
        }
    }

    /// Stop a push. Returns `false` when it was not registered.
    pub async fn unregister(&self, push_id: &str) -> Result<bool> {
        let mut removed: Option<PushRecord> = None;
        update_with_retry(
            self.ctx.state().as_ref(),
            PUSHES_KEY,
            self.ctx.monitors().policy(),
            |current| {
                let mut map = push_map(current)?;
                let Some(old) = map.remove(push_id) else {
                    removed = None;
                    return Ok(None);
                };
                removed = serde_json::from_value(old).ok();
                Ok(Some(Value::Object(map)))
            },
        )
        .await?;

        let Some(record) = removed else {
            return Ok(false);
        };
        if let Some(task_id) = &record.task_id {
            self.ctx.scheduler().cancel(task_id)?;
        }
        if let Some(event) = &record.event {
            if self.for_event(event)?.is_empty() {
                let own = Callback::new(self.ctx.url()?, PUSH_EVENT_METHOD);
                self.ctx.subscriptions().unsubscribe(event, &own).await?;
            }
        }
        info!(agent_id = %self.ctx.id(), push_id, "push unregistered");
        Ok(true)
    }
}

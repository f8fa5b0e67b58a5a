//! # Agents
//!
//! An agent type implements [`Agent`] for its behaviour and [`AgentType`]
//! for its registration data. Every instance receives an [`AgentContext`]
//! giving it its identity, its state scope and the messaging primitives.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use agora_core::{
    AgoraError, Callback, Params, Result, RpcRequest, Scheduler, StateStore, Transport,
};

use crate::capability::Capability;
use crate::monitor::{Monitor, ResultMonitorEngine};
use crate::subscription::SubscriptionManager;

/// Behaviour of an agent instance.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    fn description(&self) -> String {
        String::new()
    }

    fn version(&self) -> String {
        "1.0".to_string()
    }

    /// Called each time the host brings the instance into memory.
    async fn init(&self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }

    /// Run one of the capabilities the type declared. Arguments have already
    /// been checked against the capability table.
    async fn invoke(&self, ctx: &AgentContext, method: &str, params: Params) -> Result<Value>;
}

/// Static registration data of an agent type.
pub trait AgentType: Agent + Sized {
    /// Type name used in agent URLs.
    const TYPE_NAME: &'static str;

    /// Capabilities this type exposes, on top of the built-ins.
    fn capabilities() -> Vec<Capability>;

    fn create() -> Self;
}

/// Everything an agent instance can reach.
#[derive(Clone)]
pub struct AgentContext {
    agent_type: String,
    state: Arc<dyn StateStore>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    monitors: Arc<ResultMonitorEngine>,
    subscriptions: SubscriptionManager,
}

impl AgentContext {
    pub fn new(
        agent_type: impl Into<String>,
        state: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        monitors: Arc<ResultMonitorEngine>,
    ) -> Self {
        let subscriptions = SubscriptionManager::new(
            Arc::clone(&state),
            Arc::clone(&transport),
            *monitors.policy(),
        );
        Self {
            agent_type: agent_type.into(),
            state,
            transport,
            scheduler,
            monitors,
            subscriptions,
        }
    }

    pub fn id(&self) -> &str {
        self.state.owner_id()
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// The agent's own address. Fails when the host has no public URL.
    pub fn url(&self) -> Result<String> {
        self.state.owner_url()
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn monitors(&self) -> &Arc<ResultMonitorEngine> {
        &self.monitors
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    // ── Messaging ──────────────────────────────────────────────

    /// Call `method` on the agent at `url` and wait for its result.
    pub async fn send(&self, url: &str, method: &str, params: Value) -> Result<Value> {
        let request = RpcRequest::from_value(method, params)?;
        self.transport.call_value(url, request).await
    }

    /// Like [`send`](Self::send) for calls whose result is not needed.
    pub async fn send_void(&self, url: &str, method: &str, params: Value) -> Result<()> {
        self.send(url, method, params).await.map(|_| ())
    }

    /// Like [`send`](Self::send), deserializing the result.
    pub async fn send_as<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: Value,
    ) -> Result<T> {
        let value = self.send(url, method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fire-and-forget call. Once the target has handled it, its response
    /// arrives as an ordinary call to `callback_method` on this agent, with
    /// `{result}` or `{error}` as params.
    pub async fn send_async(
        &self,
        url: &str,
        method: &str,
        params: Value,
        callback_method: &str,
    ) -> Result<()> {
        let own_url = self.url()?;
        let request = RpcRequest::from_value(method, params)?.with_callback(own_url, callback_method);
        debug!(agent_id = %self.id(), target = url, method, callback_method, "async send");
        self.transport.deliver(url, request).await
    }

    // ── Events ─────────────────────────────────────────────────

    /// Notify the subscribers of `event`. The wildcard cannot be triggered.
    pub async fn trigger(&self, event: &str, params: Value) -> Result<usize> {
        self.subscriptions.trigger(event, params).await
    }

    /// Subscribe this agent's `callback_method` to `event` on the agent at `url`.
    pub async fn subscribe(&self, url: &str, event: &str, callback_method: &str) -> Result<()> {
        let params = json!({
            "event": event,
            "callbackUrl": self.url()?,
            "callbackMethod": callback_method,
        });
        self.send_void(url, "subscribe", params).await
    }

    pub async fn unsubscribe(&self, url: &str, event: &str, callback_method: &str) -> Result<()> {
        let params = json!({
            "event": event,
            "callbackUrl": self.url()?,
            "callbackMethod": callback_method,
        });
        self.send_void(url, "unsubscribe", params).await
    }

    /// Subscribe `callback` to one of this agent's own events.
    pub async fn add_subscriber(&self, event: &str, callback: Callback) -> Result<bool> {
        self.subscriptions.subscribe(event, callback).await
    }

    // ── Monitors ───────────────────────────────────────────────

    /// A new monitor owned by this agent. Attach features, then `store` it.
    pub fn create_monitor(
        &self,
        url: &str,
        method: &str,
        params: Value,
        callback_method: Option<&str>,
    ) -> Monitor {
        self.monitors
            .create(self.id(), url, method, params, callback_method)
    }

    /// Value of one of this agent's monitors, cached if fresh enough.
    pub async fn monitor_result(
        &self,
        monitor_id: &str,
        max_age: Option<std::time::Duration>,
    ) -> Result<Value> {
        self.monitors.get_result(self.id(), monitor_id, max_age).await
    }
}

/// Pull a required string argument.
pub fn str_param(params: &Params, method: &str, name: &str) -> Result<String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AgoraError::invalid_params(method, format!("'{}' must be a string", name)))
}

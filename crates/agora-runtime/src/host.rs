//! # Agent host
//!
//! Owns the registered agent types, the live instances and every shared
//! service (state backend, transport, scheduler, monitor engine). Requests
//! enter through [`AgentHost::dispatch`] / [`AgentHost::dispatch_to`], which
//! always answer with an [`RpcResponse`], never with an error.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use agora_config::AgoraConfig;
use agora_core::{
    AgentId, AgentUrl, AgoraError, Callback, Params, Result, RpcRequest, RpcResponse,
    StateFactory, StateStore, Transport,
};

use crate::agent::{Agent, AgentContext, AgentType, str_param};
use crate::capability::{CapabilityRegistry, Origin};
use crate::monitor::{AgentHandle, AgentResolver, CacheRegistry, ResultMonitorEngine};
use crate::persist::RetryPolicy;
use crate::push::{PushRecord, PushRegistry};
use crate::scheduler::IntervalScheduler;
use crate::transport::{HttpTransport, LocalTransport};

type Constructor = Arc<dyn Fn() -> Arc<dyn Agent> + Send + Sync>;

#[derive(Clone)]
struct TypeEntry {
    registry: Arc<CapabilityRegistry>,
    constructor: Constructor,
}

/// A live agent: behaviour, context and capability table.
pub struct AgentInstance {
    agent: Arc<dyn Agent>,
    ctx: AgentContext,
    registry: Arc<CapabilityRegistry>,
}

impl AgentInstance {
    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }
}

pub struct AgentHost {
    base_url: Option<String>,
    types: RwLock<HashMap<String, TypeEntry>>,
    instances: DashMap<AgentId, Arc<AgentInstance>>,
    states: Arc<dyn StateFactory>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<IntervalScheduler>,
    monitors: Arc<ResultMonitorEngine>,
}

impl AgentHost {
    /// Build a host. `states` should derive agent URLs from the same
    /// `host.public_url` as the config; `remote` carries calls to agents
    /// outside this host.
    pub fn new(
        config: &AgoraConfig,
        states: Arc<dyn StateFactory>,
        remote: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let base_url = config
            .host
            .public_url
            .as_ref()
            .map(|u| u.trim_end_matches('/').to_string());
        let policy = RetryPolicy::from_config(&config.monitor);
        let default_cache_kind = config.monitor.default_cache_kind.clone();

        Arc::new_cyclic(|weak: &Weak<AgentHost>| {
            let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new(
                weak.clone(),
                base_url.clone(),
                remote,
            ));
            let scheduler = IntervalScheduler::new(Arc::clone(&transport));
            let resolver = Arc::new(HostResolver { host: weak.clone() });
            let monitors = Arc::new(
                ResultMonitorEngine::new(
                    resolver,
                    Arc::clone(&transport),
                    Arc::new(CacheRegistry::new()),
                    policy,
                )
                .with_default_cache_kind(default_cache_kind),
            );
            AgentHost {
                base_url,
                types: RwLock::new(HashMap::new()),
                instances: DashMap::new(),
                states,
                transport,
                scheduler,
                monitors,
            }
        })
    }

    /// Build a host with the state backend and HTTP transport from config.
    pub fn from_config(config: &AgoraConfig) -> Result<Arc<Self>> {
        let states = agora_state::from_config(&config.state, config.host.public_url.clone())?;
        let remote = Arc::new(HttpTransport::from_config(&config.transport)?);
        Ok(Self::new(config, states, remote))
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn scheduler(&self) -> &Arc<IntervalScheduler> {
        &self.scheduler
    }

    pub fn monitors(&self) -> &Arc<ResultMonitorEngine> {
        &self.monitors
    }

    pub fn states(&self) -> &Arc<dyn StateFactory> {
        &self.states
    }

    /// Address of an agent on this host, if the host has a public URL.
    pub fn agent_url(&self, agent_type: &str, agent_id: &str) -> Option<String> {
        self.base_url
            .as_deref()
            .map(|base| AgentUrl::build(base, agent_type, agent_id))
    }

    // ── Types ──────────────────────────────────────────────────

    /// Register an agent type; its capability table is built here, once.
    pub fn register<A: AgentType>(&self) {
        let registry = Arc::new(CapabilityRegistry::new(A::TYPE_NAME, A::capabilities()));
        info!(
            agent_type = A::TYPE_NAME,
            capabilities = registry.len(),
            "agent type registered"
        );
        let constructor: Constructor = Arc::new(|| Arc::new(A::create()) as Arc<dyn Agent>);
        self.types.write().insert(
            A::TYPE_NAME.to_string(),
            TypeEntry {
                registry,
                constructor,
            },
        );
    }

    pub fn agent_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn capabilities(&self, agent_type: &str) -> Option<Arc<CapabilityRegistry>> {
        self.types
            .read()
            .get(agent_type)
            .map(|t| Arc::clone(&t.registry))
    }

    fn type_entry(&self, agent_type: &str) -> Result<TypeEntry> {
        self.types
            .read()
            .get(agent_type)
            .cloned()
            .ok_or_else(|| AgoraError::NotFound(format!("agent type '{}'", agent_type)))
    }

    // ── Instances ──────────────────────────────────────────────

    async fn instantiate(&self, state: Arc<dyn StateStore>) -> Result<Arc<AgentInstance>> {
        let agent_type = state.owner_type().to_string();
        let entry = self.type_entry(&agent_type)?;
        let scheduler = self.scheduler.for_agent(state.owner_url().ok());
        let ctx = AgentContext::new(
            agent_type,
            state,
            Arc::clone(&self.transport),
            scheduler,
            Arc::clone(&self.monitors),
        );
        let agent = (entry.constructor)();
        agent.init(&ctx).await?;
        Ok(Arc::new(AgentInstance {
            agent,
            ctx,
            registry: entry.registry,
        }))
    }

    fn cache_instance(&self, agent_id: &str, instance: Arc<AgentInstance>) -> Arc<AgentInstance> {
        let entry = self.instances.entry(agent_id.to_string()).or_insert(instance);
        Arc::clone(&*entry)
    }

    async fn create_instance(&self, agent_type: &str, agent_id: &str) -> Result<Arc<AgentInstance>> {
        self.type_entry(agent_type)?;
        let state = self.states.create(agent_type, agent_id)?;
        let instance = match self.instantiate(state).await {
            Ok(instance) => instance,
            Err(e) => {
                if let Err(cleanup) = self.states.delete(agent_id) {
                    warn!(agent_id, error = %cleanup, "failed to roll back agent state");
                }
                return Err(e);
            }
        };
        info!(agent_id, agent_type, "agent created");
        Ok(self.cache_instance(agent_id, instance))
    }

    async fn instance(&self, agent_id: &str) -> Result<Arc<AgentInstance>> {
        if let Some(instance) = self.instances.get(agent_id) {
            return Ok(Arc::clone(&*instance));
        }
        let state = self
            .states
            .open(agent_id)?
            .ok_or_else(|| AgoraError::NotFound(format!("agent '{}'", agent_id)))?;
        let instance = self.instantiate(state).await?;
        debug!(agent_id, "agent loaded");
        Ok(self.cache_instance(agent_id, instance))
    }

    async fn instance_or_create(
        &self,
        agent_type: &str,
        agent_id: &str,
    ) -> Result<Arc<AgentInstance>> {
        let instance = match self.instance(agent_id).await {
            Ok(instance) => instance,
            Err(AgoraError::NotFound(_)) => match self.create_instance(agent_type, agent_id).await {
                Ok(instance) => instance,
                // Lost a creation race: the agent exists now.
                Err(AgoraError::State(_)) if self.states.exists(agent_id).unwrap_or(false) => {
                    self.instance(agent_id).await?
                }
                Err(e) => return Err(e),
            },
            Err(e) => return Err(e),
        };
        if instance.ctx.agent_type() != agent_type {
            return Err(AgoraError::NotFound(format!(
                "agent '{}' is a {}, not a {}",
                agent_id,
                instance.ctx.agent_type(),
                agent_type
            )));
        }
        Ok(instance)
    }

    /// Create a new agent. Fails if the type is unknown or the id is taken.
    pub async fn create_agent(&self, agent_type: &str, agent_id: &str) -> Result<AgentContext> {
        Ok(self.create_instance(agent_type, agent_id).await?.ctx.clone())
    }

    /// Context of an existing agent, loading it from state if needed.
    pub async fn resolve_agent(&self, agent_id: &str) -> Result<AgentContext> {
        Ok(self.instance(agent_id).await?.ctx.clone())
    }

    /// Context of an agent, creating it on first use.
    pub async fn resolve_or_create(&self, agent_type: &str, agent_id: &str) -> Result<AgentContext> {
        Ok(self
            .instance_or_create(agent_type, agent_id)
            .await?
            .ctx
            .clone())
    }

    /// Deregister an agent: delete its monitors, stop its scheduled tasks
    /// and drop its state. Returns whether it existed.
    pub async fn delete_agent(&self, agent_id: &str) -> Result<bool> {
        let Some(state) = self.states.open(agent_id)? else {
            self.instances.remove(agent_id);
            return Ok(false);
        };

        match self.monitors.monitors(agent_id) {
            Ok(monitors) => {
                for monitor in monitors {
                    if let Err(e) = self.monitors.delete(&monitor).await {
                        warn!(agent_id, monitor_id = %monitor.id, error = %e, "failed to delete monitor");
                    }
                }
            }
            Err(e) => warn!(agent_id, error = %e, "failed to list monitors"),
        }
        if let Ok(url) = state.owner_url() {
            let cancelled = self.scheduler.cancel_agent(&url);
            debug!(agent_id, cancelled, "scheduled tasks cancelled");
        }

        self.instances.remove(agent_id);
        self.states.delete(agent_id)?;
        info!(agent_id, "agent deleted");
        Ok(true)
    }

    /// Deregister `agent_id` only when it is stored as `agent_type`. A
    /// mismatch reports the agent as absent.
    pub async fn delete_agent_of(&self, agent_type: &str, agent_id: &str) -> Result<bool> {
        match self.states.open(agent_id)? {
            Some(state) if state.owner_type() != agent_type => {
                debug!(agent_id, agent_type, stored_type = %state.owner_type(), "delete refused for another type");
                Ok(false)
            }
            _ => self.delete_agent(agent_id).await,
        }
    }

    fn handle(&self, agent_id: &str) -> Result<AgentHandle> {
        if let Some(instance) = self.instances.get(agent_id) {
            let ctx = &instance.ctx;
            return Ok(AgentHandle {
                agent_id: agent_id.to_string(),
                agent_type: ctx.agent_type().to_string(),
                state: Arc::clone(ctx.state()),
                scheduler: Arc::clone(ctx.scheduler()),
            });
        }
        let state = self
            .states
            .open(agent_id)?
            .ok_or_else(|| AgoraError::NotFound(format!("agent '{}'", agent_id)))?;
        Ok(AgentHandle {
            agent_id: agent_id.to_string(),
            agent_type: state.owner_type().to_string(),
            scheduler: self.scheduler.for_agent(state.owner_url().ok()),
            state,
        })
    }

    // ── Dispatch ───────────────────────────────────────────────

    /// Handle a request for an existing agent.
    pub async fn dispatch(
        self: &Arc<Self>,
        agent_id: &str,
        request: RpcRequest,
        origin: Origin,
    ) -> RpcResponse {
        let id = request.id.clone();
        let response = match self.instance(agent_id).await {
            Ok(instance) => self.dispatch_instance(instance, request, origin).await,
            Err(e) => RpcResponse::from_result(Err(e)),
        };
        response.with_id(id)
    }

    /// Handle a request addressed by type and id, creating the agent on
    /// first use.
    pub async fn dispatch_to(
        self: &Arc<Self>,
        agent_type: &str,
        agent_id: &str,
        request: RpcRequest,
        origin: Origin,
    ) -> RpcResponse {
        let id = request.id.clone();
        let response = match self.instance_or_create(agent_type, agent_id).await {
            Ok(instance) => self.dispatch_instance(instance, request, origin).await,
            Err(e) => RpcResponse::from_result(Err(e)),
        };
        response.with_id(id)
    }

    async fn dispatch_instance(
        self: &Arc<Self>,
        instance: Arc<AgentInstance>,
        request: RpcRequest,
        origin: Origin,
    ) -> RpcResponse {
        let RpcRequest {
            method,
            params,
            callback,
            ..
        } = request;

        let Some(route) = callback else {
            let result = self.invoke(&instance, &method, params, origin).await;
            if let Err(e) = &result {
                debug!(agent_id = %instance.ctx.id(), method = %method, error = %e, "call failed");
            }
            return RpcResponse::from_result(result);
        };

        // Answer now; the result travels to the callback route later.
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let response =
                RpcResponse::from_result(host.invoke(&instance, &method, params, origin).await);
            let reply = RpcRequest::new(route.method.clone(), response.to_callback_params());
            if let Err(e) = host.transport.deliver(&route.url, reply).await {
                warn!(
                    agent_id = %instance.ctx.id(),
                    method = %method,
                    callback_url = %route.url,
                    error = %e,
                    "failed to deliver async response"
                );
            }
        });
        RpcResponse::ok(Value::Null)
    }

    /// Call `method` on an agent as the host, private capabilities included.
    pub async fn call_local(&self, agent_id: &str, method: &str, params: Params) -> Result<Value> {
        let instance = self.instance(agent_id).await?;
        self.invoke(&instance, method, params, Origin::Local).await
    }

    fn invoke<'a>(
        &'a self,
        instance: &'a AgentInstance,
        method: &'a str,
        params: Params,
        origin: Origin,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            instance.registry.resolve(method, &params, origin)?;
            debug!(agent_id = %instance.ctx.id(), method, ?origin, "invoke");
            if instance.registry.is_builtin(method) {
                self.invoke_builtin(instance, method, params).await
            } else {
                instance.agent.invoke(&instance.ctx, method, params).await
            }
        }
        .boxed()
    }

    // ── Built-ins ──────────────────────────────────────────────

    async fn invoke_builtin(
        &self,
        instance: &AgentInstance,
        method: &str,
        params: Params,
    ) -> Result<Value> {
        let ctx = &instance.ctx;
        match method {
            "getId" => Ok(ctx.id().into()),
            "getType" => Ok(ctx.agent_type().into()),
            "getUrl" => Ok(ctx.url()?.into()),
            "getDescription" => Ok(instance.agent.description().into()),
            "getVersion" => Ok(instance.agent.version().into()),
            "getMethods" => {
                let structured = params
                    .get("asJSON")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(Value::Array(instance.registry.list(structured)))
            }
            "subscribe" | "unsubscribe" => {
                let event = str_param(&params, method, "event")?;
                let callback = Callback::new(
                    str_param(&params, method, "callbackUrl")?,
                    str_param(&params, method, "callbackMethod")?,
                );
                if method == "subscribe" {
                    ctx.subscriptions().subscribe(&event, callback).await?;
                } else {
                    ctx.subscriptions().unsubscribe(&event, &callback).await?;
                }
                Ok(Value::Null)
            }
            "registerPush" => {
                let record = PushRecord::from_params(&params)?;
                let ids = PushRegistry::new(ctx).register(record).await?;
                Ok(json!(ids))
            }
            "unregisterPush" => {
                let push_id = str_param(&params, method, "pushId")?;
                PushRegistry::new(ctx).unregister(&push_id).await?;
                Ok(Value::Null)
            }
            "onPushTick" => {
                let push_id = str_param(&params, method, "pushId")?;
                let record = PushRegistry::new(ctx)
                    .get(&push_id)?
                    .ok_or_else(|| AgoraError::NotFound(format!("push '{}'", push_id)))?;
                self.push_result(instance, &record).await?;
                Ok(Value::Null)
            }
            "onPushEvent" => {
                let event = str_param(&params, method, "event")?;
                for record in PushRegistry::new(ctx).for_event(&event)? {
                    if let Err(e) = self.push_result(instance, &record).await {
                        warn!(agent_id = %ctx.id(), push_id = %record.push_id, error = %e, "push failed");
                    }
                }
                Ok(Value::Null)
            }
            "onMonitorPoll" => {
                let monitor_id = str_param(&params, method, "monitorId")?;
                self.monitors.handle_poll(ctx.id(), &monitor_id).await?;
                Ok(Value::Null)
            }
            "onMonitorPush" => {
                let monitor_id = str_param(&params, method, "monitorId")?;
                let push_id = str_param(&params, method, "pushId")?;
                let result = params.get("result").cloned().unwrap_or(Value::Null);
                self.monitors
                    .handle_push(ctx.id(), &monitor_id, &push_id, result)
                    .await?;
                Ok(Value::Null)
            }
            other => Err(AgoraError::MethodNotFound(format!(
                "{}.{}",
                ctx.agent_type(),
                other
            ))),
        }
    }

    /// Evaluate a push's method on this agent and send the value to the monitor.
    async fn push_result(&self, instance: &AgentInstance, record: &PushRecord) -> Result<()> {
        let params = match &record.params {
            Value::Object(map) => map.clone(),
            Value::Null => Params::new(),
            other => {
                return Err(AgoraError::invalid_params(
                    &record.method,
                    format!("push params must be an object, got {}", other),
                ));
            }
        };
        let result = self
            .invoke(instance, &record.method, params, Origin::Local)
            .await?;
        self.transport
            .deliver(&record.callback_url, record.delivery(result))
            .await
    }
}

/// The host as seen by the monitor engine.
struct HostResolver {
    host: Weak<AgentHost>,
}

impl HostResolver {
    fn host(&self) -> Result<Arc<AgentHost>> {
        self.host
            .upgrade()
            .ok_or_else(|| AgoraError::State("host has shut down".into()))
    }
}

#[async_trait]
impl AgentResolver for HostResolver {
    fn resolve_agent(&self, agent_id: &str) -> Result<AgentHandle> {
        self.host()?.handle(agent_id)
    }

    async fn invoke_local(&self, agent_id: &str, method: &str, params: Params) -> Result<Value> {
        self.host()?.call_local(agent_id, method, params).await
    }
}

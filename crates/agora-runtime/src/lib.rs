//! # agora-runtime
//!
//! The agent runtime: hosts agents, dispatches requests against their
//! capability tables, fans events out to subscribers and keeps result
//! monitors up to date.
//!
//! ## Architecture
//!
//! ```text
//!        HTTP ingress / LocalTransport
//!                     │ RpcRequest
//!                     ▼
//!              ┌──────────────┐
//!              │  AgentHost   │  ← type table, instances, dispatch
//!              └──────┬───────┘
//!                     │ CapabilityRegistry::resolve
//!         ┌───────────┼────────────────┐
//!         ▼           ▼                ▼
//!   ┌──────────┐ ┌──────────────┐ ┌──────────────┐
//!   │  Agent   │ │ Subscription │ │ ResultMonitor│
//!   │ (invoke) │ │   Manager    │ │    Engine    │
//!   └──────────┘ └──────┬───────┘ └──────┬───────┘
//!                       │   CAS           │  CAS, Scheduler, Transport
//!                       ▼                 ▼
//!                  ┌─────────────────────────┐
//!                  │   StateStore (per agent) │
//!                  └─────────────────────────┘
//! ```

pub mod agent;
pub mod capability;
pub mod host;
pub mod mock;
pub mod monitor;
pub mod persist;
pub mod push;
pub mod scheduler;
pub mod subscription;
pub mod transport;

pub use agent::{Agent, AgentContext, AgentType, str_param};
pub use capability::{
    Access, Capability, CapabilityRegistry, Origin, ParamSpec, TypeTag, builtin_capabilities,
};
pub use host::{AgentHost, AgentInstance};
pub use monitor::{
    AgentHandle, AgentResolver, Cache, CacheRegistry, LatestValueCache, Monitor, MonitorFeature,
    Poll, Push, ResultMonitorEngine,
};
pub use persist::{RetryPolicy, update_with_retry};
pub use push::{PushRecord, PushRegistry};
pub use scheduler::IntervalScheduler;
pub use subscription::SubscriptionManager;
pub use transport::{HttpTransport, LocalTransport};

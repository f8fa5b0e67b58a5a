//! # agora-core
//!
//! Core types, traits, and primitives for the Agora agent runtime.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: the error taxonomy, the logical request/response shapes, and the
//! contracts of the collaborators the runtime consumes (state, scheduler,
//! transport).

pub mod error;
pub mod event;
pub mod rpc;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod types;

pub use error::{AgoraError, Result};
pub use event::{EventNotification, WILDCARD_EVENT, subscription_key};
pub use rpc::{CallbackRoute, Params, RpcError, RpcRequest, RpcResponse, codes};
pub use scheduler::Scheduler;
pub use state::{StateFactory, StateStore};
pub use transport::Transport;
pub use types::*;

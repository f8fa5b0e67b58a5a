//! # agora-state
//!
//! Reference backends for per-agent state:
//!
//! - **Memory**: `HashMap` behind a mutex, for tests and ephemeral hosts.
//! - **SQLite**: one table of `(agent_id, key) → JSON` rows, durable across restarts.
//!
//! Both implement the conditional-update primitive the runtime builds its
//! optimistic concurrency on.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use agora_config::StateConfig;
use agora_core::{AgoraError, StateFactory};

pub use memory::{MemoryState, MemoryStateFactory};
pub use sqlite::{SqliteState, SqliteStateFactory};

/// Build the backend selected by `[state]` in the config.
pub fn from_config(
    config: &StateConfig,
    base_url: Option<String>,
) -> agora_core::Result<Arc<dyn StateFactory>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStateFactory::new(base_url))),
        "sqlite" => {
            let path = config.path.as_deref().ok_or_else(|| {
                AgoraError::Config("state.path is required for the sqlite backend".into())
            })?;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Ok(Arc::new(SqliteStateFactory::open(path, base_url)?))
        }
        other => Err(AgoraError::Config(format!("unknown state backend '{}'", other))),
    }
}

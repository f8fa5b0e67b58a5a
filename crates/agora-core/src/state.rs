use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

/// Key/value storage scoped to a single agent.
///
/// `conditional_update` is the only primitive the runtime relies on for
/// concurrent mutation; it must be atomic and linearizable per key.
pub trait StateStore: Send + Sync {
    /// Identity of the agent owning this scope.
    fn owner_id(&self) -> &str;

    /// Type name recorded when the scope was created.
    fn owner_type(&self) -> &str;

    /// Routable address of the owning agent. Fails when the scope is not
    /// bound to a public address.
    fn owner_url(&self) -> Result<String>;

    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn put(&self, key: &str, value: Value) -> Result<()>;

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn remove(&self, key: &str) -> Result<()>;

    /// Replace the value under `key` with `new_value` only if it currently
    /// equals `expected` (`None` meaning "absent"). Returns `false` on mismatch.
    fn conditional_update(&self, key: &str, new_value: Value, expected: Option<&Value>)
    -> Result<bool>;
}

impl dyn StateStore + '_ {
    /// Typed read; a stored value of the wrong shape is a serialization error.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn put_as<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.put(key, serde_json::to_value(value)?)
    }
}

/// Creates, opens and deletes per-agent [`StateStore`] scopes.
pub trait StateFactory: Send + Sync {
    /// Create a new scope. Fails if one already exists for `agent_id`.
    fn create(&self, agent_type: &str, agent_id: &str) -> Result<Arc<dyn StateStore>>;

    /// Open an existing scope, `None` if the agent is unknown.
    fn open(&self, agent_id: &str) -> Result<Option<Arc<dyn StateStore>>>;

    fn exists(&self, agent_id: &str) -> Result<bool> {
        Ok(self.open(agent_id)?.is_some())
    }

    /// Drop a scope and everything stored in it. Unknown ids are a no-op.
    fn delete(&self, agent_id: &str) -> Result<()>;
}

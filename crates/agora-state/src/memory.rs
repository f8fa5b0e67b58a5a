use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use agora_core::{AgentUrl, AgoraError, StateFactory, StateStore};

/// In-memory agent state. Lost when the process exits.
pub struct MemoryState {
    agent_id: String,
    agent_type: String,
    base_url: Option<String>,
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryState {
    pub fn new(agent_type: &str, agent_id: &str, base_url: Option<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            agent_type: agent_type.to_string(),
            base_url,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl StateStore for MemoryState {
    fn owner_id(&self) -> &str {
        &self.agent_id
    }

    fn owner_type(&self) -> &str {
        &self.agent_type
    }

    fn owner_url(&self) -> agora_core::Result<String> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            AgoraError::Unbound(format!("agent '{}' has no public URL", self.agent_id))
        })?;
        Ok(AgentUrl::build(base, &self.agent_type, &self.agent_id))
    }

    fn get(&self, key: &str) -> agora_core::Result<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> agora_core::Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn has(&self, key: &str) -> agora_core::Result<bool> {
        Ok(self.entries.lock().contains_key(key))
    }

    fn remove(&self, key: &str) -> agora_core::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn conditional_update(
        &self,
        key: &str,
        new_value: Value,
        expected: Option<&Value>,
    ) -> agora_core::Result<bool> {
        let mut entries = self.entries.lock();
        if entries.get(key) != expected {
            debug!(agent_id = %self.agent_id, key, "conditional update rejected");
            return Ok(false);
        }
        entries.insert(key.to_string(), new_value);
        Ok(true)
    }
}

/// Hands out [`MemoryState`] scopes, one per agent id.
#[derive(Clone, Default)]
pub struct MemoryStateFactory {
    base_url: Option<String>,
    scopes: Arc<RwLock<HashMap<String, Arc<MemoryState>>>>,
}

impl MemoryStateFactory {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url,
            scopes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Ids of all agents with a live scope.
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scopes.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl StateFactory for MemoryStateFactory {
    fn create(&self, agent_type: &str, agent_id: &str) -> agora_core::Result<Arc<dyn StateStore>> {
        let mut scopes = self.scopes.write();
        if scopes.contains_key(agent_id) {
            return Err(AgoraError::State(format!(
                "agent '{}' already exists",
                agent_id
            )));
        }
        let state = Arc::new(MemoryState::new(agent_type, agent_id, self.base_url.clone()));
        scopes.insert(agent_id.to_string(), Arc::clone(&state));
        Ok(state)
    }

    fn open(&self, agent_id: &str) -> agora_core::Result<Option<Arc<dyn StateStore>>> {
        Ok(self
            .scopes
            .read()
            .get(agent_id)
            .map(|s| Arc::clone(s) as Arc<dyn StateStore>))
    }

    fn exists(&self, agent_id: &str) -> agora_core::Result<bool> {
        Ok(self.scopes.read().contains_key(agent_id))
    }

    fn delete(&self, agent_id: &str) -> agora_core::Result<()> {
        self.scopes.write().remove(agent_id);
        Ok(())
    }
}

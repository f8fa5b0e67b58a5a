use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use agora_core::{AgoraError, Result};

/// Kind tag of the built-in [`LatestValueCache`].
pub const LATEST_CACHE_KIND: &str = "latest";

/// Last known value of a monitored capability.
pub trait Cache: Send + Sync {
    /// Tag persisted on the monitor so the cache can be rebuilt later.
    fn kind(&self) -> &str;

    fn store(&self, value: Value);

    /// The cached value, if any and not older than `max_age`.
    fn get(&self, max_age: Option<Duration>) -> Option<Value>;

    fn updated_at(&self) -> Option<DateTime<Utc>>;
}

/// Keeps only the most recent value and when it arrived.
#[derive(Default)]
pub struct LatestValueCache {
    entry: Mutex<Option<(Value, DateTime<Utc>)>>,
}

impl LatestValueCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for LatestValueCache {
    fn kind(&self) -> &str {
        LATEST_CACHE_KIND
    }

    fn store(&self, value: Value) {
        *self.entry.lock() = Some((value, Utc::now()));
    }

    fn get(&self, max_age: Option<Duration>) -> Option<Value> {
        let entry = self.entry.lock();
        let (value, at) = entry.as_ref()?;
        if let Some(max_age) = max_age {
            let age = (Utc::now() - *at).to_std().unwrap_or_default();
            if age > max_age {
                return None;
            }
        }
        Some(value.clone())
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.entry.lock().as_ref().map(|(_, at)| *at)
    }
}

/// Builds an empty cache of one kind.
pub type CacheConstructor = Arc<dyn Fn() -> Arc<dyn Cache> + Send + Sync>;

/// Live caches by monitor id, plus the constructors for every known kind.
///
/// Caches are never persisted; a monitor only records its cache kind and the
/// registry rebuilds an empty cache of that kind on demand.
pub struct CacheRegistry {
    kinds: RwLock<HashMap<String, CacheConstructor>>,
    caches: Mutex<HashMap<String, Arc<dyn Cache>>>,
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheRegistry {
    /// A registry knowing the `"latest"` kind.
    pub fn new() -> Self {
        let registry = Self {
            kinds: RwLock::new(HashMap::new()),
            caches: Mutex::new(HashMap::new()),
        };
        registry.register_kind(LATEST_CACHE_KIND, Arc::new(|| {
            Arc::new(LatestValueCache::new()) as Arc<dyn Cache>
        }));
        registry
    }

    pub fn register_kind(&self, kind: impl Into<String>, constructor: CacheConstructor) {
        self.kinds.write().insert(kind.into(), constructor);
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.kinds.read().contains_key(kind)
    }

    /// A new, empty cache of `kind`.
    pub fn build(&self, kind: &str) -> Result<Arc<dyn Cache>> {
        let constructor = self
            .kinds
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| AgoraError::NotFound(format!("cache kind '{}'", kind)))?;
        Ok(constructor())
    }

    pub fn insert(&self, monitor_id: &str, cache: Arc<dyn Cache>) {
        self.caches.lock().insert(monitor_id.to_string(), cache);
    }

    pub fn get(&self, monitor_id: &str) -> Option<Arc<dyn Cache>> {
        self.caches.lock().get(monitor_id).cloned()
    }

    /// The live cache of `monitor_id`, building one of `kind` if none is
    /// registered. Unknown kinds are logged and yield `None`.
    pub fn get_or_rebuild(&self, monitor_id: &str, kind: &str) -> Option<Arc<dyn Cache>> {
        if let Some(cache) = self.get(monitor_id) {
            return Some(cache);
        }
        let cache = match self.build(kind) {
            Ok(cache) => cache,
            Err(_) => {
                warn!(monitor_id, kind, "unknown cache kind, monitor has no cache");
                return None;
            }
        };
        debug!(monitor_id, kind, "rebuilt cache");
        let mut caches = self.caches.lock();
        // A concurrent rebuild may have won; keep the first one.
        Some(Arc::clone(
            caches.entry(monitor_id.to_string()).or_insert(cache),
        ))
    }

    pub fn remove(&self, monitor_id: &str) -> Option<Arc<dyn Cache>> {
        self.caches.lock().remove(monitor_id)
    }

    pub fn len(&self) -> usize {
        self.caches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.lock().is_empty()
    }
}

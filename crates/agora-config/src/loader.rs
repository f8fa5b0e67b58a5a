use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::AgoraConfig;

/// Loads the Agora configuration and keeps a shared snapshot of it.
pub struct ConfigLoader {
    config: Arc<RwLock<AgoraConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > AGORA_CONFIG env > ~/.agora/agora.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("AGORA_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agora")
            .join("agora.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> agora_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            AgoraConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Validate config: log warnings, fail on errors
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(agora_core::AgoraError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Parse a config string (no env overrides, no validation).
    pub fn parse(raw: &str) -> agora_core::Result<AgoraConfig> {
        toml::from_str::<AgoraConfig>(raw)
            .map_err(|e| agora_core::AgoraError::Config(format!("failed to parse config: {}", e)))
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> AgoraConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<AgoraConfig>> {
        Arc::clone(&self.config)
    }

    /// Path the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> agora_core::Result<()> {
        if !self.config_path.exists() {
            return Err(agora_core::AgoraError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read(&self.config_path)?);
        new_config.validate().map_err(agora_core::AgoraError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    fn read(path: &Path) -> agora_core::Result<AgoraConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<AgoraConfig>(&raw).map_err(|e| {
            agora_core::AgoraError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (AGORA_PUBLIC_URL, AGORA_STATE_BACKEND, etc.)
    fn apply_env_overrides(mut config: AgoraConfig) -> AgoraConfig {
        if let Ok(v) = std::env::var("AGORA_PUBLIC_URL") {
            config.host.public_url = Some(v);
        }
        if let Ok(v) = std::env::var("AGORA_LISTEN") {
            config.host.listen = v;
        }
        if let Ok(v) = std::env::var("AGORA_STATE_BACKEND") {
            config.state.backend = v;
        }
        if let Ok(v) = std::env::var("AGORA_STATE_PATH") {
            config.state.path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("AGORA_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }
}

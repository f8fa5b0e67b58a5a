use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, mapped from `agora.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgoraConfig {
    pub host: HostConfig,
    pub state: StateConfig,
    pub monitor: MonitorConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

// ── Host ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Base address agents derive their URLs from, e.g. "http://localhost:3800".
    /// Without it agents cannot compute their own address.
    pub public_url: Option<String>,
    /// Address the HTTP ingress binds to.
    pub listen: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            public_url: None,
            listen: "127.0.0.1:3800".into(),
        }
    }
}

// ── State ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// "memory" or "sqlite".
    pub backend: String,
    /// Database file for the sqlite backend.
    pub path: Option<PathBuf>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            path: None,
        }
    }
}

// ── Monitor ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Conditional-update attempts before a write gives up with a contention error.
    pub cas_max_attempts: u32,
    /// Backoff before the second attempt; doubles per retry.
    pub cas_initial_backoff_ms: u64,
    /// Upper bound of the backoff between attempts.
    pub cas_max_backoff_ms: u64,
    /// Cache kind used by `attach_default_cache`.
    pub default_cache_kind: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cas_max_attempts: 32,
            cas_initial_backoff_ms: 2,
            cas_max_backoff_ms: 100,
            default_cache_kind: "latest".into(),
        }
    }
}

// ── Transport ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Timeout for outgoing HTTP calls.
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single finding produced by [`AgoraConfig::validate`].
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

impl AgoraConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Public URL ───
        match &self.host.public_url {
            None => warnings.push(ConfigWarning {
                field: "host.public_url".into(),
                message: "no public URL, so agents cannot send, subscribe or be called back".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 'http://localhost:3800'".into()),
            }),
            Some(url) if url::Url::parse(url).is_err() => warnings.push(ConfigWarning {
                field: "host.public_url".into(),
                message: format!("'{}' is not a valid URL", url),
                severity: WarningSeverity::Error,
                hint: None,
            }),
            Some(_) => {}
        }

        // ── Listen address ───
        if self.host.listen.is_empty() {
            warnings.push(ConfigWarning {
                field: "host.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '127.0.0.1:3800'".into()),
            });
        }

        // ── State backend ───
        let valid_backends = ["memory", "sqlite"];
        if !valid_backends.contains(&self.state.backend.as_str()) {
            warnings.push(ConfigWarning {
                field: "state.backend".into(),
                message: format!("unknown state backend '{}'", self.state.backend),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", valid_backends.join(", "))),
            });
        } else if self.state.backend == "sqlite" && self.state.path.is_none() {
            warnings.push(ConfigWarning {
                field: "state.path".into(),
                message: "sqlite backend requires a database path".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set state.path to e.g. '~/.agora/state.db'".into()),
            });
        } else if self.state.backend == "memory" {
            warnings.push(ConfigWarning {
                field: "state.backend".into(),
                message: "memory backend, agent state is lost on restart".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── CAS retry budget ───
        if self.monitor.cas_max_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "monitor.cas_max_attempts".into(),
                message: "0 attempts, no state update could ever succeed".into(),
                severity: WarningSeverity::Error,
                hint: Some("A value between 8 and 64 is typical".into()),
            });
        }
        if self.monitor.cas_initial_backoff_ms > self.monitor.cas_max_backoff_ms {
            warnings.push(ConfigWarning {
                field: "monitor.cas_initial_backoff_ms".into(),
                message: format!(
                    "initial backoff {}ms exceeds max backoff {}ms",
                    self.monitor.cas_initial_backoff_ms, self.monitor.cas_max_backoff_ms
                ),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }
        if self.monitor.default_cache_kind.is_empty() {
            warnings.push(ConfigWarning {
                field: "monitor.default_cache_kind".into(),
                message: "default cache kind is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Use 'latest'".into()),
            });
        }

        // ── Transport ───
        if self.transport.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "transport.timeout_secs".into(),
                message: "timeout is 0, outgoing calls wait forever".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}

//! # agora-config
//!
//! Configuration system for the Agora runtime. Reads from `agora.toml` and
//! environment variables, in that precedence order.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::AgoraConfig;
pub use schema::{
    ConfigWarning, HostConfig, LoggingConfig, MonitorConfig, StateConfig, TransportConfig,
    WarningSeverity,
};

//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use mimigram_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT, MAX_BODY_SIZE};

/// Where collections are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// SQLite file at the platform data directory.
    DefaultPath,
    /// SQLite file at an explicit path.
    Path(PathBuf),
    /// Nothing is written to disk.
    Memory,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Env: `DATABASE_PATH` (a file path, or `:memory:`)
    /// Default: platform data directory.
    pub storage: StorageBackend,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Whether new accounts can be registered.
    /// Env: `REGISTRATION_OPEN` (true/false)
    /// Default: `true`
    pub registration_open: bool,

    /// Maximum request body in bytes. Images and voice clips are sent inline.
    /// Env: `MAX_BODY_SIZE`
    /// Default: 10 MiB
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            storage: StorageBackend::DefaultPath,
            instance_name: APP_NAME.to_string(),
            registration_open: true,
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.storage = match path.trim() {
                "" => StorageBackend::DefaultPath,
                ":memory:" => StorageBackend::Memory,
                other => StorageBackend::Path(PathBuf::from(other)),
            };
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(val) = lookup("REGISTRATION_OPEN") {
            config.registration_open = val != "false" && val != "0";
        }

        if let Some(val) = lookup("MAX_BODY_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_body_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BODY_SIZE, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.storage, StorageBackend::DefaultPath);
        assert!(config.registration_open);
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/chat.db"),
            ("REGISTRATION_OPEN", "false"),
            ("MAX_BODY_SIZE", "1024"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.storage, StorageBackend::Path("/tmp/chat.db".into()));
        assert!(!config.registration_open);
        assert_eq!(config.max_body_size, 1024);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[("HTTP_ADDR", "nope"), ("MAX_BODY_SIZE", "-1")]);
        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.max_body_size, MAX_BODY_SIZE);
    }

    #[test]
    fn test_memory_storage() {
        let config = config_from(&[("DATABASE_PATH", ":memory:")]);
        assert_eq!(config.storage, StorageBackend::Memory);
    }
}

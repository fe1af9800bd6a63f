//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use majlis_shared::constants::{DEFAULT_TX_ATTEMPTS, MAX_ACCOUNTS_PER_DEVICE};

/// Where documents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process memory; everything is lost on exit.
    Memory,
    /// SQLite file. `None` selects the platform data directory.
    Sqlite(Option<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Env: `DATABASE_PATH` (`:memory:` selects the in-memory backend)
    /// Default: SQLite in the platform data directory.
    pub backend: StoreBackend,

    /// Bearer token for `/admin/*`. `None` disables the admin API.
    /// Env: `ADMIN_TOKEN`
    pub admin_token: Option<String>,

    /// Env: `MAX_ACCOUNTS_PER_DEVICE`
    /// Default: `2`
    pub max_accounts_per_device: u32,

    /// Optimistic transaction attempts before a conflict is reported.
    /// Env: `TX_MAX_ATTEMPTS`
    /// Default: `5`
    pub tx_max_attempts: u32,

    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            backend: StoreBackend::Sqlite(None),
            admin_token: None,
            max_accounts_per_device: MAX_ACCOUNTS_PER_DEVICE,
            tx_max_attempts: DEFAULT_TX_ATTEMPTS,
            instance_name: "Majlis".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = get("DATABASE_PATH") {
            config.backend = match path.as_str() {
                "" => StoreBackend::Sqlite(None),
                ":memory:" => StoreBackend::Memory,
                _ => StoreBackend::Sqlite(Some(PathBuf::from(path))),
            };
        }

        if let Some(token) = get("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(n) = parse_positive(&get, "MAX_ACCOUNTS_PER_DEVICE") {
            config.max_accounts_per_device = n;
        }

        if let Some(n) = parse_positive(&get, "TX_MAX_ATTEMPTS") {
            config.tx_max_attempts = n;
        }

        if let Some(name) = get("INSTANCE_NAME") {
            config.instance_name = name;
        }

        config
    }
}

fn parse_positive<F>(get: &F, key: &str) -> Option<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = get(key)?;
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = lookup(&[]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.backend, StoreBackend::Sqlite(None));
        assert_eq!(config.max_accounts_per_device, 2);
        assert_eq!(config.tx_max_attempts, 5);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = lookup(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", ":memory:"),
            ("ADMIN_TOKEN", "secret"),
            ("TX_MAX_ATTEMPTS", "9"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.admin_token.as_deref(), Some("secret"));
        assert_eq!(config.tx_max_attempts, 9);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = lookup(&[
            ("HTTP_ADDR", "nope"),
            ("MAX_ACCOUNTS_PER_DEVICE", "0"),
            ("ADMIN_TOKEN", ""),
        ]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_accounts_per_device, 2);
        assert!(config.admin_token.is_none());
    }
}

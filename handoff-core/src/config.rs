use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct HandoffConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// `postgres://...` or `memory://` for the in-process store.
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

/// Server-side write/read path tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    pub duplicate_window_secs: u64,
    pub initial_window_secs: u64,
    pub initial_history_limit: u32,
    pub join_backdate_ms: i64,
    pub require_client_message_id: bool,
    pub average_handle_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            duplicate_window_secs: 5,
            initial_window_secs: 300,
            initial_history_limit: 200,
            join_backdate_ms: 1000,
            require_client_message_id: false,
            average_handle_secs: 120,
        }
    }
}

impl SyncConfig {
    pub fn duplicate_window_ms(&self) -> i64 {
        (self.duplicate_window_secs * 1000) as i64
    }

    pub fn initial_window_ms(&self) -> i64 {
        (self.initial_window_secs * 1000) as i64
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PushConfig {
    pub topic_capacity: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self { topic_capacity: 256 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    pub waiting_timeout_minutes: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            waiting_timeout_minutes: 30,
        }
    }
}

/// Poll loop settings for the sync cursor client.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    pub max_retries: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            request_timeout_secs: 8,
            backoff_base_ms: 500,
            backoff_max_secs: 30,
            max_retries: 4,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Read only the `[client]` table of a config file, so a client-side file
    /// needs no `[database]` section. A missing table means defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("HANDOFF").separator("__"))
            .build()?;
        match s.get::<ClientConfig>("client") {
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }
}

impl HandoffConfig {
    /// Load from a TOML file, with `HANDOFF__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("HANDOFF").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    /// In-memory configuration with all defaults, used by tests and demos.
    pub fn in_memory() -> Self {
        Self {
            service: ServiceConfig::default(),
            database: DatabaseConfig {
                url: "memory://".to_string(),
                max_connections: 1,
            },
            http: HttpConfig::default(),
            sync: SyncConfig::default(),
            push: PushConfig::default(),
            maintenance: MaintenanceConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

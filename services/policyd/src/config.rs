use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULT_SYNC_CHANNEL: &str = "casbin";
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "pg" => Ok(StorageBackend::Postgres),
            other => anyhow::bail!("unknown backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub bus: StorageBackend,
    pub channel: String,
    pub poll_timeout_ms: u64,
}

/// Policy daemon configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct PolicydConfig {
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub sync: SyncConfig,
}

#[derive(Debug, Default, Deserialize)]
struct PostgresOverride {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncOverride {
    bus: Option<StorageBackend>,
    channel: Option<String>,
    poll_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicydConfigOverride {
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresOverride>,
    sync: Option<SyncOverride>,
}

impl PolicydConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind = std::env::var("WARDEN_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse WARDEN_METRICS_BIND")?;
        let storage: StorageBackend = std::env::var("WARDEN_STORAGE")
            .unwrap_or_else(|_| "memory".to_string())
            .parse()
            .with_context(|| "parse WARDEN_STORAGE")?;
        let postgres = match std::env::var("WARDEN_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_number(
                    "WARDEN_POSTGRES_MAX_CONNECTIONS",
                    DEFAULT_MAX_CONNECTIONS,
                )?,
                acquire_timeout_ms: env_number(
                    "WARDEN_POSTGRES_ACQUIRE_TIMEOUT_MS",
                    DEFAULT_ACQUIRE_TIMEOUT_MS,
                )?,
            }),
            Err(_) => None,
        };
        let bus = match std::env::var("WARDEN_SYNC_BUS") {
            Ok(value) => value.parse().with_context(|| "parse WARDEN_SYNC_BUS")?,
            Err(_) => storage,
        };
        let sync = SyncConfig {
            bus,
            channel: std::env::var("WARDEN_SYNC_CHANNEL")
                .unwrap_or_else(|_| DEFAULT_SYNC_CHANNEL.to_string()),
            poll_timeout_ms: env_number("WARDEN_SYNC_POLL_TIMEOUT_MS", DEFAULT_POLL_TIMEOUT_MS)?,
        };
        Ok(Self {
            metrics_bind,
            storage,
            postgres,
            sync,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("WARDEN_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read WARDEN_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: PolicydConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse policyd config yaml")?;
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(pg) = override_cfg.postgres {
            let current = self.postgres.take();
            let url = pg
                .url
                .or_else(|| current.as_ref().map(|cfg| cfg.url.clone()))
                .context("postgres.url missing")?;
            self.postgres = Some(PostgresConfig {
                url,
                max_connections: pg
                    .max_connections
                    .or(current.as_ref().map(|cfg| cfg.max_connections))
                    .unwrap_or(DEFAULT_MAX_CONNECTIONS),
                acquire_timeout_ms: pg
                    .acquire_timeout_ms
                    .or(current.as_ref().map(|cfg| cfg.acquire_timeout_ms))
                    .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_MS),
            });
        }
        if let Some(sync) = override_cfg.sync {
            if let Some(value) = sync.bus {
                self.sync.bus = value;
            }
            if let Some(value) = sync.channel {
                self.sync.channel = value;
            }
            if let Some(value) = sync.poll_timeout_ms {
                self.sync.poll_timeout_ms = value;
            }
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sync.poll_timeout_ms)
    }
}

fn env_number<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value.parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 9] = [
        "WARDEN_METRICS_BIND",
        "WARDEN_STORAGE",
        "WARDEN_POSTGRES_URL",
        "WARDEN_POSTGRES_MAX_CONNECTIONS",
        "WARDEN_POSTGRES_ACQUIRE_TIMEOUT_MS",
        "WARDEN_SYNC_BUS",
        "WARDEN_SYNC_CHANNEL",
        "WARDEN_SYNC_POLL_TIMEOUT_MS",
        "WARDEN_CONFIG",
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let saved = KEYS
                .iter()
                .map(|key| (*key, std::env::var(key).ok()))
                .collect();
            for key in KEYS {
                unsafe {
                    std::env::remove_var(key);
                }
            }
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.saved {
                match value {
                    Some(value) => unsafe {
                        std::env::set_var(key, value);
                    },
                    None => unsafe {
                        std::env::remove_var(key);
                    },
                }
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_without_env() {
        let _guard = EnvGuard::clean();
        let config = PolicydConfig::from_env().expect("config");
        assert_eq!(config.metrics_bind.port(), 9090);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.postgres.is_none());
        assert_eq!(config.sync.bus, StorageBackend::Memory);
        assert_eq!(config.sync.channel, DEFAULT_SYNC_CHANNEL);
        assert_eq!(config.poll_timeout().as_millis(), 2_000);
    }

    #[test]
    #[serial]
    fn env_selects_postgres() {
        let guard = EnvGuard::clean();
        guard.set("WARDEN_STORAGE", "postgres");
        guard.set("WARDEN_POSTGRES_URL", "postgres://localhost/warden");
        guard.set("WARDEN_POSTGRES_MAX_CONNECTIONS", "3");
        guard.set("WARDEN_SYNC_CHANNEL", "policy");
        let config = PolicydConfig::from_env().expect("config");
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.sync.bus, StorageBackend::Postgres);
        let pg = config.postgres.expect("postgres");
        assert_eq!(pg.max_connections, 3);
        assert_eq!(pg.acquire_timeout_ms, DEFAULT_ACQUIRE_TIMEOUT_MS);
        assert_eq!(config.sync.channel, "policy");
    }

    #[test]
    #[serial]
    fn invalid_env_values_are_rejected() {
        let guard = EnvGuard::clean();
        guard.set("WARDEN_STORAGE", "redis");
        assert!(PolicydConfig::from_env().is_err());
        guard.set("WARDEN_STORAGE", "memory");
        guard.set("WARDEN_SYNC_POLL_TIMEOUT_MS", "soon");
        assert!(PolicydConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn yaml_overrides_env() {
        let guard = EnvGuard::clean();
        let path = std::env::temp_dir().join(format!("policyd-{}.yaml", uuid::Uuid::new_v4()));
        fs::write(
            &path,
            "metrics_bind: 127.0.0.1:9191\nstorage: postgres\npostgres:\n  url: postgres://db/warden\nsync:\n  bus: memory\n  poll_timeout_ms: 50\n",
        )
        .expect("write yaml");
        guard.set("WARDEN_CONFIG", path.to_str().expect("path"));
        let config = PolicydConfig::from_env_or_yaml().expect("config");
        let _ = fs::remove_file(&path);
        assert_eq!(config.metrics_bind.port(), 9191);
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.postgres.expect("pg").url, "postgres://db/warden");
        assert_eq!(config.sync.bus, StorageBackend::Memory);
        assert_eq!(config.sync.poll_timeout_ms, 50);
    }

    #[test]
    #[serial]
    fn yaml_postgres_block_needs_url() {
        let _guard = EnvGuard::clean();
        let mut config = PolicydConfig::from_env().expect("config");
        let err = config
            .apply_yaml("postgres:\n  max_connections: 2\n")
            .unwrap_err();
        assert!(err.to_string().contains("postgres.url"));
    }
}

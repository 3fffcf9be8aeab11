//! Broker configuration and the environment-variable factory.

use crate::broker::DEFAULT_POLL_INTERVAL;
use crate::error::{BrokerError, Result};
use crate::types::ClientId;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable holding the client identifier.
pub const CLIENT_ID_VAR: &str = "CLIENT_ID";
/// Environment variable holding the client secret.
pub const CLIENT_SECRET_VAR: &str = "CLIENT_SECRET";
/// Environment variable holding the deployment tag.
pub const ENV_VAR: &str = "ENV";
/// SQLite database path for development/testing (`:memory:` if unset).
pub const SQLITE_PATH_VAR: &str = "YAPPER_DB";
/// Connection URI for staging/production.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Marker path selecting an in-memory SQLite store.
pub const MEMORY_PATH: &str = ":memory:";

/// Deployment tag selecting the storage backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Staging,
    Production,
}

impl Environment {
    /// Whether this environment runs against the shared durable store.
    pub fn uses_shared_store(self) -> bool {
        matches!(self, Environment::Staging | Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(s)
    }
}

impl FromStr for Environment {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "testing" => Ok(Environment::Testing),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            _ => Err(BrokerError::Configuration(format!(
                "Unsupported ENV value: {}",
                s
            ))),
        }
    }
}

/// Where an embedded SQLite store lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqliteLocation {
    /// Private in-memory database, alive as long as its backend.
    Memory,
    /// Database file shared by every process that opens it.
    File(PathBuf),
}

impl SqliteLocation {
    /// `":memory:"` maps to [`SqliteLocation::Memory`], anything else to a file.
    pub fn parse(path: &str) -> Self {
        if path == MEMORY_PATH {
            SqliteLocation::Memory
        } else {
            SqliteLocation::File(PathBuf::from(path))
        }
    }
}

/// Storage backend selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    /// Ephemeral/local embedded store.
    Sqlite { location: SqliteLocation },
    /// Durable store shared between hosts.
    Postgres { uri: String },
}

impl BackendConfig {
    pub fn memory() -> Self {
        BackendConfig::Sqlite {
            location: SqliteLocation::Memory,
        }
    }

    pub fn sqlite_file(path: impl Into<PathBuf>) -> Self {
        BackendConfig::Sqlite {
            location: SqliteLocation::File(path.into()),
        }
    }

    pub fn postgres(uri: impl Into<String>) -> Self {
        BackendConfig::Postgres { uri: uri.into() }
    }

    fn validate(&self) -> Result<()> {
        match self {
            BackendConfig::Sqlite {
                location: SqliteLocation::File(path),
            } if path.as_os_str().is_empty() => Err(BrokerError::Configuration(
                "SQLite path must not be empty".to_string(),
            )),
            BackendConfig::Postgres { uri } if uri.trim().is_empty() => Err(
                BrokerError::Configuration("database URI must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::memory()
    }
}

/// Broker configuration.
#[derive(Clone)]
pub struct BrokerConfig {
    /// Identifier of this client.
    pub client_id: String,

    /// Secret issued to this client. Required by the environment factory,
    /// never sent to the store.
    pub client_secret: Option<String>,

    /// Storage backend.
    pub backend: BackendConfig,

    /// Sleep between polls of the dispatch loop.
    /// Default: 250ms
    pub poll_interval: Duration,

    /// Max pooled connections for file and network stores.
    /// Default: 4
    pub pool_size: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            backend: BackendConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            pool_size: 4,
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("backend", &self.backend)
            .field("poll_interval", &self.poll_interval)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

impl BrokerConfig {
    pub fn new(client_id: impl Into<String>, backend: BackendConfig) -> Self {
        Self {
            client_id: client_id.into(),
            backend,
            ..Default::default()
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Check every construction parameter. Returns the parsed client id.
    pub fn validate(&self) -> Result<ClientId> {
        let client_id = ClientId::new(self.client_id.clone())?;
        self.backend.validate()?;
        if self.pool_size == 0 {
            return Err(BrokerError::Configuration(
                "pool size must be at least 1".to_string(),
            ));
        }
        Ok(client_id)
    }

    /// Build a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Development and testing select SQLite at `YAPPER_DB` (in-memory if
    /// unset); staging and production select PostgreSQL at `DATABASE_URL`,
    /// which is then required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let client_id = var(CLIENT_ID_VAR).ok_or_else(|| {
            BrokerError::Configuration("CLIENT_ID environment variable is required".to_string())
        })?;
        let client_secret = var(CLIENT_SECRET_VAR).ok_or_else(|| {
            BrokerError::Configuration(
                "CLIENT_SECRET environment variable is required".to_string(),
            )
        })?;
        let env = match var(ENV_VAR) {
            Some(tag) => tag.parse::<Environment>()?,
            None => Environment::default(),
        };

        let backend = if env.uses_shared_store() {
            let uri = var(DATABASE_URL_VAR).ok_or_else(|| {
                BrokerError::Configuration(format!(
                    "database URI is required for {} environment",
                    env
                ))
            })?;
            BackendConfig::postgres(uri)
        } else {
            let path = var(SQLITE_PATH_VAR).unwrap_or_else(|| MEMORY_PATH.to_string());
            BackendConfig::Sqlite {
                location: SqliteLocation::parse(&path),
            }
        };

        let config = BrokerConfig::new(client_id, backend).with_secret(client_secret);
        config.validate()?;
        Ok(config)
    }
}

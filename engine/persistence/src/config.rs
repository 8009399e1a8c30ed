//! Configuration for the persistence layer

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local maps, lost on restart
    Memory,
    /// PostgreSQL through sqlx
    Postgres,
}

/// Configuration for the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: BackendKind,

    /// Connection string, required for the Postgres backend
    pub database_url: Option<String>,

    /// Maximum pooled connections
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,

    /// Apply embedded migrations on startup
    pub run_migrations: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            database_url: None,
            max_connections: 5,
            acquire_timeout_secs: 10,
            run_migrations: true,
        }
    }
}

impl PersistenceConfig {
    /// Configuration for a Postgres backend at `database_url`
    pub fn postgres(database_url: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Postgres,
            database_url: Some(database_url.into()),
            ..Default::default()
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.backend == BackendKind::Postgres
            && self.database_url.as_deref().map_or(true, str::is_empty)
        {
            return Err("database_url is required for the postgres backend".to_string());
        }

        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }

        Ok(())
    }
}

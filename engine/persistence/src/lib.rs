//! # Persistence Layer
//!
//! Durable storage for the SIAHL game notifier: cached payloads, tracked games,
//! the append-only notification log and recipients.
//!
//! ## Architecture
//!
//! - **PersistenceBackend**: Abstract trait for different storage backends
//! - **InMemoryPersistence**: Process-local implementation for tests and dry runs
//! - **PostgresPersistence**: sqlx implementation with embedded migrations
//!
//! The notification log's idempotency key `(recipient_id, game_id, event_type,
//! value_hash)` is enforced by the backend's insert, never by a lock held by
//! the caller.
//!
//! ## Usage
//!
//! ```rust
//! use persistence::{create_persistence, PersistenceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let persistence = create_persistence(PersistenceConfig::default()).await?;
//!     persistence.initialize().await?;
//!     assert!(persistence.list_recipients().await?.is_empty());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod postgres;

pub use backend::{InMemoryPersistence, PersistenceBackend};
pub use config::{BackendKind, PersistenceConfig};
pub use error::{PersistenceError, Result};
pub use models::*;
pub use postgres::PostgresPersistence;

use std::sync::Arc;

/// Build the backend selected by `config`
pub async fn create_persistence(config: PersistenceConfig) -> Result<Arc<dyn PersistenceBackend>> {
    config.validate().map_err(PersistenceError::config)?;

    let backend: Arc<dyn PersistenceBackend> = match config.backend {
        BackendKind::Memory => Arc::new(InMemoryPersistence::new(config)),
        BackendKind::Postgres => Arc::new(PostgresPersistence::connect(config).await?),
    };
    Ok(backend)
}

//! SIAHL Notifier Service Library
//!
//! Configuration loading, logging, component wiring and graceful shutdown for
//! the `siahl-notifier` binary.

pub mod config;
pub mod logging;
pub mod service;
pub mod signals;

pub use config::{load_config, render_config, validate_config, LoggingConfig, ServiceConfig};
pub use logging::{initialize_logging, initialize_logging_with_config};
pub use service::ServiceState;
pub use signals::{graceful_shutdown, setup_signal_handlers};

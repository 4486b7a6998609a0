//! Process startup: configuration, logging and engine assembly

mod config;
mod engine;
mod logging;

pub use config::{Cli, Configuration, ServerConfig};
pub use engine::open_engine;
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};

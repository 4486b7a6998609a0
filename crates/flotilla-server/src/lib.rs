//! Flotilla Server - Process bootstrap and operator tooling
//!
//! This crate provides:
//! - Layered configuration (YAML file, `FLOTILLA_` environment variables, CLI flags)
//! - Multi-file logging with per-component rolling files
//! - Engine assembly for the configured storage backend
//! - The operator commands exposed by the `flotilla-server` binary

pub mod command;
pub mod startup;

pub use command::{Command, execute};
pub use startup::{Cli, Configuration, LoggingConfig, LoggingGuard, ServerConfig, init_logging, open_engine};

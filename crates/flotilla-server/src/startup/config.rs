//! Configuration management for the Flotilla server
//!
//! Settings are layered, later sources winning:
//! 1. built-in defaults
//! 2. `conf/flotilla.yml` (or the file named by `--config`), if present
//! 3. `FLOTILLA_` environment variables, `__` separating nested keys
//!    (`FLOTILLA_STORAGE__MODE=memory`)
//! 4. command line flags

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use config::{Config, Environment, File};

use flotilla_edge::EngineConfig;
use flotilla_persistence::StorageMode;

use super::logging::LoggingConfig;
use crate::command::Command;

pub const DEFAULT_CONFIG_FILE: &str = "conf/flotilla.yml";

const STORAGE_MODE: &str = "storage.mode";
const STORAGE_DATA_DIR: &str = "storage.data_dir";
const MANIFEST_DIR: &str = "manifest.dir";
const LOGGING_DIR: &str = "logging.dir";
const LOGGING_LEVEL: &str = "logging.level";
const LOGGING_CONSOLE: &str = "logging.console";
const LOGGING_FILE: &str = "logging.file";
const ENGINE: &str = "engine";

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "flotilla-server", version, about = "Edge stack fleet operator")]
pub struct Cli {
    /// Configuration file, ignored when missing
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,
    /// Storage backend (memory | embedded)
    #[arg(short = 's', long = "storage", env = "FLOTILLA_STORAGE_MODE")]
    pub storage: Option<StorageMode>,
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,
    #[arg(long = "manifest-dir")]
    pub manifest_dir: Option<PathBuf>,
    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

/// Typed server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub storage_mode: StorageMode,
    pub data_dir: PathBuf,
    pub manifest_dir: PathBuf,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Build the layered configuration for parsed command line arguments
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from(cli.config_file.as_path()).required(false))
            .add_source(
                Environment::with_prefix("FLOTILLA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(mode) = cli.storage {
            builder = builder.set_override(STORAGE_MODE, mode.to_string())?;
        }
        if let Some(dir) = &cli.data_dir {
            builder = builder.set_override(STORAGE_DATA_DIR, dir.display().to_string())?;
        }
        if let Some(dir) = &cli.manifest_dir {
            builder = builder.set_override(MANIFEST_DIR, dir.display().to_string())?;
        }
        if let Some(dir) = &cli.log_dir {
            builder = builder.set_override(LOGGING_DIR, dir.display().to_string())?;
        }

        let config = builder.build().with_context(|| {
            format!(
                "failed to build configuration from {}",
                cli.config_file.display()
            )
        })?;
        Ok(Configuration { config })
    }

    // ========================================================================
    // Storage Configuration
    // ========================================================================

    pub fn storage_mode(&self) -> anyhow::Result<StorageMode> {
        match self.config.get_string(STORAGE_MODE) {
            Ok(mode) => mode.parse().map_err(anyhow::Error::msg),
            Err(_) => Ok(StorageMode::default()),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config
            .get_string(STORAGE_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| flotilla_home().join("data"))
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.config
            .get_string(MANIFEST_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| flotilla_home().join("manifests"))
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn log_dir(&self) -> Option<String> {
        self.config.get_string(LOGGING_DIR).ok()
    }

    pub fn log_level(&self) -> String {
        self.config
            .get_string(LOGGING_LEVEL)
            .unwrap_or("info".to_string())
    }

    pub fn console_output(&self) -> bool {
        self.config.get_bool(LOGGING_CONSOLE).unwrap_or(true)
    }

    pub fn file_logging(&self) -> bool {
        self.config.get_bool(LOGGING_FILE).unwrap_or(true)
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.log_dir(),
            self.console_output(),
            self.file_logging(),
            self.log_level(),
        )
    }

    // ========================================================================
    // Engine Configuration
    // ========================================================================

    /// Engine tunables; keys left out keep their defaults
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        match self.config.get::<EngineConfig>(ENGINE) {
            Ok(engine) => Ok(engine),
            Err(config::ConfigError::NotFound(_)) => Ok(EngineConfig::default()),
            Err(e) => Err(e).context("invalid engine configuration"),
        }
    }

    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        Ok(ServerConfig {
            storage_mode: self.storage_mode()?,
            data_dir: self.data_dir(),
            manifest_dir: self.manifest_dir(),
            logging: self.logging_config(),
            engine: self.engine_config()?,
        })
    }
}

/// Base directory for data, manifests and logs (`~/flotilla`)
pub(crate) fn flotilla_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join("flotilla")
}

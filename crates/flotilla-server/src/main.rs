//! Operator entry point: loads configuration, starts logging, opens the
//! configured store and runs one command against the edge engine.

use clap::Parser;
use tracing::{debug, error};

use flotilla_server::{Cli, Configuration, execute, init_logging, open_engine};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::from_cli(&cli)?;
    let server_config = configuration.server_config()?;

    let _logging_guard = init_logging(&server_config.logging)?;
    debug!(config = ?server_config, "Configuration loaded");

    let engine = open_engine(&server_config)?;
    match execute(&engine, &cli.command) {
        Ok(output) => {
            print!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!(command = ?cli.command, "Command failed: {:#}", e);
            Err(e)
        }
    }
}

//! Command-line interface: argument parsing, handlers and output.

pub mod command;
pub mod config;
pub mod launch;
pub mod open;
pub mod output;
pub mod paths;
pub mod status;
pub mod terminate;

use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::infrastructure::config::Config;
use command::{Commands, ConfigCommand};

/// Load the configuration for a command and install logging from it.
///
/// A missing file at the default location means "all defaults"; a missing
/// file anywhere else is an error. `-q`/`-v` override the configured level.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if !path.exists() && path == paths::default_config() {
        Config::parse_toml("")?
    } else {
        Config::load(path)?
    };

    match output::log_level() {
        Some(level) => config.logging.with_level(level).init(),
        None => config.init_logging(),
    }
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
    }
    Ok(config)
}

/// Run the parsed command to completion.
///
/// # Errors
///
/// Returns whatever the command handler returns.
pub async fn execute(command: &Commands) -> Result<()> {
    match command {
        Commands::Launch(args) => launch::execute(args).await,
        Commands::Open(args) => open::execute(&args.config).await,
        Commands::Terminate(args) => terminate::execute(&args.config).await,
        Commands::Status(args) => status::execute(&args.config),
        Commands::Config(ConfigCommand::Init(args)) => config::execute_init(&args.path, args.force),
        Commands::Config(ConfigCommand::Show(args)) => config::execute_show(&args.config),
        Commands::Config(ConfigCommand::Validate(args)) => config::execute_validate(&args.config),
    }
}

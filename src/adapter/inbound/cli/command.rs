//! Command-line interface definitions.
//!
//! Defines the CLI structure for rcluster using `clap`: launch a cluster,
//! open its endpoint, terminate it, inspect it, and manage configuration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::paths;

/// Launch and manage a cluster of cloud instances for parallel R sessions
#[derive(Parser, Debug)]
#[command(name = "rcluster")]
#[command(version)]
pub struct Cli {
    /// JSON output for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Decrease output verbosity
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase output verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the rcluster CLI.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a manager and workers and wait until the cluster is ready
    Launch(LaunchArgs),

    /// Print the manager's service endpoint
    Open(ConfigPathArg),

    /// Terminate every node of the cluster
    Terminate(ConfigPathArg),

    /// Show the stored cluster session
    Status(ConfigPathArg),

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Subcommands for `rcluster config`.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Generate a new configuration file from template.
    Init(ConfigInitArgs),
    /// Display the effective configuration with defaults applied.
    Show(ConfigPathArg),
    /// Validate a configuration file for correctness.
    Validate(ConfigPathArg),
}

/// Shared argument struct for commands that require only a configuration path.
#[derive(Parser, Debug)]
pub struct ConfigPathArg {
    /// Path to the configuration file.
    #[arg(short, long, default_value_os_t = paths::default_config())]
    pub config: PathBuf,
}

/// Arguments for the `launch` subcommand.
#[derive(Parser, Debug)]
pub struct LaunchArgs {
    /// Path to the configuration file.
    #[arg(short, long, default_value_os_t = paths::default_config())]
    pub config: PathBuf,

    /// Number of workers (default from `provisioning.default_workers`).
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Image to launch (default from `provider.image_id`).
    #[arg(short, long)]
    pub image: Option<String>,
}

/// Arguments for `config init`.
#[derive(Parser, Debug)]
pub struct ConfigInitArgs {
    /// Output path for the generated configuration file.
    #[arg(default_value_os_t = paths::default_config())]
    pub path: PathBuf,
    /// Overwrite the file if it already exists.
    #[arg(long)]
    pub force: bool,
}

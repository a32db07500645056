//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for chartsync using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// chartsync - mirrors completed encounters from tenant EHRs into a shared store
#[derive(Parser, Debug)]
#[command(name = "chartsync")]
#[command(version, about, long_about = None)]
#[command(author = "Chartsync Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "chartsync.toml", env = "CHARTSYNC_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "CHARTSYNC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the periodic scheduler until interrupted
    Run(commands::run::RunArgs),

    /// Run one sync cycle now, optionally for a single tenant
    Trigger(commands::trigger::TriggerArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}

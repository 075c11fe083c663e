//! Command-line interface of the posts maintenance tool.
//!
//! Offline operations on a posts database: schema status and migration,
//! genesis export and import, and ending expired polls.

pub mod args;
pub mod commands;

use crate::config::PostsConfig;
use crate::Result;

pub use args::{Command, Invocation};

/// Applies the command line overrides to the loaded configuration.
pub fn resolve_config(invocation: &Invocation, mut config: PostsConfig) -> PostsConfig {
    if let Some(data_dir) = &invocation.data_dir {
        config.data_dir = data_dir.clone();
    }
    config
}

/// Runs a parsed command against the given configuration
pub fn run(invocation: Invocation, config: PostsConfig) -> Result<()> {
    let config = resolve_config(&invocation, config);

    match invocation.command {
        Command::Status => commands::status(&config),
        Command::Migrate { dry_run } => commands::migrate(&config, dry_run),
        Command::ExportGenesis { file } => commands::export_genesis(&config, &file),
        Command::ImportGenesis { file } => commands::import_genesis(&config, &file),
        Command::ValidateGenesis { file } => commands::validate_genesis(&file),
        Command::EndExpiredPolls { block_time } => commands::end_expired_polls(&config, block_time),
    }
}

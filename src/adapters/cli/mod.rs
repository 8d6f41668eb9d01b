//! CLI Adapter
//!
//! Command-line interface for the options gate bot.
//! Uses clap derive macros for argument parsing.

mod commands;
mod services;

pub use commands::{
    CleanupCmd, Cli, Command, LessonAddCmd, LessonSearchCmd, LessonsCmd, StatusCmd, TradeCmd,
};
pub use services::Services;

use anyhow::Result;

use crate::config::AppConfig;

/// Parse the command line.
pub fn init() -> Cli {
    use clap::Parser;
    Cli::parse()
}

/// Execute the CLI command against a loaded config.
pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
    commands::execute(cli, config).await
}

//! Options Gate Bot - Entry Point
//!
//! Parses the command line, loads configuration and logging, then
//! hands off to the selected command. `run` keeps the scheduler,
//! health and metrics servers up until SIGINT.
//!
//! Wiring sequence:
//! 1. Load `.env` secrets (ALPACA_API_KEY, ALPACA_SECRET_KEY, ANTHROPIC_API_KEY)
//! 2. Parse CLI arguments
//! 3. Load config.toml + validate
//! 4. Init tracing (JSON structured logging, `--pretty` for humans)
//! 5. Execute the command

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use options_gate_bot::adapters::cli;
use options_gate_bot::config;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load .env (missing file is fine) ─────────────────
    dotenvy::dotenv().ok();

    // ── 2. Parse command line ───────────────────────────────
    let app = cli::init();

    // ── 3. Load configuration ───────────────────────────────
    let config = config::loader::load_config(&app.config)
        .with_context(|| format!("Failed to load configuration from {}", app.config.display()))?;

    // ── 4. Initialize structured logging (stderr) ───────────
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.bot.log_level));
    if app.pretty {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    }

    // ── 5. Execute command ──────────────────────────────────
    cli::execute(app, config).await
}

//! Swing Agent
//!
//! Binary entry point for the swing trading engine. Wires the paper
//! gateway kit into the engine, installs a ctrl-c shutdown handler, and
//! runs the tick loop (or a single tick with `--once`).

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trading_engine::{
    AgentSettings, LogNotifier, MemoryJournal, PaperGateway, StaticCandidates, TradingEngine,
};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "swing-agent", about = "Unattended swing trading agent (paper execution)")]
struct Args {
    /// Path to a TOML settings file. Falls back to `swing-bot.toml` in the
    /// working directory, then to built-in defaults.
    #[arg(long)]
    config: Option<String>,

    /// Run a single tick and exit instead of looping.
    #[arg(long)]
    once: bool,

    /// Starting cash for the paper account.
    #[arg(long, default_value = "100000")]
    equity: Decimal,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,trading_engine=debug,risk_manager=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load configuration
    let settings = AgentSettings::load(args.config.as_deref())?;
    if settings.live_trading {
        anyhow::bail!("live order routing is not wired into this binary; unset live_trading");
    }

    info!(
        max_positions = settings.max_positions,
        tick_seconds = settings.tick_seconds,
        equity = %args.equity,
        "starting swing agent in paper mode"
    );

    let gateway = Arc::new(PaperGateway::new(args.equity));
    let journal = Arc::new(MemoryJournal::new());
    let candidates = Arc::new(StaticCandidates::default());
    let notifier = Arc::new(LogNotifier);

    let mut engine = TradingEngine::from_settings(&settings, gateway.clone(), gateway, candidates)?
        .with_journal(journal)
        .with_notifier(notifier);

    if args.once {
        engine.tick().await?;
        info!(stats = ?engine.stats(), "single tick complete");
        return Ok(());
    }

    if let Some(shutdown) = engine.take_shutdown_handle() {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                let _ = shutdown.send(true);
            }
        });
    }

    engine.run().await?;
    info!(stats = ?engine.stats(), "swing agent stopped");
    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use intradaybot::config::EngineConfig;
use intradaybot::events::EventBus;
use intradaybot::feed::{Authenticator, HttpQuoteSource, StaticTokenAuthenticator, SyntheticSource, TickSource};
use intradaybot::persistence::{spawn_snapshot_writer, SnapshotStore};
use intradaybot::{SessionSummary, TradingOrchestrator};
use tracing_subscriber::EnvFilter;

/// Single-symbol intraday trading engine
#[derive(Debug, Parser)]
#[command(name = "intradaybot", version)]
struct Cli {
    /// TOML configuration file (environment overrides still apply)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trade a seeded random walk instead of the configured quote API
    #[arg(long)]
    synthetic: bool,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 22_000.0)]
    start_price: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    tracing::info!("🚀 IntradayBot starting");
    tracing::info!("📊 Configuration:");
    tracing::info!("  Symbol: {}", config.symbol);
    tracing::info!("  Lot size: {}", config.risk.lot_size);
    tracing::info!("  Stop loss: {} points", config.risk.base_sl_points);
    tracing::info!("  Targets: {:?} points at {:?}%", config.risk.tp_points, config.risk.tp_percents);
    tracing::info!("  Max trades/day: {}", config.risk.max_daily_trades);
    tracing::info!(
        "  Session: {} - {} (UTC{:+} min)",
        config.session.start,
        config.session.end,
        config.session.utc_offset_minutes
    );

    let events = EventBus::default();
    let writer = match &config.persistence.redis_url {
        Some(url) => match SnapshotStore::connect(url).await {
            Ok(store) => Some(spawn_snapshot_writer(store, events.subscribe())),
            Err(e) => {
                tracing::warn!("Redis unavailable, session snapshots disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let auth = StaticTokenAuthenticator::new(config.feed.api_token.clone());
    let summary = if cli.synthetic {
        let interval = Duration::from_millis(1000 / u64::from(config.feed.poll_rate_per_sec.max(1)));
        let source = SyntheticSource::new(cli.seed, cli.start_price, interval);
        run_session(config, source, auth, events).await?
    } else {
        let source = HttpQuoteSource::new(&config.feed).context("failed to build quote source")?;
        run_session(config, source, auth, events).await?
    };

    tracing::info!(
        "📈 Session summary: {} ticks, {} trades, P&L {:.2}",
        summary.ticks_processed,
        summary.trades.len(),
        summary.total_pnl()
    );

    // Orchestrator dropped its bus sender; let the writer flush what is queued
    if let Some(writer) = writer {
        if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
            tracing::warn!("Snapshot writer did not finish in time");
        }
    }

    tracing::info!("👋 IntradayBot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("intradaybot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_session<S, A>(
    config: EngineConfig,
    source: S,
    auth: A,
    events: EventBus,
) -> anyhow::Result<SessionSummary>
where
    S: TickSource,
    A: Authenticator,
{
    let mut orchestrator = TradingOrchestrator::new(config, source, auth, events)?;

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
            stop.stop();
        }
    });

    let summary = orchestrator.run().await?;
    Ok(summary)
}

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use intradaybot::config::EngineConfig;
use intradaybot::events::EventBus;
use intradaybot::feed::{parse_jsonl, ReplaySource, StaticTokenAuthenticator};
use intradaybot::TradingOrchestrator;
use tracing_subscriber::EnvFilter;

/// Replay a recorded JSON-lines tick file through the engine
#[derive(Debug, Parser)]
#[command(name = "replay")]
struct Cli {
    /// One quote per line: {"price": .., "volume": .., "timestamp": <ms>}
    ticks: PathBuf,

    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("intradaybot=info")))
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    config.engine.idle_sleep_ms = 0;

    let text = std::fs::read_to_string(&cli.ticks)
        .with_context(|| format!("failed to read {}", cli.ticks.display()))?;
    let (ticks, skipped) = parse_jsonl(&text);
    if ticks.is_empty() {
        anyhow::bail!("no valid ticks in {}", cli.ticks.display());
    }

    let mut orchestrator = TradingOrchestrator::new(
        config,
        ReplaySource::pull(ticks),
        StaticTokenAuthenticator::new(None),
        EventBus::default(),
    )?;
    let summary = orchestrator.run().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║                  REPLAY SUMMARY                       ║");
    println!("╚═══════════════════════════════════════════════════════╝");
    println!("  Symbol:          {}", summary.symbol);
    println!("  Ticks processed: {}", summary.ticks_processed);
    println!("  Lines skipped:   {}", skipped);
    println!("  Stopped by:      {:?}", summary.stop_reason);
    println!("  Trades:          {}", summary.trades.len());
    println!("  Net P&L:         {:.2}", summary.total_pnl());

    if !summary.trades.is_empty() {
        println!("\n  {:<8} {:>10} {:>10} {:>6} {:>10}  exit", "#", "entry", "last", "qty", "pnl");
        for (i, trade) in summary.trades.iter().enumerate() {
            let last_price = trade.exit_legs.last().map_or(trade.entry_price, |l| l.price);
            let reason = trade
                .final_exit_reason()
                .map_or("open", |r| r.as_str());
            println!(
                "  {:<8} {:>10.2} {:>10.2} {:>6} {:>10.2}  {}",
                i + 1,
                trade.entry_price,
                last_price,
                trade.lot_size,
                trade.realized_pnl(),
                reason
            );
        }
    }

    Ok(())
}

//! Swing Bot
//!
//! Runs the scheduled trading loop, or a single cycle with `--once`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use orchestrator::Orchestrator;
use trading_core::api::{AlpacaClient, Broker, CachedMarketData, MarketData, MockBroker};
use trading_core::{Settings, Store};

#[derive(Debug, Parser)]
#[command(name = "swing-bot", about = "Equities swing trading bot")]
struct Args {
    /// Optional TOML config file; environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the in-process mock broker.
    #[arg(long)]
    mock: bool,

    /// Run one cycle over these symbols (comma separated) and exit.
    #[arg(long, value_delimiter = ',')]
    once: Option<Vec<String>>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Print stress scenarios for the current holdings and exit.
    #[arg(long)]
    stress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if args.mock {
        settings.broker.use_mock = true;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.app.log_level.to_lowercase()));
    tracing_subscriber::registry()
        .with(filter)
        .with(args.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    info!(mode = ?settings.app.mode, mock = settings.broker.use_mock, "Starting swing bot");

    let store = Store::connect(&settings.storage).await?;
    if store.seed_watchlist(&settings.universe.watchlist_default).await? {
        info!(
            symbols = settings.universe.watchlist_default.len(),
            "Seeded default watchlist"
        );
    }

    let (broker, market_data): (Arc<dyn Broker>, Arc<dyn MarketData>) = if settings.broker.use_mock {
        warn!("Using mock broker");
        let mock = Arc::new(MockBroker::new());
        (mock.clone(), mock)
    } else {
        let Some((key, secret, trading_url)) = settings.broker.credentials(settings.app.mode) else {
            bail!(
                "missing Alpaca credentials for {:?} mode; set the API key env vars or pass --mock",
                settings.app.mode
            );
        };
        let client = Arc::new(AlpacaClient::new(
            trading_url,
            settings.broker.data_base_url.clone(),
            key,
            secret,
            settings.broker.timeout_secs,
        )?);
        (client.clone(), client)
    };
    let market_data: Arc<dyn MarketData> = if settings.data.cache_enabled {
        info!(dir = ?settings.data.cache_dir, ttl_minutes = settings.data.cache_ttl_minutes, "Bar cache enabled");
        Arc::new(CachedMarketData::new(market_data, &settings.data))
    } else {
        market_data
    };

    let orchestrator = Arc::new(Orchestrator::new(&settings, broker, market_data, store));

    if args.stress {
        let results = orchestrator.stress_test().await?;
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if let Some(symbols) = args.once {
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        orchestrator.start_manual().await;
        let summary = orchestrator.run_cycle(&symbols).await;
        orchestrator.stop().await;
        println!("{}", serde_json::to_string_pretty(&summary?)?);
        return Ok(());
    }

    orchestrator.start().await;
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");
    orchestrator.stop().await;

    Ok(())
}

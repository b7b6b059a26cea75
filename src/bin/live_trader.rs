use anyhow::Context;
use clap::Parser;
use rust_decimal::Decimal;
use spot_trader::exchange::{CredentialStore, EnvCredentialStore, FeedOptions};
use spot_trader::trading::{EngineConfig, EngineEvent};
use spot_trader::utils::{init_from_config, TradingMode};
use spot_trader::{BinanceRestClient, Config, MarketDataFeed, NewTrade, TradingEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "live_trader", about = "Threshold spot trading on Binance with real orders")]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "config/production.toml")]
    config: PathBuf,

    /// Pair to track, overrides general.symbol
    #[arg(short, long)]
    pair: Option<String>,

    /// Threshold trade as AMOUNT:ENTRY:EXIT, repeatable
    #[arg(short, long = "trade", value_parser = parse_trade)]
    trades: Vec<(Decimal, Decimal, Decimal)>,

    /// Use the Binance spot testnet
    #[arg(long)]
    testnet: bool,
}

fn parse_trade(s: &str) -> Result<(Decimal, Decimal, Decimal), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("expected AMOUNT:ENTRY:EXIT, got {}", s));
    }
    let parse = |v: &str| v.trim().parse::<Decimal>().map_err(|e| format!("{}: {}", v, e));
    Ok((parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::load_from(&args.config)?;
    config.ensure_mode(TradingMode::Live)?;
    if let Some(pair) = &args.pair {
        config.general.symbol = pair.to_uppercase();
    }
    config.exchange.testnet |= args.testnet;
    init_from_config(&config.logging)?;

    info!("╔════════════════════════════════════════════════╗");
    info!("║   Spot Trader - LIVE TRADING MODE              ║");
    info!("╠════════════════════════════════════════════════╣");
    info!("║   ⚠️  WARNING: REAL MONEY AT RISK!             ║");
    info!("╚════════════════════════════════════════════════╝");
    info!("✓ Configuration loaded: {}", config.general.environment);

    let credentials = Arc::new(EnvCredentialStore::from_env());
    credentials
        .credentials()
        .await
        .context("BINANCE_API_KEY and BINANCE_SECRET_KEY must be set")?;
    info!("✓ API credentials loaded");

    let rest_client = BinanceRestClient::new(config.exchange.rest_endpoint(), credentials.clone())?;
    let feed = MarketDataFeed::new(
        config.exchange.ws_endpoint.clone(),
        FeedOptions {
            auto_reconnect: config.exchange.auto_reconnect,
            ping_interval: Duration::from_millis(config.exchange.ws_ping_interval_ms),
            ..FeedOptions::default()
        },
    );

    let engine_config = EngineConfig::from_config(&config);
    let (engine, events) = TradingEngine::new(engine_config, Arc::new(rest_client), feed)?;

    engine.check_connectivity().await?;
    if let Err(e) = engine.refresh_balance(&config.general.quote_currency).await {
        warn!("Starting without a balance snapshot: {}", e);
    }

    for (amount, entry_price, exit_price) in args.trades {
        let id = engine
            .add_trade(NewTrade {
                pair: config.general.symbol.clone(),
                amount,
                entry_price,
                exit_price,
            })
            .await?;
        info!("✓ Trade {} registered", id);
    }

    let reporter = tokio::spawn(report_events(events));

    engine.start().await;
    info!("System ready. Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    info!("Shutting down...");
    engine.shutdown().await;

    let account = engine.account().await;
    info!("📈 Session summary:");
    info!("   Balance: {}", account.balance);
    info!("   Cumulative profit: {}", account.cumulative_profit);
    info!("   Trades: {} ({}% successful)", account.total_trades, account.success_rate());
    info!("   Open trades: {}", engine.trades().await.len());
    if config.metrics.enabled {
        info!("\n{}", engine.metrics().render());
    }

    drop(engine);
    let _ = reporter.await;
    Ok(())
}

async fn report_events(mut events: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::TradeStateChanged { id, from, to } => info!("Trade {}: {} -> {}", id, from, to),
            EngineEvent::BalanceChanged(account) => info!(
                "Balance {} | profit {} | trades {}",
                account.balance, account.cumulative_profit, account.total_trades
            ),
            EngineEvent::OrderFailed { id, side, error, .. } => error!("{} for trade {} failed: {}", side, id, error),
            EngineEvent::ConnectionLost { pair, reason } => warn!("Price stream for {} lost: {}", pair, reason),
            EngineEvent::Withdrawal { amount } => info!("Withdrew {}", amount),
            EngineEvent::Started { .. } | EngineEvent::Stopped | EngineEvent::PriceUpdated(_) => {}
        }
    }
}

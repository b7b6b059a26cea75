use anyhow::Context;
use clap::Parser;
use rust_decimal::Decimal;
use spot_trader::exchange::FeedOptions;
use spot_trader::trading::{EngineConfig, EngineEvent};
use spot_trader::utils::{init_from_config, TradingMode};
use spot_trader::{Config, MarketDataFeed, NewTrade, PaperGateway, TradingEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "paper_trader", about = "Live prices, simulated fills and accounting")]
struct Args {
    #[arg(short, long, default_value = "config/paper.toml")]
    config: PathBuf,

    #[arg(short, long)]
    pair: Option<String>,

    /// Threshold trade as AMOUNT:ENTRY:EXIT, repeatable
    #[arg(short, long = "trade", value_parser = parse_trade)]
    trades: Vec<(Decimal, Decimal, Decimal)>,

    /// Seed for the simulated strategy step
    #[arg(long)]
    seed: Option<u64>,
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
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::load_from(&args.config)?;
    config.ensure_mode(TradingMode::Simulated)?;
    if let Some(pair) = &args.pair {
        config.general.symbol = pair.to_uppercase();
    }
    init_from_config(&config.logging)?;

    info!("Starting Spot Trader - Paper Trading Mode");
    info!("============================================");

    let gateway = Arc::new(PaperGateway::new(config.trading.paper_balance));
    let feed = MarketDataFeed::new(
        config.exchange.ws_endpoint.clone(),
        FeedOptions {
            auto_reconnect: config.exchange.auto_reconnect,
            ping_interval: Duration::from_millis(config.exchange.ws_ping_interval_ms),
            ..FeedOptions::default()
        },
    );

    let mut engine_config = EngineConfig::from_config(&config);
    engine_config.initial_balance = config.trading.paper_balance;
    engine_config.simulation_seed = args.seed;

    let (engine, mut events) = TradingEngine::new(engine_config, gateway.clone(), feed)?;

    for (amount, entry_price, exit_price) in args.trades {
        engine
            .add_trade(NewTrade {
                pair: config.general.symbol.clone(),
                amount,
                entry_price,
                exit_price,
            })
            .await?;
    }

    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::TradeStateChanged { id, from, to } => info!("Trade {}: {} -> {}", id, from, to),
                EngineEvent::BalanceChanged(account) => info!(
                    "💹 Balance {} | profit {} | {}/{} successful",
                    account.balance, account.cumulative_profit, account.successful_trades, account.total_trades
                ),
                EngineEvent::ConnectionLost { pair, reason } => warn!("✗ Price stream for {} lost: {}", pair, reason),
                _ => {}
            }
        }
    });

    engine.start().await;
    info!("System initialized. Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    engine.shutdown().await;

    let account = engine.account().await;
    info!("📈 Paper session summary:");
    info!("   Simulated fills: {}", gateway.orders().await.len());
    info!("   Balance: {}", account.balance);
    info!("   Cumulative profit: {}", account.cumulative_profit);
    info!("   Success rate: {}%", account.success_rate());
    if engine.is_withdrawal_eligible().await {
        info!("   Eligible for withdrawal of {}% of profit", config.withdrawal.percentage);
    }

    drop(engine);
    let _ = reporter.await;
    Ok(())
}

//! Trading engine
//!
//! One engine per session. Two triggers drive it: every price tick runs a
//! registry pass, and a periodic task runs the strategy step. Both mutate
//! the same `EngineState` behind one mutex, which is never held across an
//! exchange call.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accounting::{AccountState, AccountingLedger, LedgerError, WithdrawalPolicy};
use crate::data::{NewTrade, PriceTick, Trade, TradeId, TradeStatus};
use crate::exchange::binance::types::OrderResult;
use crate::exchange::{CredentialStore, ExchangeError, FeedEvent, MarketDataFeed, OrderGateway, Severity};
use crate::trading::events::EngineEvent;
use crate::trading::registry::{PendingOrder, RegistryError, TradeRegistry};
use crate::trading::simulation::Simulator;
use crate::utils::config::{Config, PairRules, TradingMode};
use crate::utils::metrics::EngineMetrics;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Per-session engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pair: String,
    pub mode: TradingMode,
    pub strategy_interval: Duration,
    pub withdrawal: WithdrawalPolicy,
    pub pair_rules: HashMap<String, PairRules>,
    pub initial_balance: Decimal,
    /// Fixed seed for the simulated strategy step
    pub simulation_seed: Option<u64>,
}

impl EngineConfig {
    pub fn new(pair: impl Into<String>, mode: TradingMode) -> Self {
        Self {
            pair: pair.into().to_uppercase(),
            mode,
            strategy_interval: Duration::from_secs(5),
            withdrawal: WithdrawalPolicy::default(),
            pair_rules: HashMap::new(),
            initial_balance: Decimal::ZERO,
            simulation_seed: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            pair: config.general.symbol.to_uppercase(),
            mode: config.trading.mode,
            strategy_interval: Duration::from_millis(config.trading.strategy_interval_ms),
            withdrawal: WithdrawalPolicy::from(&config.withdrawal),
            pair_rules: config.pair_rules(),
            initial_balance: Decimal::ZERO,
            simulation_seed: None,
        }
    }
}

struct EngineState {
    registry: TradeRegistry,
    ledger: AccountingLedger,
    simulator: Simulator,
    last_price: Option<Decimal>,
}

/// State and collaborators shared with the spawned tasks
struct Shared {
    mode: TradingMode,
    strategy_interval: Duration,
    gateway: Arc<dyn OrderGateway>,
    state: Mutex<EngineState>,
    running: AtomicBool,
    events: mpsc::UnboundedSender<EngineEvent>,
    metrics: EngineMetrics,
}

struct Tasks {
    /// Cancels everything on stop
    root: CancellationToken,
    /// Child of `root`, replaced on reconnect
    feed: CancellationToken,
    ticks: JoinHandle<()>,
    strategy: JoinHandle<()>,
}

/// Session trading engine
pub struct TradingEngine {
    shared: Arc<Shared>,
    feed: Mutex<MarketDataFeed>,
    selected_pair: RwLock<String>,
    tasks: Mutex<Option<Tasks>>,
}

impl TradingEngine {
    /// Build an engine and the receiving end of its event channel
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn OrderGateway>,
        feed: MarketDataFeed,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        let (events, event_rx) = mpsc::unbounded_channel();

        let simulator = match config.simulation_seed {
            Some(seed) => Simulator::seeded(seed),
            None => Simulator::new(),
        };

        let state = EngineState {
            registry: TradeRegistry::with_rules(config.pair_rules),
            ledger: AccountingLedger::with_balance(config.withdrawal, config.initial_balance),
            simulator,
            last_price: None,
        };

        let shared = Arc::new(Shared {
            mode: config.mode,
            strategy_interval: config.strategy_interval,
            gateway,
            state: Mutex::new(state),
            running: AtomicBool::new(false),
            events,
            metrics: EngineMetrics::new()?,
        });

        Ok((
            Self {
                shared,
                feed: Mutex::new(feed),
                selected_pair: RwLock::new(config.pair),
                tasks: Mutex::new(None),
            },
            event_rx,
        ))
    }

    /// Subscribe the price feed and launch the tick and strategy tasks
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Engine already running");
            return;
        }

        let pair = self.selected_pair.read().await.clone();
        let root = CancellationToken::new();
        let feed_token = root.child_token();

        let feed_rx = self.feed.lock().await.subscribe(&pair);
        let ticks = tokio::spawn(consume_feed(Arc::clone(&self.shared), feed_rx, feed_token.clone()));
        let strategy = tokio::spawn(run_strategy(Arc::clone(&self.shared), root.clone()));

        *tasks = Some(Tasks {
            root,
            feed: feed_token,
            ticks,
            strategy,
        });

        info!("Trading started on {} ({:?} mode)", pair, self.shared.mode);
        self.shared.emit(EngineEvent::Started { pair });
    }

    /// Clear the running flag and close the feed
    ///
    /// Cooperative: an order call already in progress still completes and
    /// its result is applied. Use `shutdown` to wait for that.
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().await;
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(tasks) = tasks.as_ref() {
            tasks.root.cancel();
        }
        self.feed.lock().await.close();

        info!("Trading stopped");
        self.shared.emit(EngineEvent::Stopped);
    }

    /// Stop and wait for the spawned tasks to finish their current iteration
    pub async fn shutdown(&self) {
        self.stop().await;

        let tasks = self.tasks.lock().await.take();
        if let Some(tasks) = tasks {
            let _ = tasks.ticks.await;
            let _ = tasks.strategy.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub async fn selected_pair(&self) -> String {
        self.selected_pair.read().await.clone()
    }

    /// Re-open the price subscription, optionally switching pair
    ///
    /// When stopped this only changes the pair used by the next `start`.
    pub async fn reconnect(&self, pair: &str) {
        let pair = pair.trim().to_uppercase();
        *self.selected_pair.write().await = pair.clone();

        let mut tasks = self.tasks.lock().await;
        if !self.shared.is_running() {
            return;
        }

        if let Some(tasks) = tasks.as_mut() {
            tasks.feed.cancel();

            let feed_token = tasks.root.child_token();
            let feed_rx = self.feed.lock().await.reconnect(&pair);
            tasks.ticks = tokio::spawn(consume_feed(Arc::clone(&self.shared), feed_rx, feed_token.clone()));
            tasks.feed = feed_token;
        }
    }

    /// Evaluate one price tick against the tracked trades
    pub async fn handle_tick(&self, tick: PriceTick) {
        self.shared.handle_tick(tick).await
    }

    /// Run one periodic strategy step immediately
    pub async fn run_strategy_step(&self) {
        self.shared.strategy_step().await
    }

    pub async fn add_trade(&self, trade: NewTrade) -> Result<TradeId, EngineError> {
        let mut state = self.shared.state.lock().await;
        let id = state.registry.add(trade)?;
        self.shared.metrics.tracked_trades.set(state.registry.len() as i64);
        Ok(id)
    }

    /// Remove a Pending or Active trade without placing any order
    pub async fn cancel_trade(&self, id: TradeId) -> Result<Trade, EngineError> {
        let mut state = self.shared.state.lock().await;
        let transition = state.registry.cancel(id)?;
        self.shared.metrics.tracked_trades.set(state.registry.len() as i64);
        self.shared.emit(EngineEvent::TradeStateChanged {
            id,
            from: transition.from,
            to: transition.to,
        });
        Ok(transition.trade)
    }

    /// Pending and Active trades in creation order
    pub async fn trades(&self) -> Vec<Trade> {
        self.shared.state.lock().await.registry.trades()
    }

    pub async fn trade(&self, id: TradeId) -> Option<Trade> {
        self.shared.state.lock().await.registry.get(id).cloned()
    }

    /// Closed and Cancelled trades
    pub async fn trade_history(&self) -> Vec<Trade> {
        self.shared.state.lock().await.registry.history().to_vec()
    }

    pub async fn account(&self) -> AccountState {
        self.shared.state.lock().await.ledger.snapshot()
    }

    pub async fn current_price(&self) -> Option<Decimal> {
        self.shared.state.lock().await.last_price
    }

    pub async fn is_withdrawal_eligible(&self) -> bool {
        self.shared.state.lock().await.ledger.is_withdrawal_eligible()
    }

    /// Withdraw the configured share of tracked profit
    ///
    /// Refused with `LedgerError::NotEligible` until profit is above the
    /// policy minimum.
    pub async fn withdraw(&self) -> Result<Decimal, EngineError> {
        let mut state = self.shared.state.lock().await;
        if !state.ledger.is_withdrawal_eligible() {
            return Err(LedgerError::NotEligible {
                profit: state.ledger.snapshot().cumulative_profit,
                minimum: state.ledger.policy().minimum_amount,
            }
            .into());
        }
        let amount = state.ledger.withdraw()?;
        let snapshot = state.ledger.snapshot();
        drop(state);

        self.shared.metrics.set_cumulative_profit(snapshot.cumulative_profit);
        self.shared.emit(EngineEvent::Withdrawal { amount });
        self.shared.emit(EngineEvent::BalanceChanged(snapshot));
        Ok(amount)
    }

    /// Mirror the exchange's free `asset` balance into the ledger
    pub async fn refresh_balance(&self, asset: &str) -> Result<Decimal, EngineError> {
        let balance = match self.shared.gateway.get_balance(asset).await {
            Ok(balance) => balance,
            Err(e) => {
                log_exchange_error(&e, "Balance query failed");
                return Err(e.into());
            }
        };

        let snapshot = {
            let mut state = self.shared.state.lock().await;
            state.ledger.set_balance(balance);
            state.ledger.snapshot()
        };

        info!("{} balance: {}", asset, balance);
        self.shared.emit(EngineEvent::BalanceChanged(snapshot));
        Ok(balance)
    }

    /// Unauthenticated exchange connectivity probe
    pub async fn check_connectivity(&self) -> Result<(), EngineError> {
        self.shared.gateway.ping().await?;
        info!("Connected to exchange API");
        Ok(())
    }

    /// End the session: stop, forget credentials, drop trades and figures
    pub async fn end_session(&self, credentials: &dyn CredentialStore) {
        self.shutdown().await;
        credentials.clear().await;

        let mut state = self.shared.state.lock().await;
        state.registry.clear();
        state.ledger.reset();
        state.last_price = None;
        self.shared.metrics.tracked_trades.set(0);
        self.shared.metrics.set_cumulative_profit(Decimal::ZERO);

        info!("Session ended");
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.shared.metrics
    }
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    async fn handle_tick(&self, tick: PriceTick) {
        self.metrics.ticks_received.inc();

        let due = {
            let mut state = self.state.lock().await;
            state.last_price = Some(tick.price);
            if self.is_running() {
                state.registry.due_orders(&tick.pair, tick.price)
            } else {
                Vec::new()
            }
        };

        self.emit(EngineEvent::PriceUpdated(tick));

        if due.is_empty() {
            return;
        }

        // Distinct trades may submit concurrently; each trade is claimed once
        let results = join_all(due.into_iter().map(|order| async move {
            self.metrics.orders_submitted.inc();
            let result = self
                .gateway
                .place_market_order(&order.pair, order.side, order.quantity)
                .await;
            (order, result)
        }))
        .await;

        let mut state = self.state.lock().await;
        for (order, result) in results {
            self.apply_order_result(&mut state, order, result);
        }
        self.metrics.tracked_trades.set(state.registry.len() as i64);
    }

    fn apply_order_result(
        &self,
        state: &mut EngineState,
        order: PendingOrder,
        result: Result<OrderResult, ExchangeError>,
    ) {
        let (filled, fill_price) = match &result {
            Ok(fill) => (true, fill.avg_price.unwrap_or(order.trigger_price)),
            Err(_) => (false, order.trigger_price),
        };

        if let Err(e) = &result {
            self.metrics.orders_failed.inc();
            log_exchange_error(e, &format!("{} order for trade {} failed", order.side, order.trade_id));
            self.emit(EngineEvent::OrderFailed {
                id: order.trade_id,
                side: order.side,
                error: e.to_string(),
                severity: e.severity(),
            });
        }

        let transition = match state.registry.complete_order(order.trade_id, order.side, filled, fill_price) {
            Ok(Some(transition)) => transition,
            Ok(None) => return,
            Err(e) => {
                error!("Could not apply {} result for trade {}: {}", order.side, order.trade_id, e);
                return;
            }
        };

        self.emit(EngineEvent::TradeStateChanged {
            id: order.trade_id,
            from: transition.from,
            to: transition.to,
        });

        if transition.to == TradeStatus::Closed {
            let recorded = match transition.trade.realized_profit(fill_price) {
                Some(profit) => state
                    .ledger
                    .record_realized_trade(profit > Decimal::ZERO, profit)
                    .map(|()| profit),
                None => Err(LedgerError::Overflow("closing profit")),
            };
            let profit = match recorded {
                Ok(profit) => profit,
                Err(e) => {
                    error!("Trade {} closed at {} but was not accounted: {}", order.trade_id, fill_price, e);
                    self.emit(EngineEvent::OrderFailed {
                        id: order.trade_id,
                        side: order.side,
                        error: e.to_string(),
                        severity: Severity::Error,
                    });
                    return;
                }
            };

            let snapshot = state.ledger.snapshot();
            self.metrics.trades_closed.inc();
            self.metrics.set_cumulative_profit(snapshot.cumulative_profit);

            info!(
                "✅ Trade {} closed | PnL: {} | Total trades: {}",
                order.trade_id, profit, snapshot.total_trades
            );
            self.emit(EngineEvent::BalanceChanged(snapshot));
        }
    }

    async fn strategy_step(&self) {
        match self.mode {
            TradingMode::Live => {
                // Reserved for a live strategy; threshold trades run off ticks
                debug!("Live strategy step: nothing to do");
            }
            TradingMode::Simulated => {
                let snapshot = {
                    let mut state = self.state.lock().await;
                    let outcome = state.simulator.next_outcome();
                    if let Err(e) = state.ledger.record_realized_trade(outcome.success, outcome.profit) {
                        error!("Simulated trade not recorded: {}", e);
                        return;
                    }

                    info!(
                        "Simulated trade: {} ({} USDT)",
                        if outcome.success { "win" } else { "loss" },
                        outcome.profit
                    );
                    state.ledger.snapshot()
                };

                self.metrics.set_cumulative_profit(snapshot.cumulative_profit);
                self.emit(EngineEvent::BalanceChanged(snapshot));
            }
        }
    }
}

/// Forward feed events into the engine until cancelled or the feed ends
///
/// Ticks that queued up while an evaluation was running are collapsed into
/// the newest one, so thresholds are only checked against a current price.
async fn consume_feed(shared: Arc<Shared>, mut feed_rx: mpsc::Receiver<FeedEvent>, cancel: CancellationToken) {
    let mut held = None;

    loop {
        let event = match held.take() {
            Some(event) => event,
            None => {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = feed_rx.recv() => event,
                };
                match next {
                    Some(event) => event,
                    None => {
                        debug!("Price feed ended; waiting for reconnect");
                        break;
                    }
                }
            }
        };

        match event {
            FeedEvent::Tick(tick) => {
                let (tick, next) = latest_tick(tick, &mut feed_rx);
                held = next;
                shared.handle_tick(tick).await;
            }
            FeedEvent::Connected { pair } => info!("✓ Price stream connected for {}", pair),
            FeedEvent::ConnectionLost { pair, reason } => {
                warn!("✗ Price stream lost for {}: {}", pair, reason);
                shared.emit(EngineEvent::ConnectionLost { pair, reason });
            }
        }
    }
}

/// Newest of the ticks already queued behind `tick`
///
/// Stops at the first non-tick event and hands it back so it is still
/// handled in order.
fn latest_tick(mut tick: PriceTick, feed_rx: &mut mpsc::Receiver<FeedEvent>) -> (PriceTick, Option<FeedEvent>) {
    let mut skipped = 0usize;
    while let Ok(event) = feed_rx.try_recv() {
        match event {
            FeedEvent::Tick(newer) => {
                tick = newer;
                skipped += 1;
            }
            other => {
                if skipped > 0 {
                    debug!("Skipped {} stale ticks", skipped);
                }
                return (tick, Some(other));
            }
        }
    }
    if skipped > 0 {
        debug!("Skipped {} stale ticks", skipped);
    }
    (tick, None)
}

/// Periodic strategy loop; checks for cancellation at the top of each iteration
async fn run_strategy(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(shared.strategy_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if cancel.is_cancelled() || !shared.is_running() {
            break;
        }

        shared.strategy_step().await;
    }

    debug!("Strategy task exited");
}

fn log_exchange_error(e: &ExchangeError, context: &str) {
    match e.severity() {
        Severity::Error => error!("{}: {}", context, e),
        Severity::Warning => warn!("{}: {}", context, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{FeedOptions, PaperGateway};
    use rust_decimal_macros::dec;

    fn paper_engine(mode: TradingMode) -> (TradingEngine, mpsc::UnboundedReceiver<EngineEvent>) {
        let mut config = EngineConfig::new("BTCUSDT", mode);
        config.simulation_seed = Some(3);
        TradingEngine::new(
            config,
            Arc::new(PaperGateway::new(dec!(1000))),
            MarketDataFeed::new("ws://127.0.0.1:9", FeedOptions::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ticks_ignored_until_started() {
        let (engine, _events) = paper_engine(TradingMode::Live);
        let id = engine
            .add_trade(NewTrade {
                pair: "BTCUSDT".into(),
                amount: dec!(0.01),
                entry_price: dec!(30000),
                exit_price: dec!(31000),
            })
            .await
            .unwrap();

        engine.handle_tick(PriceTick::new("BTCUSDT", dec!(29000))).await;

        assert_eq!(engine.trade(id).await.unwrap().status, TradeStatus::Pending);
        assert_eq!(engine.current_price().await, Some(dec!(29000)));
    }

    #[tokio::test]
    async fn test_simulated_step_feeds_ledger() {
        let (engine, mut events) = paper_engine(TradingMode::Simulated);

        for _ in 0..5 {
            engine.run_strategy_step().await;
        }

        let account = engine.account().await;
        assert_eq!(account.total_trades, 5);
        assert!(account.successful_trades <= 5);
        assert_eq!(account.balance, account.cumulative_profit);

        let mut balance_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::BalanceChanged(_)) {
                balance_events += 1;
            }
        }
        assert_eq!(balance_events, 5);
    }

    #[tokio::test]
    async fn test_live_step_is_noop() {
        let (engine, _events) = paper_engine(TradingMode::Live);
        engine.run_strategy_step().await;
        assert_eq!(engine.account().await, AccountState::default());
    }

    #[tokio::test]
    async fn test_backlog_of_ticks_is_evaluated_at_latest_price() {
        let (engine, mut events) = paper_engine(TradingMode::Live);
        let id = engine
            .add_trade(NewTrade {
                pair: "BTCUSDT".into(),
                amount: dec!(0.01),
                entry_price: dec!(29300),
                exit_price: dec!(30000),
            })
            .await
            .unwrap();
        engine.shared.running.store(true, Ordering::SeqCst);

        // Stale dips below entry queued behind a recovered price
        let (feed_tx, feed_rx) = mpsc::channel(8);
        for _ in 0..5 {
            feed_tx.send(FeedEvent::Tick(PriceTick::new("BTCUSDT", dec!(29250)))).await.unwrap();
        }
        feed_tx.send(FeedEvent::Tick(PriceTick::new("BTCUSDT", dec!(29800)))).await.unwrap();
        feed_tx
            .send(FeedEvent::ConnectionLost {
                pair: "BTCUSDT".into(),
                reason: "closed".into(),
            })
            .await
            .unwrap();
        drop(feed_tx);

        consume_feed(Arc::clone(&engine.shared), feed_rx, CancellationToken::new()).await;

        assert_eq!(engine.trade(id).await.unwrap().status, TradeStatus::Pending);
        assert_eq!(engine.current_price().await, Some(dec!(29800)));
        assert_eq!(engine.metrics().orders_submitted.get(), 0);

        let mut prices = Vec::new();
        let mut lost = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                EngineEvent::PriceUpdated(tick) => prices.push(tick.price),
                EngineEvent::ConnectionLost { .. } => lost += 1,
                _ => {}
            }
        }
        assert_eq!(prices, vec![dec!(29800)]);
        assert_eq!(lost, 1);
    }

    #[tokio::test]
    async fn test_latest_tick_stops_at_other_events() {
        let (feed_tx, mut feed_rx) = mpsc::channel(4);
        feed_tx.send(FeedEvent::Tick(PriceTick::new("BTCUSDT", dec!(2)))).await.unwrap();
        feed_tx
            .send(FeedEvent::Connected { pair: "BTCUSDT".into() })
            .await
            .unwrap();
        feed_tx.send(FeedEvent::Tick(PriceTick::new("BTCUSDT", dec!(3)))).await.unwrap();

        let (tick, held) = latest_tick(PriceTick::new("BTCUSDT", dec!(1)), &mut feed_rx);
        assert_eq!(tick.price, dec!(2));
        assert_eq!(held, Some(FeedEvent::Connected { pair: "BTCUSDT".into() }));

        let (tick, held) = latest_tick(PriceTick::new("BTCUSDT", dec!(9)), &mut feed_rx);
        assert_eq!(tick.price, dec!(3));
        assert_eq!(held, None);
    }

    #[tokio::test]
    async fn test_reconnect_while_stopped_switches_pair() {
        let (engine, _events) = paper_engine(TradingMode::Live);
        engine.reconnect("ethusdt").await;
        assert_eq!(engine.selected_pair().await, "ETHUSDT");
        assert!(!engine.is_running());
    }
}

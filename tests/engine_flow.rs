use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spot_trader::accounting::LedgerError;
use spot_trader::exchange::binance::OrderResult;
use spot_trader::exchange::{ExchangeError, FeedOptions, InMemoryCredentialStore, OrderGateway, PaperGateway, Severity};
use spot_trader::trading::{EngineConfig, EngineError, EngineEvent, TradingEngine};
use spot_trader::utils::TradingMode;
use spot_trader::{MarketDataFeed, NewTrade, PriceTick, Side, TradeStatus};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};

/// Gateway that records calls and replays scripted failures
#[derive(Default)]
struct ScriptedGateway {
    calls: Mutex<Vec<(String, Side, Decimal)>>,
    failures: Mutex<VecDeque<ExchangeError>>,
    /// When set, every order waits for a permit
    gate: Option<Arc<Semaphore>>,
    entered: Arc<Notify>,
    /// Average price reported for sells
    sell_fill: Option<Decimal>,
}

impl ScriptedGateway {
    fn failing_once(err: ExchangeError) -> Self {
        let gateway = Self::default();
        gateway.failures.lock().unwrap().push_back(err);
        gateway
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, Side, Decimal)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderGateway for ScriptedGateway {
    async fn place_market_order(&self, pair: &str, side: Side, quantity: Decimal) -> Result<OrderResult, ExchangeError> {
        let order_id = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((pair.to_string(), side, quantity));
            calls.len() as u64
        };
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        Ok(OrderResult {
            order_id,
            symbol: pair.to_string(),
            status: Some("FILLED".into()),
            executed_qty: Some(quantity),
            avg_price: match side {
                Side::Buy => None,
                Side::Sell => self.sell_fill,
            },
        })
    }

    async fn get_balance(&self, _asset: &str) -> Result<Decimal, ExchangeError> {
        Ok(dec!(0))
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        Ok(())
    }
}

fn engine_with(
    gateway: Arc<dyn OrderGateway>,
    mode: TradingMode,
) -> (TradingEngine, mpsc::UnboundedReceiver<EngineEvent>) {
    let mut config = EngineConfig::new("BTCUSDT", mode);
    config.strategy_interval = Duration::from_secs(3600);
    config.simulation_seed = Some(11);
    TradingEngine::new(
        config,
        gateway,
        MarketDataFeed::new("ws://127.0.0.1:9", FeedOptions::default()),
    )
    .unwrap()
}

fn btc(amount: Decimal, entry: Decimal, exit: Decimal) -> NewTrade {
    NewTrade {
        pair: "BTCUSDT".into(),
        amount,
        entry_price: entry,
        exit_price: exit,
    }
}

fn tick(price: Decimal) -> PriceTick {
    PriceTick::new("BTCUSDT", price)
}

fn drain(events: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn buy_then_sell_closes_trade_and_books_profit() {
    let gateway = Arc::new(ScriptedGateway::default());
    let (engine, mut events) = engine_with(gateway.clone(), TradingMode::Live);
    engine.start().await;

    let id = engine.add_trade(btc(dec!(0.01), dec!(30000), dec!(31000))).await.unwrap();

    engine.handle_tick(tick(dec!(30500))).await;
    assert!(gateway.calls().is_empty());

    engine.handle_tick(tick(dec!(29500))).await;
    assert_eq!(gateway.calls(), vec![("BTCUSDT".to_string(), Side::Buy, dec!(0.01))]);
    assert_eq!(engine.trade(id).await.unwrap().status, TradeStatus::Active);

    // Active and below exit: nothing to do
    engine.handle_tick(tick(dec!(29000))).await;
    assert_eq!(gateway.calls().len(), 1);

    engine.handle_tick(tick(dec!(31500))).await;
    let calls = gateway.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, Side::Sell);

    let trade = engine.trade(id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Closed);
    assert!(engine.trades().await.is_empty());

    let account = engine.account().await;
    assert_eq!(account.total_trades, 1);
    assert_eq!(account.successful_trades, 1);
    assert_eq!(account.cumulative_profit, dec!(20));
    assert_eq!(account.balance, dec!(20));

    let transitions: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::TradeStateChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (TradeStatus::Pending, TradeStatus::Active),
            (TradeStatus::Active, TradeStatus::Closed),
        ]
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn rejected_order_leaves_trade_and_ledger_untouched() {
    let gateway = Arc::new(ScriptedGateway::failing_once(ExchangeError::ExchangeRejection {
        code: Some(-2010),
        msg: "Account has insufficient balance for requested action.".into(),
    }));
    let (engine, mut events) = engine_with(gateway.clone(), TradingMode::Live);
    engine.start().await;

    let id = engine.add_trade(btc(dec!(0.01), dec!(30000), dec!(31000))).await.unwrap();
    engine.handle_tick(tick(dec!(29500))).await;

    assert_eq!(engine.trade(id).await.unwrap().status, TradeStatus::Pending);
    assert_eq!(engine.account().await.total_trades, 0);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        EngineEvent::OrderFailed { side: Side::Buy, severity: Severity::Warning, .. }
    )));

    // Next qualifying tick retries
    engine.handle_tick(tick(dec!(29400))).await;
    assert_eq!(gateway.calls().len(), 2);
    assert_eq!(engine.trade(id).await.unwrap().status, TradeStatus::Active);

    engine.shutdown().await;
}

#[tokio::test]
async fn auth_failure_is_reported_as_error_and_engine_continues() {
    let gateway = Arc::new(ScriptedGateway::failing_once(ExchangeError::Auth(
        "API key not configured".into(),
    )));
    let (engine, mut events) = engine_with(gateway, TradingMode::Live);
    engine.start().await;

    let id = engine.add_trade(btc(dec!(0.01), dec!(30000), dec!(31000))).await.unwrap();
    engine.handle_tick(tick(dec!(29500))).await;

    assert!(engine.is_running());
    assert_eq!(engine.trade(id).await.unwrap().status, TradeStatus::Pending);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::OrderFailed { severity: Severity::Error, .. })));
    assert_eq!(engine.metrics().orders_failed.get(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn no_second_order_while_one_is_in_flight() {
    let gate = Arc::new(Semaphore::new(0));
    let gateway = Arc::new(ScriptedGateway::gated(gate.clone()));
    let (engine, _events) = engine_with(gateway.clone(), TradingMode::Live);
    let engine = Arc::new(engine);
    engine.start().await;

    let id = engine.add_trade(btc(dec!(0.01), dec!(30000), dec!(31000))).await.unwrap();

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.handle_tick(tick(dec!(29500))).await })
    };
    gateway.entered.notified().await;

    // The buy is still outstanding; further ticks must not submit again
    engine.handle_tick(tick(dec!(29400))).await;
    engine.handle_tick(tick(dec!(29300))).await;
    assert_eq!(gateway.calls().len(), 1);
    assert_eq!(engine.trade(id).await.unwrap().status, TradeStatus::Pending);

    gate.add_permits(1);
    first.await.unwrap();
    assert_eq!(engine.trade(id).await.unwrap().status, TradeStatus::Active);
    assert_eq!(gateway.calls().len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn stopped_engine_ignores_ticks() {
    let gateway = Arc::new(ScriptedGateway::default());
    let (engine, mut events) = engine_with(gateway.clone(), TradingMode::Live);

    engine.start().await;
    engine.add_trade(btc(dec!(0.01), dec!(30000), dec!(31000))).await.unwrap();
    engine.stop().await;
    assert!(!engine.is_running());

    engine.handle_tick(tick(dec!(29000))).await;
    assert!(gateway.calls().is_empty());
    assert_eq!(engine.current_price().await, Some(dec!(29000)));

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, EngineEvent::Started { pair } if pair == "BTCUSDT")));
    assert!(events.contains(&EngineEvent::Stopped));

    // Restart resumes evaluation
    engine.start().await;
    engine.handle_tick(tick(dec!(29000))).await;
    assert_eq!(gateway.calls().len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn cancelled_trade_never_places_an_order() {
    let gateway = Arc::new(ScriptedGateway::default());
    let (engine, _events) = engine_with(gateway.clone(), TradingMode::Live);
    engine.start().await;

    let id = engine.add_trade(btc(dec!(0.01), dec!(30000), dec!(31000))).await.unwrap();
    let cancelled = engine.cancel_trade(id).await.unwrap();
    assert_eq!(cancelled.status, TradeStatus::Cancelled);

    engine.handle_tick(tick(dec!(29000))).await;
    assert!(gateway.calls().is_empty());
    assert!(engine.cancel_trade(id).await.is_err());

    engine.shutdown().await;
}

#[tokio::test]
async fn connection_loss_is_reported_and_engine_keeps_running() {
    let (engine, mut events) = engine_with(Arc::new(ScriptedGateway::default()), TradingMode::Live);
    engine.start().await;

    let lost = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            if let EngineEvent::ConnectionLost { pair, .. } = event {
                return Some(pair);
            }
        }
        None
    })
    .await
    .unwrap();

    assert_eq!(lost.as_deref(), Some("BTCUSDT"));
    assert!(engine.is_running());

    engine.reconnect("ethusdt").await;
    assert_eq!(engine.selected_pair().await, "ETHUSDT");
    assert!(engine.is_running());

    engine.shutdown().await;
}

#[tokio::test]
async fn withdrawal_takes_share_of_profit() {
    let (engine, mut events) = engine_with(Arc::new(ScriptedGateway::default()), TradingMode::Live);
    engine.start().await;

    assert!(!engine.is_withdrawal_eligible().await);
    assert!(matches!(
        engine.withdraw().await,
        Err(EngineError::Ledger(LedgerError::NotEligible { .. }))
    ));

    engine.add_trade(btc(dec!(1), dec!(30000), dec!(31000))).await.unwrap();
    engine.handle_tick(tick(dec!(29500))).await;
    engine.handle_tick(tick(dec!(31000))).await;
    assert_eq!(engine.account().await.cumulative_profit, dec!(1500));

    assert!(engine.is_withdrawal_eligible().await);
    assert_eq!(engine.withdraw().await.unwrap(), dec!(750));

    let account = engine.account().await;
    assert_eq!(account.cumulative_profit, dec!(750));
    assert_eq!(account.balance, dec!(1500));
    assert!(drain(&mut events).contains(&EngineEvent::Withdrawal { amount: dec!(750) }));

    engine.shutdown().await;
}

#[tokio::test]
async fn paper_session_refreshes_balance_and_fills_locally() {
    let gateway = Arc::new(PaperGateway::new(dec!(1000)));
    let (engine, _events) = engine_with(gateway.clone(), TradingMode::Simulated);

    engine.check_connectivity().await.unwrap();
    assert_eq!(engine.refresh_balance("USDT").await.unwrap(), dec!(1000));
    assert_eq!(engine.account().await.balance, dec!(1000));

    engine.start().await;
    engine.add_trade(btc(dec!(0.01), dec!(30000), dec!(31000))).await.unwrap();
    engine.handle_tick(tick(dec!(29950))).await;
    engine.handle_tick(tick(dec!(31050))).await;

    let orders = gateway.orders().await;
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].side, Side::Buy);
    assert_eq!(orders[1].side, Side::Sell);

    let credentials = InMemoryCredentialStore::with_credentials("k", "s");
    engine.end_session(&credentials).await;
    assert!(!engine.is_running());
    assert!(engine.trades().await.is_empty());
    assert_eq!(engine.account().await, Default::default());
    assert!(spot_trader::CredentialStore::credentials(&credentials).await.is_err());
}

#[tokio::test]
async fn unaccountable_sell_fill_is_reported_and_engine_continues() {
    let gateway = Arc::new(ScriptedGateway {
        sell_fill: Some(Decimal::MAX),
        ..ScriptedGateway::default()
    });
    let (engine, mut events) = engine_with(gateway.clone(), TradingMode::Live);
    engine.start().await;

    let id = engine.add_trade(btc(dec!(10000000000), dec!(1), dec!(2))).await.unwrap();
    engine.handle_tick(tick(dec!(1))).await;
    engine.handle_tick(tick(dec!(2))).await;
    assert_eq!(gateway.calls().len(), 2);

    // (MAX - 1) x 1e10 cannot be booked
    assert_eq!(engine.trade(id).await.unwrap().status, TradeStatus::Closed);
    let account = engine.account().await;
    assert_eq!(account.total_trades, 0);
    assert_eq!(account.balance, dec!(0));

    let failures: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::OrderFailed { id, side, severity, .. } => Some((id, side, severity)),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![(id, Side::Sell, Severity::Error)]);

    // Later trades still run
    assert!(engine.is_running());
    let next = engine.add_trade(btc(dec!(0.01), dec!(30000), dec!(31000))).await.unwrap();
    engine.handle_tick(tick(dec!(29000))).await;
    assert_eq!(engine.trade(next).await.unwrap().status, TradeStatus::Active);

    engine.shutdown().await;
}

#[tokio::test]
async fn oversized_trade_is_refused() {
    let (engine, _events) = engine_with(Arc::new(ScriptedGateway::default()), TradingMode::Live);
    let err = engine
        .add_trade(btc(Decimal::MAX, dec!(1), dec!(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Registry(_)));
    assert!(engine.trades().await.is_empty());
}

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data::PriceTick;
use crate::exchange::binance::types::TradeStreamMessage;
use crate::exchange::errors::{ExchangeError, Result};

/// Events emitted by the price stream
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Connected { pair: String },
    Tick(PriceTick),
    /// No further ticks arrive until the feed is reconnected
    /// (or the next automatic retry succeeds)
    ConnectionLost { pair: String, reason: String },
}

/// Stream connection behaviour
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Retry with exponential backoff after a drop instead of going quiet
    pub auto_reconnect: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub ping_interval: Duration,
    /// Events buffered before the connection task waits for the consumer
    pub channel_capacity: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: false,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            channel_capacity: 16,
        }
    }
}

struct Subscription {
    pair: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One `<pair>@trade` subscription at a time
pub struct MarketDataFeed {
    ws_endpoint: String,
    options: FeedOptions,
    active: Option<Subscription>,
}

impl MarketDataFeed {
    /// Create a feed against a raw-stream endpoint such as
    /// `wss://stream.binance.com:9443/ws`
    pub fn new(ws_endpoint: impl Into<String>, options: FeedOptions) -> Self {
        Self {
            ws_endpoint: ws_endpoint.into(),
            options,
            active: None,
        }
    }

    pub fn stream_url(&self, pair: &str) -> String {
        format!(
            "{}/{}@trade",
            self.ws_endpoint.trim_end_matches('/'),
            pair.to_lowercase()
        )
    }

    /// Open a subscription for `pair`, replacing any existing one
    ///
    /// Spawns the connection task; must be called inside a tokio runtime.
    /// The channel is bounded: a slow consumer holds the stream back
    /// instead of queueing ticks without limit.
    pub fn subscribe(&mut self, pair: &str) -> mpsc::Receiver<FeedEvent> {
        self.close();

        let (event_tx, event_rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let url = self.stream_url(pair);

        let handle = tokio::spawn(run_stream(
            url,
            pair.to_string(),
            self.options.clone(),
            event_tx,
            cancel.clone(),
        ));

        self.active = Some(Subscription {
            pair: pair.to_string(),
            cancel,
            handle,
        });

        event_rx
    }

    /// Tear down the current subscription and open a new one for `pair`
    pub fn reconnect(&mut self, pair: &str) -> mpsc::Receiver<FeedEvent> {
        info!("Reconnecting price stream for {}", pair);
        self.subscribe(pair)
    }

    /// Tear down the current subscription, if any
    pub fn close(&mut self) {
        if let Some(sub) = self.active.take() {
            debug!("Closing price stream for {}", sub.pair);
            sub.cancel.cancel();
            drop(sub.handle);
        }
    }

    pub fn current_pair(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.pair.as_str())
    }

    /// Whether the connection task for the current subscription is still alive
    pub fn is_active(&self) -> bool {
        self.active.as_ref().map(|s| !s.handle.is_finished()).unwrap_or(false)
    }
}

impl Drop for MarketDataFeed {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parse a `<pair>@trade` frame into a tick
pub fn parse_trade_frame(pair: &str, text: &str) -> Result<PriceTick> {
    let msg: TradeStreamMessage = serde_json::from_str(text)?;
    let price = msg
        .parse_price()
        .ok_or_else(|| ExchangeError::Parse(format!("invalid price field: {}", msg.price)))?;

    let timestamp = msg
        .trade_time
        .and_then(|t| Utc.timestamp_millis_opt(t as i64).single())
        .unwrap_or_else(Utc::now);

    Ok(PriceTick {
        pair: pair.to_uppercase(),
        price,
        timestamp,
    })
}

/// Connection task: connect, forward ticks, report drops
async fn run_stream(
    url: String,
    pair: String,
    options: FeedOptions,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
) {
    let mut reconnect_delay = options.initial_backoff;

    loop {
        info!("Connecting to Binance trade stream: {}", url);

        let err = tokio::select! {
            _ = cancel.cancelled() => return,
            err = connect_and_process(&url, &pair, &options, &event_tx) => err,
        };

        if cancel.is_cancelled() || event_tx.is_closed() {
            return;
        }

        // A drop after a good connection starts the backoff over
        if matches!(err, ExchangeError::ConnectionLost(_)) {
            reconnect_delay = options.initial_backoff;
        }

        warn!("Price stream for {} lost: {}", pair, err);
        let lost = FeedEvent::ConnectionLost {
            pair: pair.clone(),
            reason: err.to_string(),
        };
        let delivered = tokio::select! {
            _ = cancel.cancelled() => return,
            sent = event_tx.send(lost) => sent.is_ok(),
        };
        if !delivered {
            return;
        }

        if !options.auto_reconnect {
            return;
        }

        info!("Reconnecting in {:?}", reconnect_delay);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, options.max_backoff);
    }
}

/// Connect and process messages until the connection ends
///
/// Always returns the reason the stream stopped: `Network` when it could
/// not be established or failed, `ConnectionLost` when an open stream was
/// closed or the consumer went away.
async fn connect_and_process(
    url: &str,
    pair: &str,
    options: &FeedOptions,
    event_tx: &mpsc::Sender<FeedEvent>,
) -> ExchangeError {
    let ws_stream = match connect_async(url).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => return ExchangeError::Network(format!("WebSocket connection failed: {}", e)),
    };

    info!("WebSocket connected successfully");
    if event_tx.send(FeedEvent::Connected { pair: pair.to_string() }).await.is_err() {
        return ExchangeError::ConnectionLost("event receiver dropped".into());
    }

    let (mut write, mut read) = ws_stream.split();

    // Keep connection alive
    let mut ping = tokio::time::interval(options.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping.tick().await;

    loop {
        tokio::select! {
            msg = read.next() => {
                let msg = match msg {
                    Some(msg) => msg,
                    None => return ExchangeError::ConnectionLost("stream closed by server".into()),
                };

                match msg {
                    Ok(Message::Text(text)) => match parse_trade_frame(pair, &text) {
                        Ok(tick) => {
                            // Waits while the consumer is behind
                            if event_tx.send(FeedEvent::Tick(tick)).await.is_err() {
                                return ExchangeError::ConnectionLost("event receiver dropped".into());
                            }
                        }
                        Err(e) => warn!("Error processing message: {}", e),
                    },
                    Ok(Message::Ping(_)) => debug!("Received ping"),
                    Ok(Message::Pong(_)) => debug!("Received pong"),
                    Ok(Message::Close(_)) => {
                        info!("Received close frame");
                        return ExchangeError::ConnectionLost("close frame received".into());
                    }
                    Err(e) => {
                        return ExchangeError::Network(format!("WebSocket error: {}", e));
                    }
                    _ => {}
                }
            }
            _ = ping.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return ExchangeError::Network(format!("ping failed: {}", e));
                }
            }
        }
    }
}

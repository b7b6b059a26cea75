use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

use crate::data::Side;
use crate::exchange::binance::auth::{current_timestamp, Method, SignedRequest, SignedRequestBuilder};
use crate::exchange::binance::types::{AccountResponse, OrderResponse, OrderResult};
use crate::exchange::credentials::CredentialStore;
use crate::exchange::errors::{ExchangeError, Result};
use crate::exchange::gateway::OrderGateway;

const ORDER_PATH: &str = "/api/v3/order";
const ACCOUNT_PATH: &str = "/api/v3/account";
const PING_PATH: &str = "/api/v3/ping";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Binance Spot REST API client
pub struct BinanceRestClient {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialStore>,
    signer: SignedRequestBuilder,
}

impl BinanceRestClient {
    /// Create new REST client
    ///
    /// Credentials are read from `credentials` on every call and never cached.
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            credentials,
            signer: SignedRequestBuilder::default(),
        })
    }

    /// Replace the default in-process HMAC signer
    pub fn with_signer(mut self, signer: SignedRequestBuilder) -> Self {
        self.signer = signer;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Load credentials and sign `params` for `path`
    async fn sign(&self, method: Method, path: &str, params: Vec<(String, String)>) -> Result<(String, SignedRequest)> {
        let creds = self.credentials.credentials().await?;
        let request = self
            .signer
            .build(method, path, params, &creds.api_secret, current_timestamp())
            .await?;
        Ok((creds.api_key, request))
    }

    /// Place a market order
    ///
    /// Success requires a transport-level response whose JSON body carries
    /// `orderId`. One attempt only.
    pub async fn place_market_order(&self, symbol: &str, side: Side, quantity: Decimal) -> Result<OrderResult> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), side.as_str().to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), quantity.normalize().to_string()),
        ];

        let (api_key, request) = self.sign(Method::Post, ORDER_PATH, params).await?;
        let url = self.endpoint(ORDER_PATH)?;

        info!("Submitting MARKET {} {} {}", side, quantity, symbol);

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(request.query_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        let parsed: OrderResponse = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Parse(format!("HTTP {} order body: {}", status, e)))?;

        match parsed.into_result(symbol) {
            Ok(result) => {
                info!("Order executed successfully: {} {} (id {})", side, symbol, result.order_id);
                Ok(result)
            }
            Err(e) => {
                error!("Order failed: {} - {}", status, e);
                Err(e)
            }
        }
    }

    /// Get free balance for an asset
    ///
    /// Missing assets and malformed bodies are logged and reported as zero.
    pub async fn get_balance(&self, asset: &str) -> Result<Decimal> {
        let (api_key, request) = self.sign(Method::Get, ACCOUNT_PATH, Vec::new()).await?;
        let mut url = self.endpoint(ACCOUNT_PATH)?;
        url.set_query(Some(&request.query_string()));

        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;

        let body = response.text().await?;

        if let Ok(OrderResponse { msg: Some(msg), code, .. }) = serde_json::from_str::<OrderResponse>(&body) {
            return Err(ExchangeError::ExchangeRejection { code, msg });
        }

        let account: AccountResponse = match serde_json::from_str(&body) {
            Ok(account) => account,
            Err(e) => {
                warn!("Malformed account response, reporting zero {} balance: {}", asset, e);
                return Ok(Decimal::ZERO);
            }
        };

        match account.free_balance(asset) {
            Some(free) => Ok(free),
            None => {
                warn!("Asset {} not present in account balances", asset);
                Ok(Decimal::ZERO)
            }
        }
    }

    /// Test connectivity to Binance API
    pub async fn ping(&self) -> Result<()> {
        let url = self.endpoint(PING_PATH)?;
        let response = self.client.get(url).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ExchangeError::Network(format!(
                "Connectivity test failed: HTTP {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl OrderGateway for BinanceRestClient {
    async fn place_market_order(&self, pair: &str, side: Side, quantity: Decimal) -> Result<OrderResult> {
        BinanceRestClient::place_market_order(self, pair, side, quantity).await
    }

    async fn get_balance(&self, asset: &str) -> Result<Decimal> {
        BinanceRestClient::get_balance(self, asset).await
    }

    async fn ping(&self) -> Result<()> {
        BinanceRestClient::ping(self).await
    }
}

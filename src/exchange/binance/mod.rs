pub mod types;
pub mod websocket;
pub mod rest;
pub mod auth;

pub use types::*;
pub use websocket::{FeedEvent, FeedOptions, MarketDataFeed};
pub use rest::BinanceRestClient;
pub use auth::{HmacSha256Signer, RequestSigner, SignedRequest, SignedRequestBuilder};

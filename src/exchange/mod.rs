pub mod binance;
pub mod credentials;
pub mod errors;
pub mod gateway;

pub use binance::{BinanceRestClient, FeedEvent, FeedOptions, MarketDataFeed, OrderResult};
pub use credentials::{CredentialKey, CredentialStore, Credentials, EnvCredentialStore, InMemoryCredentialStore};
pub use errors::{ExchangeError, Severity};
pub use gateway::{OrderGateway, PaperGateway, PaperOrder};

//! Exchange error taxonomy
//!
//! Every failure an order attempt, balance query or stream can produce.
//! None of these are fatal to the engine; `severity()` picks the log level.

use thiserror::Error;

/// Result type for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Log severity attached to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    /// Missing or invalid credentials
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Signing error: {0}")]
    Signature(String),

    #[error("Network error: {0}")]
    Network(String),

    /// Well-formed response reporting a business failure
    #[error("Exchange rejected request ({}): {msg}", rejection_code(.code))]
    ExchangeRejection { code: Option<i64>, msg: String },

    #[error("Malformed response: {0}")]
    Parse(String),

    #[error("Stream connection lost: {0}")]
    ConnectionLost(String),
}

fn rejection_code(code: &Option<i64>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "no code".to_string())
}

impl ExchangeError {
    pub fn severity(&self) -> Severity {
        match self {
            ExchangeError::Auth(_) | ExchangeError::Signature(_) => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> Self {
        Self::Network(format!("invalid endpoint: {}", err))
    }
}

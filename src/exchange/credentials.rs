//! API credential access
//!
//! The engine never persists keys itself. It reads them through a
//! `CredentialStore` on every authenticated call, so the backing medium
//! (environment, keychain, browser storage bridge) stays outside the core.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::exchange::errors::{ExchangeError, Result};

/// Keys understood by a credential store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    ApiKey,
    ApiSecret,
}

impl CredentialKey {
    pub fn name(&self) -> &'static str {
        match self {
            CredentialKey::ApiKey => "apiKey",
            CredentialKey::ApiSecret => "apiSecret",
        }
    }
}

/// API key pair loaded for a single request
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Opaque get/set/clear storage for API credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: CredentialKey) -> Option<String>;

    async fn set(&self, key: CredentialKey, value: String);

    /// Forget all stored credentials
    async fn clear(&self);

    /// Load both halves of the key pair
    ///
    /// Absence (or an empty value) is a hard precondition failure.
    async fn credentials(&self) -> Result<Credentials> {
        let api_key = self
            .get(CredentialKey::ApiKey)
            .await
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ExchangeError::Auth("API key not configured".into()))?;
        let api_secret = self
            .get(CredentialKey::ApiSecret)
            .await
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ExchangeError::Auth("API secret not configured".into()))?;

        Ok(Credentials { api_key, api_secret })
    }
}

/// Thread-safe in-memory credential store
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    values: Arc<RwLock<HashMap<CredentialKey, String>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a key pair
    pub fn with_credentials(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        let mut values = HashMap::new();
        values.insert(CredentialKey::ApiKey, api_key.into());
        values.insert(CredentialKey::ApiSecret, api_secret.into());
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, key: CredentialKey) -> Option<String> {
        self.values.read().await.get(&key).cloned()
    }

    async fn set(&self, key: CredentialKey, value: String) {
        self.values.write().await.insert(key, value);
        info!("[CredentialStore] Stored {}", key.name());
    }

    async fn clear(&self) {
        let mut values = self.values.write().await;
        let count = values.len();
        values.clear();
        if count > 0 {
            info!("[CredentialStore] Cleared {} stored credentials", count);
        }
    }
}

/// Credentials taken from `BINANCE_API_KEY` / `BINANCE_SECRET_KEY`
///
/// Values are snapshotted at construction; `set` and `clear` only affect the
/// process-local copy, never the environment.
#[derive(Clone)]
pub struct EnvCredentialStore {
    inner: InMemoryCredentialStore,
}

impl EnvCredentialStore {
    pub const API_KEY_VAR: &'static str = "BINANCE_API_KEY";
    pub const SECRET_KEY_VAR: &'static str = "BINANCE_SECRET_KEY";

    pub fn from_env() -> Self {
        let mut values = HashMap::new();
        if let Ok(key) = std::env::var(Self::API_KEY_VAR) {
            values.insert(CredentialKey::ApiKey, key);
        }
        if let Ok(secret) = std::env::var(Self::SECRET_KEY_VAR) {
            values.insert(CredentialKey::ApiSecret, secret);
        }
        Self {
            inner: InMemoryCredentialStore {
                values: Arc::new(RwLock::new(values)),
            },
        }
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get(&self, key: CredentialKey) -> Option<String> {
        self.inner.get(key).await
    }

    async fn set(&self, key: CredentialKey, value: String) {
        self.inner.set(key, value).await
    }

    async fn clear(&self) {
        self.inner.clear().await
    }
}

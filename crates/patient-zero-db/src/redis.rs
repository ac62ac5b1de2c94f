//! Redis hash backend.
//!
//! All participant records live in one hash. Each field is a stringified
//! participant ID and each value is the JSON-encoded record.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `PZ:Users` | Hash | `{participant_id}` -> JSON [`UserRecord`] |
//!
//! [`UserRecord`]: patient_zero_types::UserRecord

use async_trait::async_trait;
use fred::prelude::*;

use crate::backend::RecordBackend;
use crate::error::StoreError;

/// Name of the hash holding every participant record.
pub const USERS_HASH: &str = "PZ:Users";

/// Connection handle to a Redis instance.
///
/// Wraps a [`fred::prelude::Client`] and reads/writes fields of a single
/// hash (by default [`USERS_HASH`]).
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    hash: String,
}

impl RedisBackend {
    /// Connect to Redis at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Redis`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Redis URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!(hash = USERS_HASH, "Connected to Redis");
        Ok(Self {
            client,
            hash: USERS_HASH.to_owned(),
        })
    }

    /// Use a different hash name (for isolating test runs).
    #[must_use]
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = hash.into();
        self
    }

    /// Name of the hash this backend reads and writes.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Delete the whole hash.
    ///
    /// **WARNING:** This deletes every participant record. Only use for
    /// testing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if the delete fails.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _: u32 = self.client.del(self.hash.as_str()).await?;
        Ok(())
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl RecordBackend for RedisBackend {
    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.client.hget(self.hash.as_str(), key).await?;
        Ok(value)
    }

    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _: i64 = self.client.hset(self.hash.as_str(), (key, value)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

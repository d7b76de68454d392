//! Refresh token persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use super::RefreshToken;
use super::document;
use crate::error::Result;

/// Durable store of refresh tokens, keyed by token string.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Persist a new record.
    async fn insert(&self, token: &RefreshToken) -> Result<()>;

    /// Find a record by its token string.
    async fn find(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Delete a record. Returns whether it existed.
    async fn remove(&self, token: &str) -> Result<bool>;

    /// Delete every record bound to `user_id`.
    async fn remove_for_user(&self, user_id: &str) -> Result<u64>;

    /// Delete every record that expired before `now`.
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// In-process repository.
///
/// Records are kept as encoded documents, so reads and writes go through
/// the same mapping as a database would.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    documents: RwLock<HashMap<String, Value>>,
}

impl MemoryRepository {
    /// Create a new empty [`MemoryRepository`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether no record is stored.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn decode_all(documents: &HashMap<String, Value>) -> Result<Vec<RefreshToken>> {
        documents
            .values()
            .map(|doc| document::decode(doc).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryRepository {
    async fn insert(&self, token: &RefreshToken) -> Result<()> {
        self.documents
            .write()
            .await
            .insert(token.token.clone(), document::encode(token));
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<RefreshToken>> {
        match self.documents.read().await.get(token) {
            Some(doc) => Ok(Some(document::decode(doc)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, token: &str) -> Result<bool> {
        Ok(self.documents.write().await.remove(token).is_some())
    }

    async fn remove_for_user(&self, user_id: &str) -> Result<u64> {
        let mut documents = self.documents.write().await;
        let owned: Vec<String> = Self::decode_all(&documents)?
            .into_iter()
            .filter(|record| record.user_id == user_id)
            .map(|record| record.token)
            .collect();

        for token in &owned {
            documents.remove(token);
        }

        Ok(owned.len() as u64)
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut documents = self.documents.write().await;
        let expired: Vec<String> = Self::decode_all(&documents)?
            .into_iter()
            .filter(|record| record.is_expired(now))
            .map(|record| record.token)
            .collect();

        for token in &expired {
            documents.remove(token);
        }

        Ok(expired.len() as u64)
    }
}

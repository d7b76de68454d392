//! Refresh tokens: issue, exchange for access tokens, rotate and reap.

pub mod document;
pub mod postgres;
pub mod repository;

pub use postgres::PgRefreshTokenRepository;
pub use repository::{MemoryRepository, RefreshTokenRepository};

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::crypto;
use crate::error::{Result, ServerError};
use crate::identity::Identity;
use crate::token::TokenManager;

pub const DEFAULT_TTL_DAYS: i64 = 15;

/// A persisted refresh token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshToken {
    /// Opaque token string handed to the client.
    pub token: String,
    /// Identity the token is bound to.
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Whether the token can no longer be exchanged at `now`.
    ///
    /// A token is still valid at its exact expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at < now
    }
}

/// Why a refresh token was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh token is not in database")]
    NotFound,
    #[error("refresh token expired on {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
}

impl RefreshError {
    /// Stable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshError::NotFound => "invalid_refresh_token",
            RefreshError::Expired { .. } => "expired_refresh_token",
        }
    }
}

/// What happens to a refresh token once exchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    /// Delete the presented token and hand out a new one.
    #[default]
    Rotate,
    /// Keep the presented token valid until it expires.
    Reuse,
}

/// Result of a successful exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    /// Token to present on the next exchange.
    pub refresh_token: RefreshToken,
}

/// Refresh token lifecycle manager.
#[derive(Clone)]
pub struct RefreshTokenService {
    repo: Arc<dyn RefreshTokenRepository>,
    token: TokenManager,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    rotation: Rotation,
}

impl RefreshTokenService {
    /// Create a new [`RefreshTokenService`].
    pub fn new(
        repo: Arc<dyn RefreshTokenRepository>,
        token: TokenManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            token,
            clock,
            ttl: Duration::days(DEFAULT_TTL_DAYS),
            rotation: Rotation::default(),
        }
    }

    /// Update refresh token time-to-live (TTL).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Update rotation policy.
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Access token issuer used on exchange.
    pub fn token_manager(&self) -> &TokenManager {
        &self.token
    }

    /// Generate and persist a new refresh token for `identity`.
    pub async fn create(&self, identity: &Identity) -> Result<RefreshToken> {
        self.create_for(&identity.id).await
    }

    async fn create_for(&self, user_id: &str) -> Result<RefreshToken> {
        let now = self.clock.now();
        let expire_at = now.checked_add_signed(self.ttl).ok_or_else(|| {
            ServerError::Internal(format!("refresh token lifetime {} is out of range", self.ttl))
        })?;
        let token = RefreshToken {
            token: crypto::random_token(),
            user_id: user_id.to_owned(),
            created_at: now,
            expire_at,
        };

        self.repo.insert(&token).await?;
        tracing::debug!(user_id, expire_at = %token.expire_at, "refresh token created");

        Ok(token)
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_access_token(&self, token: &str) -> Result<Session> {
        let outcome = self.exchange(token).await;

        let label = match &outcome {
            Ok(_) => "success",
            Err(ServerError::Refresh(err)) => err.kind(),
            Err(_) => "error",
        };
        metrics::counter!("refresh_total", "outcome" => label).increment(1);

        outcome
    }

    async fn exchange(&self, token: &str) -> Result<Session> {
        let record = self
            .repo
            .find(token)
            .await?
            .ok_or(RefreshError::NotFound)?;

        if record.is_expired(self.clock.now()) {
            return Err(RefreshError::Expired {
                expired_at: record.expire_at,
            }
            .into());
        }

        let access_token = self.token.issue(&record.user_id)?;

        let refresh_token = match self.rotation {
            Rotation::Reuse => record,
            Rotation::Rotate => {
                // The presented token stays usable until its replacement
                // is stored.
                let rotated = self.create_for(&record.user_id).await?;

                // Only the caller that actually deleted the presented
                // record keeps its replacement.
                match self.repo.remove(token).await {
                    Ok(true) => (),
                    Ok(false) => {
                        self.discard(&rotated).await;
                        return Err(RefreshError::NotFound.into());
                    },
                    Err(err) => {
                        self.discard(&rotated).await;
                        return Err(err);
                    },
                }

                tracing::info!(user_id = %record.user_id, "refresh token rotated");
                rotated
            },
        };

        Ok(Session {
            access_token,
            refresh_token,
        })
    }

    async fn discard(&self, token: &RefreshToken) {
        if let Err(err) = self.repo.remove(&token.token).await {
            tracing::warn!(error = %err, user_id = %token.user_id, "unused refresh token left for the reaper");
        }
    }

    /// Revoke a single refresh token.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        if !self.repo.remove(token).await? {
            return Err(RefreshError::NotFound.into());
        }

        Ok(())
    }

    /// Revoke every refresh token of a user.
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64> {
        let count = self.repo.remove_for_user(user_id).await?;
        tracing::info!(user_id, count, "refresh tokens revoked");
        Ok(count)
    }

    /// Delete expired refresh tokens.
    pub async fn reap(&self) -> Result<u64> {
        let count = self.repo.remove_expired(self.clock.now()).await?;
        metrics::counter!("refresh_tokens_reaped_total").increment(count);
        Ok(count)
    }
}

/// Periodically delete expired refresh tokens.
pub fn spawn_reaper(service: Arc<RefreshTokenService>, every: StdDuration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);

        loop {
            interval.tick().await;

            match service.reap().await {
                Ok(0) => (),
                Ok(count) => tracing::info!(count, "expired refresh tokens reaped"),
                Err(err) => tracing::error!(error = %err, "failed to reap refresh tokens"),
            }
        }
    })
}

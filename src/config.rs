//! Configuration manager for sessiond.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::refresh::{DEFAULT_TTL_DAYS, Rotation};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";
const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Environment variable overriding `token.secret`.
pub const SECRET_ENV: &str = "TOKEN_SECRET";
/// Longest accepted access token lifetime, one day.
pub const MAX_EXPIRATION_MS: u64 = 1000 * 60 * 60 * 24;
/// Longest accepted refresh token lifetime, ten years.
pub const MAX_TTL_DAYS: i64 = 3650;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Socket address to listen on.
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to JsonWebToken configuration.
    #[serde(skip_serializing)]
    pub token: Option<Token>,
    /// Related to refresh token lifecycle.
    #[serde(default, skip_serializing)]
    pub refresh: Refresh,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Accounts allowed to sign in.
    #[serde(default, skip_serializing)]
    pub users: Vec<User>,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_owned()
}

/// Json Web Token configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    /// HS512 signing secret.
    #[serde(default)]
    pub secret: String,
    /// Access token lifetime in milliseconds.
    #[serde(default = "default_expiration")]
    pub expiration_ms: u64,
}

fn default_expiration() -> u64 {
    crate::token::EXPIRATION_TIME
}

impl Token {
    /// Access token lifetime, once checked.
    pub fn lifetime(&self) -> Result<u64> {
        if !(1..=MAX_EXPIRATION_MS).contains(&self.expiration_ms) {
            return Err(ServerError::Configuration(format!(
                "`token.expiration_ms` must be between 1 and {MAX_EXPIRATION_MS}, got {}",
                self.expiration_ms
            )));
        }

        Ok(self.expiration_ms)
    }
}

/// Refresh token configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Refresh {
    /// Lifetime of a refresh token, in days.
    pub ttl_days: i64,
    pub rotation: Rotation,
    /// Delay between two purges of expired tokens.
    pub reap_interval_secs: u64,
}

impl Refresh {
    /// Refresh token lifetime, once checked.
    pub fn ttl(&self) -> Result<chrono::Duration> {
        if !(1..=MAX_TTL_DAYS).contains(&self.ttl_days) {
            return Err(ServerError::Configuration(format!(
                "`refresh.ttl_days` must be between 1 and {MAX_TTL_DAYS}, got {}",
                self.ttl_days
            )));
        }

        chrono::Duration::try_days(self.ttl_days).ok_or_else(|| {
            ServerError::Configuration(format!("`refresh.ttl_days` {} is out of range", self.ttl_days))
        })
    }
}

impl Default for Refresh {
    fn default() -> Self {
        Self {
            ttl_days: DEFAULT_TTL_DAYS,
            rotation: Rotation::Rotate,
            reap_interval_secs: 60 * 60,
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Account entry.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Argon2id PHC string.
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let config = match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        Arc::new(config.finish(std::env::var(SECRET_ENV).ok()))
    }

    /// Apply environment overrides and set app version.
    fn finish(mut self, secret: Option<String>) -> Self {
        self.version = VERSION.to_owned();

        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.token.get_or_insert_with(|| Token {
                expiration_ms: default_expiration(),
                ..Default::default()
            })
            .secret = secret;
        }

        self
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, path = %self.path.display(), "`config.yaml` cannot be read");
        Self {
            address: default_address(),
            ..Default::default()
        }
    }
}

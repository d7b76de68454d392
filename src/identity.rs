//! Identities and the directory that authenticates them.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use validator::{ValidationError, ValidationErrors};

use crate::config::User as UserConfig;
use crate::crypto::{self, PasswordManager};
use crate::error::Result;

/// Role given to every registered identity.
pub const DEFAULT_ROLE: &str = "CLIENT";

/// An authenticated principal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub roles: Vec<String>,
}

/// Resolves credentials and subject identifiers to identities.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Check credentials.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Identity>;

    /// Find an identity from a token subject.
    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>>;

    /// Create an identity with [`DEFAULT_ROLE`].
    async fn register(&self, username: &str, password: &str) -> Result<Identity>;
}

pub(crate) fn invalid_credentials() -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add(
        "password",
        ValidationError::new("invalid_credentials")
            .with_message("Invalid username or password.".into()),
    );
    errors
}

pub(crate) fn username_taken() -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add(
        "username",
        ValidationError::new("taken").with_message("Username is already taken.".into()),
    );
    errors
}

struct Entry {
    identity: Identity,
    password: String,
}

/// Directory seeded from the `users` entry of `config.yaml`.
///
/// Registered identities live in memory only.
pub struct MemoryDirectory {
    pwd: PasswordManager,
    /// Checked instead when the username is unknown, so both failures cost
    /// one Argon2 verification.
    dummy: String,
    by_username: RwLock<HashMap<String, Entry>>,
}

impl MemoryDirectory {
    /// Create a new [`MemoryDirectory`].
    pub fn new(pwd: PasswordManager, users: &[UserConfig]) -> Result<Self> {
        let dummy = pwd.hash_password(crypto::random_token())?;
        let by_username = users
            .iter()
            .map(|user| {
                let entry = Entry {
                    identity: Identity {
                        id: user.id.clone(),
                        username: user.username.clone(),
                        roles: user.roles.clone(),
                    },
                    password: user.password.clone(),
                };
                (user.username.to_lowercase(), entry)
            })
            .collect();

        Ok(Self {
            pwd,
            dummy,
            by_username: RwLock::new(by_username),
        })
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Identity> {
        let found = self
            .by_username
            .read()
            .await
            .get(&username.to_lowercase())
            .map(|entry| (entry.identity.clone(), entry.password.clone()));

        let phc = found
            .as_ref()
            .map_or(self.dummy.as_str(), |(_, phc)| phc.as_str());
        let verified = self.pwd.verify_password(password, phc);

        match found {
            Some((identity, _)) if verified => Ok(identity),
            Some((identity, _)) => {
                tracing::debug!(user_id = %identity.id, "wrong password");
                Err(invalid_credentials().into())
            },
            None => Err(invalid_credentials().into()),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>> {
        Ok(self
            .by_username
            .read()
            .await
            .values()
            .find(|entry| entry.identity.id == id)
            .map(|entry| entry.identity.clone()))
    }

    async fn register(&self, username: &str, password: &str) -> Result<Identity> {
        let key = username.to_lowercase();
        if self.by_username.read().await.contains_key(&key) {
            return Err(username_taken().into());
        }

        let password = self.pwd.hash_password(password)?;
        let identity = Identity {
            id: crypto::random_string(crypto::ID_LENGTH),
            username: username.to_owned(),
            roles: vec![DEFAULT_ROLE.to_owned()],
        };

        match self.by_username.write().await.entry(key) {
            MapEntry::Occupied(_) => return Err(username_taken().into()),
            MapEntry::Vacant(slot) => {
                slot.insert(Entry {
                    identity: identity.clone(),
                    password,
                });
            },
        }

        tracing::info!(user_id = %identity.id, "identity registered");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::ServerError;
    use crate::config::Argon2 as ArgonConfig;
    use crate::crypto::tests::fast_passwords;

    fn users(pwd: &PasswordManager) -> Vec<UserConfig> {
        vec![UserConfig {
            id: "u1".into(),
            username: "Alice".into(),
            password: pwd.hash_password("correct horse").unwrap(),
            roles: vec!["CLIENT".into()],
        }]
    }

    fn directory() -> MemoryDirectory {
        let pwd = fast_passwords();
        let users = users(&pwd);

        MemoryDirectory::new(pwd, &users).unwrap()
    }

    fn assert_field_error(result: Result<Identity>, field: &str) {
        let Err(ServerError::Validation(errors)) = result else {
            panic!("expected validation error");
        };
        assert!(errors.field_errors().contains_key(field));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let identity = directory().authenticate("alice", "correct horse").await.unwrap();

        assert_eq!(identity.id, "u1");
        assert_eq!(identity.username, "Alice");
        assert_eq!(identity.roles, vec!["CLIENT".to_string()]);
    }

    #[tokio::test]
    async fn test_authenticate_failures_look_alike() {
        let directory = directory();

        let wrong_password = directory.authenticate("alice", "battery staple").await;
        let unknown_user = directory.authenticate("bob", "correct horse").await;

        for result in [wrong_password, unknown_user] {
            assert_field_error(result, "password");
        }
    }

    #[tokio::test]
    async fn test_unknown_user_costs_a_verification() {
        let pwd = PasswordManager::new(Some(ArgonConfig {
            memory_cost: 8 * 1024,
            iterations: 2,
            parallelism: 1,
            hash_length: 32,
        }))
        .unwrap();
        let users = users(&pwd);
        let directory = MemoryDirectory::new(pwd, &users).unwrap();

        async fn time(directory: &MemoryDirectory, username: &str) -> Duration {
            let start = Instant::now();
            for _ in 0..3 {
                assert!(directory.authenticate(username, "battery staple").await.is_err());
            }
            start.elapsed()
        }

        let known = time(&directory, "alice").await;
        let unknown = time(&directory, "bob").await;
        assert!(unknown * 4 > known, "known: {known:?}, unknown: {unknown:?}");
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let directory = directory();

        assert_eq!(
            directory.find_by_id("u1").await.unwrap().unwrap().username,
            "Alice"
        );
        assert!(directory.find_by_id("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register() {
        let directory = directory();

        let identity = directory.register("Bob", "hunter22").await.unwrap();
        assert_eq!(identity.username, "Bob");
        assert_eq!(identity.roles, vec![DEFAULT_ROLE.to_string()]);
        assert_eq!(identity.id.len(), crypto::ID_LENGTH);

        assert_eq!(directory.authenticate("bob", "hunter22").await.unwrap(), identity);
        assert_eq!(
            directory.find_by_id(&identity.id).await.unwrap(),
            Some(identity)
        );
    }

    #[tokio::test]
    async fn test_register_taken_username() {
        let directory = directory();

        assert_field_error(directory.register("ALICE", "hunter22").await, "username");
        assert!(directory.authenticate("alice", "correct horse").await.is_ok());
    }
}

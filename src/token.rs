//! Manage json web tokens.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Result, ServerError};

pub const ALGORITHM: Algorithm = Algorithm::HS512;
pub const EXPIRATION_TIME: u64 = 1000 * 60 * 15; // 15 minutes.

/// Pieces of information asserted on a JWT.
///
/// Timestamps are expressed in milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the expiration time after which the JWT must not be
    /// accepted for processing.
    pub exp: u64,
}

/// Why a token was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("invalid JWT signature: {0}")]
    BadSignature(String),
    #[error("invalid JWT token: {0}")]
    Malformed(String),
    #[error("JWT token is expired: {0}")]
    Expired(String),
    #[error("JWT token is unsupported: {0}")]
    UnsupportedFormat(String),
    #[error("JWT claims string is empty: {0}")]
    EmptyOrInvalidInput(String),
}

impl TokenError {
    /// Stable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::BadSignature(_) => "bad_signature",
            TokenError::Malformed(_) => "malformed",
            TokenError::Expired(_) => "expired",
            TokenError::UnsupportedFormat(_) => "unsupported_format",
            TokenError::EmptyOrInvalidInput(_) => "empty_or_invalid_input",
        }
    }

    fn classify(token: &str, err: JwtError) -> Self {
        let cause = err.to_string();
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature(cause),
            ErrorKind::ExpiredSignature => TokenError::Expired(cause),
            ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => TokenError::UnsupportedFormat(cause),
            // `alg` values jsonwebtoken does not know (e.g. `none`) fail
            // while parsing the header.
            ErrorKind::Json(_) if declares_foreign_algorithm(token) => {
                TokenError::UnsupportedFormat(cause)
            },
            _ => TokenError::Malformed(cause),
        }
    }
}

/// Whether the header segment is readable JSON naming an algorithm that is
/// not one jsonwebtoken can parse.
fn declares_foreign_algorithm(token: &str) -> bool {
    let Some(header) = token.split('.').next() else {
        return false;
    };

    URL_SAFE_NO_PAD
        .decode(header)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
        .and_then(|header| header.get("alg")?.as_str().map(str::to_owned))
        .is_some_and(|alg| alg.parse::<Algorithm>().is_err())
}

/// Manage JWT tokens.
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration: u64,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("algorithm", &ALGORITHM)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a new [`TokenManager`].
    pub fn new(secret: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(ServerError::Configuration(
                "token signing secret must not be empty".into(),
            ));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration: EXPIRATION_TIME,
            clock,
        })
    }

    /// Set access token lifetime, in milliseconds.
    pub fn expiration(mut self, millis: u64) -> Self {
        self.expiration = millis;
        self
    }

    /// Access token lifetime, in milliseconds.
    pub fn expires_in(&self) -> u64 {
        self.expiration
    }

    /// Create a new [`jsonwebtoken`] for `subject`.
    pub fn issue(&self, subject: &str) -> Result<String> {
        let time = self.clock.now_millis();
        let exp = time.checked_add(self.expiration).ok_or_else(|| {
            ServerError::Internal(format!(
                "access token lifetime {} ms is out of range",
                self.expiration
            ))
        })?;
        let claims = Claims {
            sub: subject.to_owned(),
            iat: time,
            exp,
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)?;
        metrics::counter!("tokens_issued_total").increment(1);

        Ok(token)
    }

    /// Decode and check a token.
    pub fn decode(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        let result = self.verify(token);

        if let Err(err) = &result {
            tracing::debug!(kind = err.kind(), error = %err, "access token refused");
            metrics::counter!("token_rejections_total", "kind" => err.kind())
                .increment(1);
        }

        result
    }

    /// Check a token. Never returns `Ok(false)`: every refusal carries its
    /// reason.
    pub fn validate(&self, token: &str) -> std::result::Result<bool, TokenError> {
        self.decode(token).map(|_| true)
    }

    fn verify(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::EmptyOrInvalidInput("token is blank".into()));
        }

        // Expiry is checked below against our own clock, in milliseconds.
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|err| TokenError::classify(token, err))?
            .claims;

        let now = self.clock.now_millis();
        if now > claims.exp {
            return Err(TokenError::Expired(format!(
                "expired {} ms ago",
                now - claims.exp
            )));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const SECRET: &str = "a-very-long-secret-used-to-sign-tokens-in-tests";

    fn manager(clock: Arc<ManualClock>) -> TokenManager {
        TokenManager::new(SECRET, clock).unwrap()
    }

    fn encode_segment(value: serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string())
    }

    #[test]
    fn test_issue_then_validate() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let token = manager(clock).issue("alice").unwrap();

        let manager = manager(Arc::new(ManualClock::new(1_700_000_000_000)));
        assert_eq!(manager.validate(&token), Ok(true));

        let claims = manager.decode(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.iat, 1_700_000_000_000);
        assert_eq!(claims.exp, 1_700_000_000_000 + EXPIRATION_TIME);
    }

    #[test]
    fn test_expiration_window() {
        let clock = Arc::new(ManualClock::new(0));
        let manager = manager(Arc::clone(&clock)).expiration(1000);
        let token = manager.issue("alice").unwrap();

        clock.set(500);
        assert_eq!(manager.validate(&token), Ok(true));

        clock.set(1000);
        assert_eq!(manager.validate(&token), Ok(true));

        clock.set(1500);
        let err = manager.validate(&token).unwrap_err();
        assert!(matches!(err, TokenError::Expired(_)));
        assert!(err.to_string().starts_with("JWT token is expired: "));
    }

    #[test]
    fn test_empty_input() {
        let manager = manager(Arc::new(ManualClock::new(0)));

        for input in ["", "   ", "\n"] {
            let err = manager.validate(input).unwrap_err();
            assert!(matches!(err, TokenError::EmptyOrInvalidInput(_)));
            assert_eq!(err.kind(), "empty_or_invalid_input");
        }
    }

    #[test]
    fn test_malformed_input() {
        let manager = manager(Arc::new(ManualClock::new(0)));

        for input in ["not a token", "a.b.c", "abc.def", "!!!.???.###"] {
            let err = manager.validate(input).unwrap_err();
            assert!(matches!(err, TokenError::Malformed(_)), "{input}: {err:?}");
        }
    }

    #[test]
    fn test_missing_claims_is_malformed() {
        let clock = Arc::new(ManualClock::new(0));
        let manager = manager(clock);
        let token = encode(
            &Header::new(ALGORITHM),
            &serde_json::json!({ "sub": "alice" }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            manager.validate(&token).unwrap_err(),
            TokenError::Malformed(_)
        ));
    }

    #[test]
    fn test_other_secret() {
        let clock = Arc::new(ManualClock::new(0));
        let token = TokenManager::new("another secret", clock.clone())
            .unwrap()
            .issue("alice")
            .unwrap();

        let err = manager(clock).validate(&token).unwrap_err();
        assert!(matches!(err, TokenError::BadSignature(_)));
        assert!(err.to_string().starts_with("invalid JWT signature: "));
    }

    #[test]
    fn test_tampered_payload() {
        let clock = Arc::new(ManualClock::new(0));
        let manager = manager(clock);
        let token = manager.issue("alice").unwrap();

        let mut parts = token.split('.');
        let header = parts.next().unwrap();
        let _ = parts.next();
        let signature = parts.next().unwrap();
        let payload = encode_segment(serde_json::json!({
            "sub": "mallory",
            "iat": 0,
            "exp": EXPIRATION_TIME,
        }));

        let forged = format!("{header}.{payload}.{signature}");
        assert!(matches!(
            manager.validate(&forged).unwrap_err(),
            TokenError::BadSignature(_)
        ));
    }

    #[test]
    fn test_other_algorithm() {
        let clock = Arc::new(ManualClock::new(0));
        let claims = Claims {
            sub: "alice".into(),
            iat: 0,
            exp: EXPIRATION_TIME,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = manager(clock).validate(&token).unwrap_err();
        assert!(matches!(err, TokenError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_unsigned_token() {
        let manager = manager(Arc::new(ManualClock::new(0)));
        let header = encode_segment(serde_json::json!({ "alg": "none", "typ": "JWT" }));
        let payload = encode_segment(serde_json::json!({
            "sub": "alice",
            "iat": 0,
            "exp": EXPIRATION_TIME,
        }));

        let err = manager.validate(&format!("{header}.{payload}.")).unwrap_err();
        assert!(matches!(err, TokenError::UnsupportedFormat(_)));
        assert!(err.to_string().starts_with("JWT token is unsupported: "));
    }

    #[test]
    fn test_empty_secret() {
        let clock = Arc::new(ManualClock::new(0));
        assert!(matches!(
            TokenManager::new("", clock).unwrap_err(),
            ServerError::Configuration(_)
        ));
    }

    #[test]
    fn test_out_of_range_expiration() {
        let manager = manager(Arc::new(ManualClock::new(1_700_000_000_000))).expiration(u64::MAX);

        assert!(matches!(
            manager.issue("alice").unwrap_err(),
            ServerError::Internal(_)
        ));
    }
}

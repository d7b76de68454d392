//! Document mapping of refresh tokens.
//!
//! Field names are part of the storage contract:
//!
//! ```json
//! {
//!   "token": "...",
//!   "userId": "u1",
//!   "createdAt": "2025-01-01T00:00:00Z",
//!   "expireDate": "2025-01-16T00:00:00Z"
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::RefreshToken;

const TOKEN: &str = "token";
const USER_ID: &str = "userId";
const CREATED_AT: &str = "createdAt";
const EXPIRE_DATE: &str = "expireDate";

/// A stored document could not be turned back into a [`RefreshToken`].
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("missing `{0}` field")]
    MissingField(&'static str),
    #[error("`{0}` field must be a string")]
    InvalidField(&'static str),
    #[error("`{field}` is not an RFC 3339 date: {source}")]
    InvalidDate {
        field: &'static str,
        source: chrono::ParseError,
    },
}

/// Encode a [`RefreshToken`] into its document.
pub fn encode(token: &RefreshToken) -> Value {
    let mut doc = Map::with_capacity(4);
    doc.insert(TOKEN.into(), Value::String(token.token.clone()));
    doc.insert(USER_ID.into(), Value::String(token.user_id.clone()));
    doc.insert(CREATED_AT.into(), date(token.created_at));
    doc.insert(EXPIRE_DATE.into(), date(token.expire_at));
    Value::Object(doc)
}

/// Decode a document into a [`RefreshToken`].
pub fn decode(doc: &Value) -> Result<RefreshToken, DocumentError> {
    Ok(RefreshToken {
        token: string(doc, TOKEN)?.to_owned(),
        user_id: string(doc, USER_ID)?.to_owned(),
        created_at: parse_date(doc, CREATED_AT)?,
        expire_at: parse_date(doc, EXPIRE_DATE)?,
    })
}

fn date(date: DateTime<Utc>) -> Value {
    Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn string<'a>(doc: &'a Value, field: &'static str) -> Result<&'a str, DocumentError> {
    doc.get(field)
        .ok_or(DocumentError::MissingField(field))?
        .as_str()
        .ok_or(DocumentError::InvalidField(field))
}

fn parse_date(doc: &Value, field: &'static str) -> Result<DateTime<Utc>, DocumentError> {
    DateTime::parse_from_rfc3339(string(doc, field)?)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|source| DocumentError::InvalidDate { field, source })
}

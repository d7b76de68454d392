//! Identity behind the presented access token.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::router::Authenticated;
use crate::{AppState, ServerError};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub username: String,
    pub roles: Vec<String>,
    /// Access token expiration, milliseconds since epoch.
    pub expires_at: u64,
}

pub async fn handler(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
) -> Result<Json<Response>> {
    let identity = state
        .directory
        .find_by_id(&claims.sub)
        .await?
        .ok_or(ServerError::Unauthorized)?;

    Ok(Json(Response {
        id: identity.id,
        username: identity.username,
        roles: identity.roles,
        expires_at: claims.exp,
    }))
}

//! Register a new identity.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(min = 3, max = 20, message = "Username must be between 3 and 20 characters."))]
    pub username: String,
    #[validate(length(min = 6, max = 40, message = "Password must be between 6 and 40 characters."))]
    pub password: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub username: String,
    pub roles: Vec<String>,
}

/// Handler to create an identity.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<Response>)> {
    let identity = state
        .directory
        .register(&body.username, &body.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(Response {
            id: identity.id,
            username: identity.username,
            roles: identity.roles,
        }),
    ))
}

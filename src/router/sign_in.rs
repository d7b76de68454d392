//! Sign in with username and password.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::{TOKEN_TYPE, Valid};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(min = 1, max = 255, message = "Username is required."))]
    pub username: String,
    #[validate(length(min = 1, max = 255, message = "Password is required."))]
    pub password: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub username: String,
    pub roles: Vec<String>,
    pub token_type: String,
    pub token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// Handler to sign in.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let identity = state
        .directory
        .authenticate(&body.username, &body.password)
        .await?;

    let token = state.token.issue(&identity.id)?;
    let refresh_token = state.sessions.create(&identity).await?;

    tracing::info!(user_id = %identity.id, "user signed in");

    Ok(Json(Response {
        id: identity.id,
        username: identity.username,
        roles: identity.roles,
        token_type: TOKEN_TYPE.to_owned(),
        token,
        refresh_token: refresh_token.token,
        expires_in: state.token.expires_in(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::{PASSWORD, state};
    use crate::*;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_sign_in() {
        let (state, _) = state();
        let app = app(state.clone());

        let response = make_request(
            app,
            Method::POST,
            "/api/auth/sign-in",
            None,
            json!({ "username": "alice", "password": PASSWORD }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Response = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.id, "u1");
        assert_eq!(body.username, "alice");
        assert_eq!(body.roles, vec!["CLIENT".to_string()]);
        assert_eq!(body.token_type, TOKEN_TYPE);
        assert_eq!(body.expires_in, 1000);
        assert_eq!(body.refresh_token.len(), crate::crypto::TOKEN_LENGTH);
        assert_eq!(state.token.decode(&body.token).unwrap().sub, "u1");
    }

    #[tokio::test]
    async fn test_sign_in_wrong_password() {
        let (state, _) = state();

        let response = make_request(
            app(state),
            Method::POST,
            "/api/auth/sign-in",
            None,
            json!({ "username": "alice", "password": "hunter2" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sign_in_empty_body_fields() {
        let (state, _) = state();

        let response = make_request(
            app(state),
            Method::POST,
            "/api/auth/sign-in",
            None,
            json!({ "username": "", "password": "" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    }
}

//! Get a new access token with a refresh token.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::{TOKEN_TYPE, Valid};

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[validate(length(min = 1, max = 255, message = "Refresh token is required."))]
    pub refresh_token: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub token_type: String,
    pub token: String,
    /// Same as the presented one unless rotation is enabled.
    pub refresh_token: String,
    pub expires_in: u64,
}

pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let session = state
        .sessions
        .refresh_access_token(&body.refresh_token)
        .await?;

    Ok(Json(Response {
        token_type: TOKEN_TYPE.to_owned(),
        token: session.access_token,
        refresh_token: session.refresh_token.token,
        expires_in: state.token.expires_in(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::router::tests::state;
    use crate::*;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_refresh() {
        let (state, _) = state();
        let identity = Identity {
            id: "u1".into(),
            ..Default::default()
        };
        let refresh = state.sessions.create(&identity).await.unwrap();

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/api/auth/refresh",
            None,
            json!({ "refreshToken": refresh.token }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Response = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.token_type, TOKEN_TYPE);
        assert_ne!(body.refresh_token, refresh.token);
        assert_eq!(state.token.decode(&body.token).unwrap().sub, "u1");
    }

    #[tokio::test]
    async fn test_refresh_unknown_token() {
        let (state, _) = state();

        let response = make_request(
            app(state),
            Method::POST,
            "/api/auth/refresh",
            None,
            json!({ "refreshToken": "r-abc123" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["type"], "invalid_refresh_token");
    }

    #[tokio::test]
    async fn test_refresh_missing_field() {
        let (state, _) = state();

        let response = make_request(
            app(state),
            Method::POST,
            "/api/auth/refresh",
            None,
            json!({ "token": "r-abc123" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

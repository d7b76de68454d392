//! Revoke a refresh token.

use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::router::refresh::Body;

pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<StatusCode> {
    state.sessions.revoke(&body.refresh_token).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::identity::Identity;
    use crate::router::tests::state;
    use crate::*;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_sign_out() {
        let (state, _) = state();
        let identity = Identity {
            id: "u1".into(),
            ..Default::default()
        };
        let refresh = state.sessions.create(&identity).await.unwrap();
        let body = json!({ "refreshToken": refresh.token }).to_string();

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/api/auth/sign-out",
            None,
            body.clone(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // Revoked token can be used neither to refresh nor to sign out again.
        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/api/auth/refresh",
            None,
            body.clone(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            make_request(app(state), Method::POST, "/api/auth/sign-out", None, body).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

//! Authentication HTTP API.
pub mod me;
pub mod refresh;
pub mod sign_in;
pub mod sign_out;
pub mod sign_up;

use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::token::Claims;
use crate::{AppState, ServerError};

pub const TOKEN_TYPE: &str = "Bearer";

/// JSON body checked with [`validator`].
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Claims of the access token sent in the `Authorization` header.
///
/// Handlers receive the caller's identity through this extractor only.
#[derive(Debug)]
pub struct Authenticated(pub Claims);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.split_once(' '))
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case(TOKEN_TYPE))
            .map(|(_, token)| token)
            .ok_or(ServerError::Unauthorized)?;

        Ok(Authenticated(state.token.decode(token)?))
    }
}

/// Routes mounted under `/api/auth`.
pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /api/auth/sign-up` goes to `sign_up`.
        .route("/sign-up", post(sign_up::handler))
        // `POST /api/auth/sign-in` goes to `sign_in`.
        .route("/sign-in", post(sign_in::handler))
        // `POST /api/auth/refresh` goes to `refresh`.
        .route("/refresh", post(refresh::handler))
        // `POST /api/auth/sign-out` goes to `sign_out`.
        .route("/sign-out", post(sign_out::handler))
        // `GET /api/auth/me` goes to `me`. Authorization required.
        .route("/me", get(me::handler))
}

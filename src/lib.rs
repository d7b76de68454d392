//! sessiond issues short-lived access tokens and long-lived refresh tokens.
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod crypto;
mod database;
pub mod error;
pub mod identity;
pub mod refresh;
mod router;
mod status;
pub mod telemetry;
pub mod token;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

pub use error::ServerError;

use clock::{Clock, SystemClock};
use identity::{IdentityDirectory, MemoryDirectory};
use refresh::{
    MemoryRepository, PgRefreshTokenRepository, RefreshTokenRepository, RefreshTokenService,
};

/// Environment variable pointing to `config.yaml`.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    bearer: Option<&str>,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub token: token::TokenManager,
    pub sessions: Arc<RefreshTokenService>,
    pub directory: Arc<dyn IdentityDirectory>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(status::status))
        .nest("/api/auth", router::router())
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let path = std::env::var(CONFIG_PATH_ENV).map(PathBuf::from).unwrap_or_default();
    let config = config::Configuration::default().path(path).read();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // handle jwt.
    let Some(token) = &config.token else {
        return Err(ServerError::Configuration(format!(
            "missing `token` entry on `config.yaml` file or `{}` variable",
            config::SECRET_ENV
        ))
        .into());
    };
    let token = token::TokenManager::new(&token.secret, Arc::clone(&clock))?
        .expiration(token.lifetime()?);

    let repository: Arc<dyn RefreshTokenRepository> = match &config.postgres {
        Some(postgres) => Arc::new(PgRefreshTokenRepository::new(
            database::connect(postgres).await?,
        )),
        None => {
            tracing::warn!("missing `postgres` entry, refresh tokens are kept in memory");
            Arc::new(MemoryRepository::new())
        },
    };

    let sessions = RefreshTokenService::new(repository, token.clone(), clock)
        .with_ttl(config.refresh.ttl()?)
        .with_rotation(config.refresh.rotation);

    let pwd = crypto::PasswordManager::new(config.argon2.clone())?;
    if config.users.is_empty() {
        tracing::warn!("no `users` entry on `config.yaml` file, only registered identities can sign in");
    }
    let directory = Arc::new(MemoryDirectory::new(pwd, &config.users)?);

    Ok(AppState {
        config,
        token,
        sessions: Arc::new(sessions),
        directory,
    })
}

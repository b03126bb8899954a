use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{header::RETRY_AFTER, request::Parts, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use crewcall_sync::{
    ActionName, EngineError, EngineStats, Fields, Response as SyncResponse, SessionStore, Value,
    TIMEOUT_ERROR,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    app::App,
    auth::bearer_token,
    config::ServerConfig,
    passthrough::{normalize, Routing},
    ratelimit::{RateLimited, RateLimiter},
    syncs::UNAUTHORIZED,
};

/// How often idle rate-limit buckets are swept, and how idle they must be
const BUCKET_SWEEP: Duration = Duration::from_secs(300);
const BUCKET_MAX_IDLE: Duration = Duration::from_secs(600);

/// Response header carrying the id of the request a body answers
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Remote address of the connection, when the server was started with
/// connect info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer(pub Option<IpAddr>);

impl<S: Send + Sync> FromRequestParts<S> for Peer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Peer(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        ))
    }
}

/// Rate-limit bucket key: the session user when the token validates,
/// otherwise the peer address
fn rate_identity(user: Option<&str>, peer: Peer) -> String {
    match (user, peer.0) {
        (Some(user), _) => format!("user:{user}"),
        (None, Some(ip)) => format!("peer:{ip}"),
        (None, None) => "anonymous".to_string(),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub app: App,
    pub config: Arc<ServerConfig>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(app: App, config: ServerConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            app,
            config: Arc::new(config),
            rate_limiter,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/_engine/stats", get(stats))
        .route("/api/{*route}", post(api))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: ServerConfig) -> Result<()> {
    let app = App::new(&config)?;
    let addr = config.listen_addr.clone();
    let state = AppState::new(app, config);

    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(BUCKET_SWEEP);
        loop {
            tick.tick().await;
            let dropped = limiter.cleanup(BUCKET_MAX_IDLE);
            if dropped > 0 {
                debug!(dropped, "swept idle rate-limit buckets");
            }
        }
    });

    info!(%addr, "crewcall listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn stats(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.app.engine.stats())
}

/// HTTP status for a correlated response body
pub fn status_for(response: &SyncResponse) -> StatusCode {
    match response.error() {
        None => StatusCode::OK,
        Some(error) if error == UNAUTHORIZED => StatusCode::UNAUTHORIZED,
        Some(error) if error == TIMEOUT_ERROR => StatusCode::GATEWAY_TIMEOUT,
        Some(_) => StatusCode::BAD_REQUEST,
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn rate_limited(limited: RateLimited) -> Response {
    let secs = limited.retry_after_secs();
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, secs.to_string())],
        Json(json!({ "error": format!("Rate limited, retry after {secs} seconds") })),
    )
        .into_response()
}

fn parse_body(body: &Bytes) -> Result<Fields, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Fields::new());
    }
    serde_json::from_slice::<Fields>(body)
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {e}")))
}

/// `Concept/operation` -> `Concept.operation`
fn operation(route: &str) -> Option<ActionName> {
    let (concept, op) = route.split_once('/')?;
    (!concept.is_empty() && !op.is_empty() && !op.contains('/')).then(|| ActionName::new(concept, op))
}

async fn api(
    Path(route): Path<String>,
    State(state): State<AppState>,
    peer: Peer,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut fields = match parse_body(&body) {
        Ok(fields) => fields,
        Err(rejection) => return rejection,
    };
    let route = normalize(&route).to_string();
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or_else(|| fields.get("token").and_then(Value::as_str).map(str::to_string));

    let user = match &token {
        Some(token) => state.app.sessions.validate(token).await,
        None => None,
    };
    let identity = rate_identity(user.as_deref(), peer);
    if let Err(limited) = state.rate_limiter.check(&identity) {
        warn!(%identity, %route, "rate limited");
        return rate_limited(limited);
    }

    match state.app.table.routing(&route) {
        Routing::Passthrough { .. } => {
            if state.config.require_token && user.is_none() {
                return error_body(StatusCode::UNAUTHORIZED, UNAUTHORIZED);
            }
            fields.remove("token");
            passthrough(&state, &route, &fields).await
        }
        Routing::Gated | Routing::Unlisted => {
            fields.insert("path".to_string(), Value::String(route.clone()));
            match token {
                Some(token) => {
                    fields.insert("token".to_string(), Value::String(token));
                }
                None => {
                    fields.remove("token");
                }
            }
            let timeout = state.config.request_timeout;
            match state.app.engine.request_with_timeout(fields, timeout).await {
                Ok(response) => (
                    status_for(&response),
                    [(REQUEST_ID_HEADER, response.request.to_string())],
                    Json(response.body),
                )
                    .into_response(),
                Err(error) => {
                    warn!(%route, %error, "request failed");
                    error_body(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
                }
            }
        }
    }
}

async fn passthrough(state: &AppState, route: &str, input: &Fields) -> Response {
    let Some(query) = operation(route) else {
        return error_body(StatusCode::NOT_FOUND, format!("Unknown route {route}"));
    };
    match state.app.engine.query(&query, input).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(EngineError::UnknownQuery(name)) => {
            error_body(StatusCode::NOT_FOUND, format!("Unknown query {name}"))
        }
        Err(EngineError::Query { message, .. }) => error_body(StatusCode::BAD_REQUEST, message),
        Err(error) => error_body(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    }
}

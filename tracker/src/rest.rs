use crate::auth::CredentialService;
use crate::errors::Error;
use crate::live::Reconciler;
use crate::metrics::{self, INVALID_UPLOADS_TOTAL, LOGIN_FAILURES_TOTAL};
use crate::model::{
    HardwareUpload, Heartbeat, LoginRequest, ReceiverStatus, Source, SourceRequest,
    SourceResponse, SourceStatus, StoredPacket, SuccessResponse, TelemetryPacket, User,
};
use crate::session::{token_from_jar, SessionStore};
use crate::validate::validate_login;
use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::QueryRejection, FromRequestParts, Query, State},
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const DEFAULT_HISTORY: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub credentials: Arc<CredentialService>,
    pub sessions: Arc<SessionStore>,
    pub history_max: usize,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    n: Option<usize>,
}

pub fn create_router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter(|origin| {
            // A wildcard cannot be combined with credentialed requests.
            let wildcard = origin.trim() == "*";
            if wildcard {
                warn!("Ignoring wildcard CORS origin");
            }
            !wildcard
        })
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        // Device-facing
        .route("/api/upload", post(upload))
        .route("/api/receiver_heartbeat", post(receiver_heartbeat))
        .route("/api/login", post(login))
        // Dashboard
        .route("/api/logout", post(logout))
        .route("/api/set_data_source", post(set_data_source))
        .route("/api/data_source", get(data_source))
        .route("/api/base_station_location", get(base_station_location))
        .route("/data", get(current))
        .route("/data/latest_hardware", get(latest_hardware))
        .route("/history", get(history))
        .route("/receiver_status", get(receiver_status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Session-authenticated user; rejects with 401 when the cookie is missing or stale.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let user = state
            .sessions
            .user_from_jar(&jar)
            .await
            .ok_or(Error::LoginRequired)?;
        Ok(AuthUser(user))
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| Error::Validation(format!("Invalid JSON: {}", e)))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn metrics_handler() -> String {
    metrics::gather_metrics().unwrap_or_else(|e| {
        error!("Failed to gather metrics: {}", e);
        String::new()
    })
}

async fn upload(State(state): State<AppState>, body: Bytes) -> Result<Json<SuccessResponse>, AppError> {
    let result = match parse_json::<HardwareUpload>(&body) {
        Ok(upload) => state.reconciler.upload_hardware(upload).await,
        Err(e) => Err(e),
    };

    if let Err(Error::Validation(_)) = &result {
        INVALID_UPLOADS_TOTAL.inc();
    }
    result?;

    Ok(Json(SuccessResponse { success: true }))
}

async fn receiver_heartbeat(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SuccessResponse>, AppError> {
    let heartbeat: Heartbeat = parse_json(&body)?;
    state.reconciler.record_heartbeat(heartbeat).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<SuccessResponse>), AppError> {
    let request: LoginRequest = parse_json(&body)?;
    let (username, password) = validate_login(&request)?;

    let Some(user) = state.credentials.verify(username, password).await? else {
        LOGIN_FAILURES_TOTAL.inc();
        return Err(Error::Unauthorized.into());
    };

    info!(user_id = user.id, username = %user.username, "User logged in");
    let token = state.sessions.create(user).await;
    let jar = jar.add(state.sessions.cookie(token));

    Ok((jar, Json(SuccessResponse { success: true })))
}

async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
) -> (CookieJar, Json<SuccessResponse>) {
    if let Some(token) = token_from_jar(&jar) {
        state.sessions.remove(&token).await;
    }
    info!(user_id = user.id, "User logged out");

    (
        jar.remove(SessionStore::removal_cookie()),
        Json(SuccessResponse { success: true }),
    )
}

async fn set_data_source(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    body: Bytes,
) -> Result<Json<SourceResponse>, AppError> {
    let request: SourceRequest = parse_json(&body)?;
    let source: Source = request.source.as_deref().unwrap_or("simulated").parse()?;
    state.reconciler.set_preference(source).await;
    Ok(Json(SourceResponse {
        success: true,
        source,
    }))
}

async fn data_source(State(state): State<AppState>, AuthUser(_): AuthUser) -> Json<SourceStatus> {
    Json(state.reconciler.source_status().await)
}

async fn base_station_location(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> Json<ReceiverStatus> {
    Json(state.reconciler.base_station().await)
}

async fn current(State(state): State<AppState>, AuthUser(_): AuthUser) -> Json<TelemetryPacket> {
    Json(state.reconciler.visible().await)
}

async fn latest_hardware(State(state): State<AppState>, AuthUser(_): AuthUser) -> Response {
    match state.reconciler.hardware_only().await {
        Some(packet) => Json(packet).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn history(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<StoredPacket>>, AppError> {
    let Query(params) = query.map_err(|e| Error::Validation(e.body_text()))?;
    let n = params.n.unwrap_or(DEFAULT_HISTORY).min(state.history_max);
    Ok(Json(state.reconciler.history(n).await?))
}

async fn receiver_status(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> Result<Json<ReceiverStatus>, AppError> {
    Ok(Json(state.reconciler.receiver_status().await?))
}

pub struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::Unauthorized | Error::LoginRequired => {
                (StatusCode::UNAUTHORIZED, self.0.to_string())
            }
            Error::Database(_) | Error::Migration(_) => {
                error!("API error: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            _ => {
                error!("API error: {}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "success": false,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

//! Admin JSON API.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use stream_core::admin::{update_stream_settings, AdminIdentity};
use stream_core::error::{ContextDetails, ErrorMetadata, RadioError, RadioErrorHandler, RadioErrorKind};
use stream_core::monitor::{MonitorConfig, MonitorConfigPatch};
use stream_core::store::{StreamUrlUpdate, SETTINGS_ENTITY};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::AppContext;

pub const ADMIN_USER_HEADER: &str = "x-admin-user-id";
pub const ADMIN_EMAIL_HEADER: &str = "x-admin-user-email";

/// `RadioError` rendered as the API error envelope.
pub struct ApiError(RadioError);

impl From<RadioError> for ApiError {
    fn from(err: RadioError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(RadioErrorHandler::to_api_response(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
struct MonitorToggle {
    changed: bool,
    is_running: bool,
    config: MonitorConfig,
}

#[derive(Serialize)]
struct StreamUrlResponse {
    url: Option<String>,
}

#[derive(Deserialize)]
struct RotateRequest {
    failed_url: String,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/health", get(get_health))
        .route("/api/health/report", get(get_health_report))
        .route("/api/health/check", post(force_check))
        .route("/api/health/reset", post(reset_health))
        .route("/api/monitor/start", post(start_monitor))
        .route("/api/monitor/stop", post(stop_monitor))
        .route("/api/fallback", get(get_fallback_url))
        .route("/api/fallback/candidates", get(get_candidates))
        .route("/api/fallback/validate", post(validate_all))
        .route("/api/fallback/rotate", post(rotate))
        .route("/api/fallback/cache", get(cache_stats).delete(clear_cache))
        .route("/api/rotation", get(get_rotation))
        .route("/api/rotation/reset", post(reset_rotation))
        .route("/api/settings", get(get_settings))
        .route("/api/settings/stream", put(put_stream_settings))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

pub fn start_server(bind_address: String, port: u16, ctx: AppContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(ctx);
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("Admin API listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.monitor.get_health_status())
}

async fn get_health_report(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.monitor.get_health_report().await)
}

async fn force_check(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.monitor.force_health_check().await)
}

async fn reset_health(State(ctx): State<AppContext>) -> impl IntoResponse {
    ctx.monitor.reset_health_status();
    Json(ctx.monitor.get_health_status())
}

async fn start_monitor(
    State(ctx): State<AppContext>,
    patch: Option<Json<MonitorConfigPatch>>,
) -> impl IntoResponse {
    let changed = ctx
        .monitor
        .start_health_monitoring(patch.map(|Json(p)| p))
        .await;
    Json(MonitorToggle {
        changed,
        is_running: ctx.monitor.is_running(),
        config: ctx.monitor.config(),
    })
}

async fn stop_monitor(State(ctx): State<AppContext>) -> impl IntoResponse {
    let changed = ctx.monitor.stop_health_monitoring();
    Json(MonitorToggle {
        changed,
        is_running: ctx.monitor.is_running(),
        config: ctx.monitor.config(),
    })
}

async fn get_fallback_url(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(StreamUrlResponse {
        url: ctx.fallback.get_fallback_url(None).await,
    })
}

async fn get_candidates(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.fallback.get_fallback_urls().await)
}

async fn validate_all(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.fallback.validate_all_fallback_urls(None).await)
}

async fn rotate(
    State(ctx): State<AppContext>,
    Json(req): Json<RotateRequest>,
) -> ApiResult<StreamUrlResponse> {
    let failed_url = req.failed_url.trim();
    if failed_url.is_empty() {
        return Err(RadioErrorHandler::handle_form_validation_error("failed_url", "failed_url is required").into());
    }
    match ctx.fallback.rotate_to_next_fallback(failed_url, None).await {
        Some(url) => Ok(Json(StreamUrlResponse { url: Some(url) })),
        None => Err(RadioErrorHandler::create_error(
            RadioErrorKind::StreamNoFallbackAvailable,
            "rotate_to_next_fallback",
            None,
            ContextDetails::with_metadata(ErrorMetadata::Stream {
                url: failed_url.to_string(),
                status_code: None,
            }),
        )
        .into()),
    }
}

async fn cache_stats(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.fallback.cache_stats())
}

async fn clear_cache(State(ctx): State<AppContext>) -> StatusCode {
    ctx.fallback.clear_test_cache();
    StatusCode::NO_CONTENT
}

async fn get_rotation(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.fallback.rotation_state().await)
}

async fn reset_rotation(State(ctx): State<AppContext>) -> impl IntoResponse {
    ctx.fallback.reset_rotation_state().await;
    Json(ctx.fallback.rotation_state().await)
}

async fn get_settings(State(ctx): State<AppContext>) -> ApiResult<Option<stream_core::store::StreamSettings>> {
    ctx.store
        .active_settings()
        .await
        .map(Json)
        .map_err(|e| RadioErrorHandler::handle_database_error(&e, "get_settings", SETTINGS_ENTITY).into())
}

fn admin_identity(headers: &HeaderMap) -> AdminIdentity {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    AdminIdentity::new(header(ADMIN_USER_HEADER).unwrap_or_default(), header(ADMIN_EMAIL_HEADER))
}

async fn put_stream_settings(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(update): Json<StreamUrlUpdate>,
) -> ApiResult<stream_core::store::StreamSettings> {
    let admin = admin_identity(&headers);
    let saved = update_stream_settings(ctx.store.as_ref(), &ctx.events, update, &admin).await?;
    Ok(Json(saved))
}

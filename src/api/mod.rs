pub mod analytics;
pub mod auth;
pub mod cache;
mod dashboard;
pub mod error;
mod notifications;
mod patients;
mod prevalidate;
mod series;
mod sessions;
pub mod validation;

use axum::{
    extract::{FromRequest, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::retry::NetworkError;
use crate::AppState;
use error::{ApiError, ErrorBody, RuleCode};

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/validate/:entity", post(prevalidate::validate_form));

    // Authenticated routes; the AuthUser extractor checks the token and role
    let api_routes = Router::new()
        .route("/therapy-types", get(series::list_therapy_types))
        // Patients
        .route("/patients", get(patients::list_patients))
        .route("/patients", post(patients::create_patient))
        .route("/patients/:id", put(patients::update_patient))
        .route("/patients/:id", delete(patients::delete_patient))
        .route("/patients/:id/assign-series", post(patients::assign_series))
        .route("/patients/:id/sessions", get(patients::patient_sessions))
        // Therapy series
        .route("/therapy-series", get(series::list_series))
        .route("/therapy-series", post(series::create_series))
        .route("/therapy-series/:id", delete(series::delete_series))
        // Patient self-service
        .route("/my-series", get(sessions::my_series))
        .route("/sessions", post(sessions::create_session))
        // Dashboard & reports
        .route("/dashboard/analytics", get(dashboard::dashboard_analytics))
        .route("/reports/export", get(dashboard::export_report))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/:id/read", put(notifications::mark_read))
        // Admin
        .route("/users/:id/deactivate", put(auth::deactivate_user));

    Router::new()
        .nest("/api", public_routes.merge(api_routes))
        .layer(middleware::from_fn_with_state(state.clone(), request_timeout))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors_layer(&state.config.server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "cacheSize": state.cache.len(),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
    }))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Answer 408 once the request budget is spent.
///
/// The handler runs on its own task and is left to finish in the background.
async fn request_timeout(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let budget = Duration::from_secs(state.config.server.request_timeout_secs);
    let path = request.uri().path().to_string();
    let handler = tokio::spawn(next.run(request));

    match tokio::time::timeout(budget, handler).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::error!(path = %path, error = %e, "Request handler aborted");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody::server_error())).into_response()
        }
        Err(_) => {
            tracing::warn!(path = %path, budget_secs = budget.as_secs(), "Request timed out");
            ApiError::Timeout.into_response()
        }
    }
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %detail, "Handler panicked");

    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody::server_error())).into_response()
}

/// JSON body extractor whose rejections use the API error format
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Entity payload followed by a human-readable `message`
#[derive(Debug, Serialize)]
pub struct WithMessage<T> {
    #[serde(flatten)]
    pub data: T,
    pub message: String,
}

impl<T> WithMessage<T> {
    pub fn new(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: message.into(),
        }
    }
}

/// Serve `key` from the response cache, loading and storing it on a miss
pub(crate) async fn cached_json<T, F, Fut>(
    state: &AppState,
    key: String,
    ttl: Duration,
    load: F,
) -> Result<Json<Value>, ApiError>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    if let Some(hit) = state.cache.get(&key) {
        tracing::debug!(key = %key, "Cache hit");
        return Ok(Json(hit));
    }

    let value = serde_json::to_value(load().await?)
        .map_err(|e| ApiError::internal(format!("Failed to serialize response: {}", e)))?;
    state.cache.set(key, value.clone(), ttl);
    Ok(Json(value))
}

/// Map a unique-constraint failure onto a business-rule conflict
pub(crate) fn conflict_as(code: RuleCode, message: &str) -> impl FnOnce(NetworkError) -> ApiError + '_ {
    move |e| {
        if e.status_code == StatusCode::CONFLICT.as_u16() {
            ApiError::rule(code, message)
        } else {
            ApiError::Network(e)
        }
    }
}

//! Therapy series and catalog endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::analytics::track_event;
use super::auth::AuthUser;
use super::cache::{prefixes, ResponseCache};
use super::error::{ApiError, RuleCode};
use super::validation::{
    resolve_postures, validate_postures, validate_series_name, validate_therapy_type, validate_total_sessions,
    ValidationError,
};
use super::{cached_json, conflict_as, ApiJson, WithMessage};
use crate::catalog;
use crate::db::{events, CreateSeriesRequest, Role, SeriesPosture, SeriesWithCounts, TherapySeries, TherapySeriesResponse};
use crate::retry::with_retry;
use crate::AppState;

/// Validated series fields
#[derive(Debug)]
struct SeriesInput {
    name: String,
    therapy_type: String,
    postures: Vec<SeriesPosture>,
    total_sessions: i64,
}

fn validate_series_request(request: &CreateSeriesRequest) -> Result<SeriesInput, ValidationError> {
    let name = validate_series_name(request.name.as_deref())?;
    let therapy_type = validate_therapy_type(request.therapy_type.as_deref())?;
    let selections = validate_postures(request.postures.as_ref())?;
    let total_sessions = validate_total_sessions(request.total_sessions.as_ref())?;
    let postures = resolve_postures(&therapy_type, &selections)?;

    Ok(SeriesInput {
        name,
        therapy_type,
        postures,
        total_sessions,
    })
}

/// The posture catalog grouped by therapy type
pub async fn list_therapy_types(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let key = ResponseCache::key("/api/therapy-types", &auth.id);
    let ttl = Duration::from_secs(state.config.cache.catalog_ttl_secs);
    cached_json(&state, key, ttl, || async { Ok::<_, ApiError>(catalog::therapy_types()) }).await
}

/// List the caller's active series with usage counts
pub async fn list_series(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    auth.require(Role::Instructor)?;

    let key = ResponseCache::key("/api/therapy-series", &auth.id);
    let ttl = Duration::from_secs(state.config.cache.ttl_secs);
    cached_json(&state, key, ttl, || async {
        let series = with_retry(&state.retry, || SeriesWithCounts::list_for_instructor(&state.db, &auth.id)).await?;
        Ok::<_, ApiError>(series)
    })
    .await
}

/// Create a series from catalog postures
pub async fn create_series(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(request): ApiJson<CreateSeriesRequest>,
) -> Result<(StatusCode, Json<WithMessage<TherapySeriesResponse>>), ApiError> {
    auth.require(Role::Instructor)?;
    let input = validate_series_request(&request)?;

    let taken = with_retry(&state.retry, || TherapySeries::name_taken(&state.db, &auth.id, &input.name)).await?;
    if taken {
        return Err(ApiError::rule(RuleCode::SeriesNameExists, "You already have a series with this name"));
    }

    let series = with_retry(&state.retry, || {
        TherapySeries::create(
            &state.db,
            &auth.id,
            &input.name,
            &input.therapy_type,
            &input.postures,
            input.total_sessions,
        )
    })
    .await
    .map_err(conflict_as(RuleCode::SeriesNameExists, "You already have a series with this name"))?;

    state.cache.invalidate_prefix(prefixes::THERAPY_SERIES);
    state.cache.invalidate_prefix(prefixes::DASHBOARD);
    tracing::info!(series_id = %series.id, therapy_type = %series.therapy_type, "Series created");
    track_event(
        &state,
        Some(&auth.id),
        events::SERIES_CREATED,
        json!({
            "seriesId": series.id,
            "therapyType": series.therapy_type,
            "postureCount": input.postures.len(),
        }),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(WithMessage::new(series.to_response(), "Series created successfully")),
    ))
}

/// Soft-delete a series that no active patient is following
pub async fn delete_series(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    auth.require(Role::Instructor)?;

    with_retry(&state.retry, || TherapySeries::find_owned(&state.db, &id, &auth.id))
        .await?
        .ok_or_else(|| ApiError::not_found("Series not found"))?;

    let assigned = with_retry(&state.retry, || TherapySeries::count_assigned(&state.db, &id)).await?;
    if assigned > 0 {
        return Err(ApiError::rule(
            RuleCode::SeriesInUse,
            format!("Series is assigned to {} active patient(s)", assigned),
        ));
    }

    let deleted = with_retry(&state.retry, || TherapySeries::soft_delete(&state.db, &id, &auth.id)).await?;
    if !deleted {
        return Err(ApiError::not_found("Series not found"));
    }

    state.cache.invalidate_prefix(prefixes::THERAPY_SERIES);
    state.cache.invalidate_prefix(prefixes::DASHBOARD);
    tracing::info!(series_id = %id, "Series deleted");
    track_event(&state, Some(&auth.id), events::SERIES_DELETED, json!({ "seriesId": id })).await;

    Ok(Json(json!({ "id": id, "message": "Series deleted successfully" })))
}

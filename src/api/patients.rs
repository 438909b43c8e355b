//! Patient management endpoints (instructor only).

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
use super::notifications::notify_user;
use super::validation::{validate_age, validate_email, validate_medical_condition, validate_name, ValidationCode, ValidationError};
use super::{cached_json, conflict_as, ApiJson, WithMessage};
use crate::db::{
    events, AssignSeriesRequest, NotificationKind, Patient, PatientInput, PatientRequest, PatientResponse,
    PatientWithStats, Role, Session, SessionWithSeries, TherapySeries, User,
};
use crate::retry::with_retry;
use crate::AppState;

/// Validate a patient payload, first failing field wins
fn validate_patient_request(request: &PatientRequest) -> Result<PatientInput, ValidationError> {
    let name = validate_name(request.name.as_deref())?;
    let email = validate_email(request.email.as_deref())?;
    let age = validate_age(request.age.as_ref())?;
    let condition = match request.condition.as_deref() {
        Some(c) if !c.trim().is_empty() => Some(validate_medical_condition(Some(c))?),
        _ => None,
    };

    Ok(PatientInput {
        name,
        email,
        age,
        condition,
    })
}

fn invalidate_patient_views(state: &AppState) {
    state.cache.invalidate_prefix(prefixes::PATIENTS);
    state.cache.invalidate_prefix(prefixes::DASHBOARD);
}

/// List the caller's active patients with session aggregates
pub async fn list_patients(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    auth.require(Role::Instructor)?;

    let key = ResponseCache::key("/api/patients", &auth.id);
    let ttl = Duration::from_secs(state.config.cache.ttl_secs);
    cached_json(&state, key, ttl, || async {
        let patients = with_retry(&state.retry, || PatientWithStats::list_for_instructor(&state.db, &auth.id)).await?;
        Ok::<_, ApiError>(patients)
    })
    .await
}

/// Create a patient
pub async fn create_patient(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(request): ApiJson<PatientRequest>,
) -> Result<(StatusCode, Json<WithMessage<PatientResponse>>), ApiError> {
    auth.require(Role::Instructor)?;
    let input = validate_patient_request(&request)?;

    let taken = with_retry(&state.retry, || Patient::email_taken(&state.db, &auth.id, &input.email, None)).await?;
    if taken {
        return Err(ApiError::rule(RuleCode::EmailExists, "A patient with this email already exists"));
    }

    let patient = with_retry(&state.retry, || Patient::create(&state.db, &auth.id, &input))
        .await
        .map_err(conflict_as(RuleCode::EmailExists, "A patient with this email already exists"))?;

    invalidate_patient_views(&state);
    tracing::info!(patient_id = %patient.id, instructor_id = %auth.id, "Patient created");
    track_event(&state, Some(&auth.id), events::PATIENT_CREATED, json!({ "patientId": patient.id })).await;

    Ok((
        StatusCode::CREATED,
        Json(WithMessage::new(PatientResponse::from(patient), "Patient created successfully")),
    ))
}

/// Replace a patient's details
pub async fn update_patient(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<PatientRequest>,
) -> Result<Json<WithMessage<PatientResponse>>, ApiError> {
    auth.require(Role::Instructor)?;
    let input = validate_patient_request(&request)?;

    let taken = with_retry(&state.retry, || {
        Patient::email_taken(&state.db, &auth.id, &input.email, Some(&id))
    })
    .await?;
    if taken {
        return Err(ApiError::rule(RuleCode::EmailExists, "A patient with this email already exists"));
    }

    let patient = with_retry(&state.retry, || Patient::update(&state.db, &id, &auth.id, &input))
        .await
        .map_err(conflict_as(RuleCode::EmailExists, "A patient with this email already exists"))?
        .ok_or_else(|| ApiError::not_found("Patient not found"))?;

    invalidate_patient_views(&state);
    track_event(&state, Some(&auth.id), events::PATIENT_UPDATED, json!({ "patientId": id })).await;

    Ok(Json(WithMessage::new(PatientResponse::from(patient), "Patient updated successfully")))
}

/// Soft-delete a patient
pub async fn delete_patient(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    auth.require(Role::Instructor)?;

    let deleted = with_retry(&state.retry, || Patient::soft_delete(&state.db, &id, &auth.id)).await?;
    if !deleted {
        return Err(ApiError::not_found("Patient not found"));
    }

    invalidate_patient_views(&state);
    state.cache.invalidate_prefix(prefixes::THERAPY_SERIES);
    tracing::info!(patient_id = %id, instructor_id = %auth.id, "Patient deleted");
    track_event(&state, Some(&auth.id), events::PATIENT_DELETED, json!({ "patientId": id })).await;

    Ok(Json(json!({ "id": id, "message": "Patient deleted successfully" })))
}

/// Assign a series to a patient, replacing any previous assignment
pub async fn assign_series(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<AssignSeriesRequest>,
) -> Result<Json<WithMessage<PatientResponse>>, ApiError> {
    auth.require(Role::Instructor)?;

    let series_id = match request.series_id.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => return Err(ValidationError::new("seriesId", ValidationCode::Required, "Series is required").into()),
    };

    let (patient, series) = tokio::try_join!(
        with_retry(&state.retry, || Patient::find_owned(&state.db, &id, &auth.id)),
        with_retry(&state.retry, || TherapySeries::find_owned(&state.db, &series_id, &auth.id)),
    )?;
    let (Some(patient), Some(series)) = (patient, series) else {
        return Err(ApiError::not_found("Patient or series not found"));
    };

    let snapshot = series.to_response();
    let updated = with_retry(&state.retry, || Patient::assign_series(&state.db, &patient.id, &auth.id, &snapshot))
        .await?
        .ok_or_else(|| ApiError::not_found("Patient not found"))?;

    // Notify the patient's own account, if they have registered one
    match User::find_active_id_by_email(&state.db, &patient.email).await {
        Ok(Some(user_id)) => {
            let message = format!(
                "Your instructor assigned you the series \"{}\". Start whenever you are ready!",
                series.name
            );
            notify_user(&state, &user_id, NotificationKind::SeriesAssigned, "New series assigned", &message).await;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(patient_id = %patient.id, error = %e, "Failed to look up patient account"),
    }

    invalidate_patient_views(&state);
    state.cache.invalidate_prefix(prefixes::THERAPY_SERIES);
    tracing::info!(patient_id = %patient.id, series_id = %series.id, "Series assigned");
    track_event(
        &state,
        Some(&auth.id),
        events::SERIES_ASSIGNED,
        json!({ "patientId": patient.id, "seriesId": series.id, "seriesName": series.name }),
    )
    .await;

    Ok(Json(WithMessage::new(PatientResponse::from(updated), "Series assigned successfully")))
}

/// Session history of one of the caller's patients, newest first
pub async fn patient_sessions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<SessionWithSeries>>, ApiError> {
    auth.require(Role::Instructor)?;

    with_retry(&state.retry, || Patient::find_owned(&state.db, &id, &auth.id))
        .await?
        .ok_or_else(|| ApiError::not_found("Patient not found"))?;

    let sessions = with_retry(&state.retry, || Session::list_for_patient(&state.db, &id)).await?;
    Ok(Json(sessions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> PatientRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_validate_patient_request() {
        let input = validate_patient_request(&request(json!({
            "name": " Ana López ",
            "email": "ANA@example.com",
            "age": "34",
            "condition": "Lower Back Pain",
        })))
        .unwrap();
        assert_eq!(input.name, "Ana López");
        assert_eq!(input.email, "ana@example.com");
        assert_eq!(input.age, 34);
        assert_eq!(input.condition.as_deref(), Some("lower_back_pain"));
    }

    #[test]
    fn test_condition_is_optional() {
        let input = validate_patient_request(&request(json!({
            "name": "Ana",
            "email": "ana@example.com",
            "age": 34,
            "condition": "  ",
        })))
        .unwrap();
        assert_eq!(input.condition, None);
    }

    #[test]
    fn test_first_failing_field_wins() {
        let err = validate_patient_request(&request(json!({
            "name": "A",
            "email": "bad",
            "age": 500,
        })))
        .unwrap_err();
        assert_eq!(err.field, "name");

        let err = validate_patient_request(&request(json!({
            "name": "Ana",
            "email": "ana@example.com",
            "age": 500,
        })))
        .unwrap_err();
        assert_eq!(err.field, "age");
        assert_eq!(err.code, ValidationCode::OutOfRange);
    }
}

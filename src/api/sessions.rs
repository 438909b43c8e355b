//! Patient-facing endpoints: the assigned series and session recording.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use std::sync::Arc;

use super::analytics::track_event;
use super::auth::AuthUser;
use super::cache::prefixes;
use super::error::{ApiError, RuleCode};
use super::notifications::notify_user;
use super::validation::{validate_comments, validate_duration, validate_pain_level, ValidationError};
use super::{ApiJson, WithMessage};
use crate::db::{
    events, CreateSessionRequest, MySeriesResponse, NewSession, NotificationKind, Patient, PatientInfo, Role, Session,
};
use crate::retry::with_retry;
use crate::AppState;

fn validate_session_request(request: &CreateSessionRequest, comments_min_length: usize) -> Result<NewSession, ValidationError> {
    let pain_before = validate_pain_level(request.pain_before.as_ref(), "painBefore")?;
    let pain_after = validate_pain_level(request.pain_after.as_ref(), "painAfter")?;
    let comments = validate_comments(request.comments.as_deref(), comments_min_length)?;
    let duration_minutes = validate_duration(request.duration_minutes.as_ref())?;

    Ok(NewSession {
        pain_before,
        pain_after,
        comments,
        duration_minutes,
    })
}

/// Patient record behind the caller's account
async fn caller_patient(state: &AppState, auth: &AuthUser) -> Result<Patient, ApiError> {
    with_retry(&state.retry, || Patient::find_active_by_email(&state.db, &auth.email))
        .await?
        .ok_or_else(|| ApiError::not_found("Patient not found"))
}

/// The caller's assigned series and progress
pub async fn my_series(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<MySeriesResponse>, ApiError> {
    auth.require(Role::Patient)?;

    let patient = caller_patient(&state, &auth).await?;
    let series = patient
        .snapshot()
        .ok_or_else(|| ApiError::rule(RuleCode::NoSeriesAssigned, "No series assigned"))?;

    Ok(Json(MySeriesResponse {
        series,
        current_session: patient.current_session,
        patient_info: PatientInfo {
            name: patient.name,
            condition: patient.condition,
        },
    }))
}

/// Record the next session of the caller's assigned series
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(request): ApiJson<CreateSessionRequest>,
) -> Result<(StatusCode, Json<WithMessage<Session>>), ApiError> {
    auth.require(Role::Patient)?;
    let new_session = validate_session_request(&request, state.config.validation.comments_min_length)?;

    let patient = caller_patient(&state, &auth).await?;
    let snapshot = patient
        .snapshot()
        .ok_or_else(|| ApiError::rule(RuleCode::NoSeriesAssigned, "No series assigned"))?;

    let session = with_retry(&state.retry, || Session::record(&state.db, &patient.id, &new_session))
        .await?
        .ok_or_else(|| ApiError::rule(RuleCode::SeriesCompleted, "All sessions of this series are already completed"))?;

    let message = format!(
        "{} completed session {} of {} in \"{}\" (pain {} → {})",
        patient.name,
        session.session_number,
        snapshot.total_sessions,
        snapshot.name,
        session.pain_before,
        session.pain_after,
    );
    notify_user(
        &state,
        &patient.instructor_id,
        NotificationKind::SessionCompleted,
        "Session completed",
        &message,
    )
    .await;

    state.cache.invalidate_prefix(prefixes::PATIENTS);
    state.cache.invalidate_prefix(prefixes::DASHBOARD);
    state.cache.invalidate_prefix(prefixes::THERAPY_SERIES);

    tracing::info!(
        patient_id = %patient.id,
        series_id = %session.series_id,
        session_number = session.session_number,
        "Session completed"
    );
    track_event(
        &state,
        Some(&auth.id),
        events::SESSION_COMPLETED,
        json!({
            "patientId": patient.id,
            "seriesId": session.series_id,
            "sessionNumber": session.session_number,
            "painImprovement": session.pain_before - session.pain_after,
        }),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(WithMessage::new(session, "Session recorded successfully")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::validation::ValidationCode;
    use crate::db::{PatientInput, SeriesPosture, TherapySeries, User};
    use crate::test_support::test_state;
    use crate::DbPool;

    fn new_session(pain_before: i64, pain_after: i64) -> NewSession {
        NewSession {
            pain_before,
            pain_after,
            comments: "Felt great today".to_string(),
            duration_minutes: 30,
        }
    }

    async fn assigned_patient(db: &DbPool, total_sessions: i64) -> (Patient, TherapySeries) {
        let instructor = User::create(db, "ines@example.com", "x", "Ines", Role::Instructor)
            .await
            .unwrap();
        let patient = Patient::create(
            db,
            &instructor.id,
            &PatientInput {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                age: 34,
                condition: None,
            },
        )
        .await
        .unwrap();
        let postures = vec![SeriesPosture {
            posture_id: 1,
            name: "Postura del Niño".into(),
            sanskrit: Some("Balasana".into()),
            duration_minutes: 5,
        }];
        let series = TherapySeries::create(db, &instructor.id, "Calma", "anxiety", &postures, total_sessions)
            .await
            .unwrap();
        let patient = Patient::assign_series(db, &patient.id, &instructor.id, &series.to_response())
            .await
            .unwrap()
            .unwrap();
        (patient, series)
    }

    async fn session_count(db: &DbPool) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(db)
            .await
            .unwrap();
        count
    }

    #[test]
    fn test_validate_session_request() {
        let request: CreateSessionRequest = serde_json::from_value(json!({
            "painBefore": "7",
            "painAfter": 3,
            "comments": "ok",
        }))
        .unwrap();
        let err = validate_session_request(&request, 10).unwrap_err();
        assert_eq!(err.field, "comments");
        assert_eq!(err.code, ValidationCode::TooShort);

        let request: CreateSessionRequest = serde_json::from_value(json!({
            "painBefore": 7,
            "painAfter": 3,
            "comments": "Felt great today",
            "duration": 45,
        }))
        .unwrap();
        let session = validate_session_request(&request, 10).unwrap();
        assert_eq!(session.pain_before, 7);
        assert_eq!(session.duration_minutes, 45);
    }

    #[test]
    fn test_pain_level_out_of_range() {
        let request: CreateSessionRequest = serde_json::from_value(json!({
            "painBefore": 11,
            "painAfter": 3,
            "comments": "Felt great today",
        }))
        .unwrap();
        let err = validate_session_request(&request, 10).unwrap_err();
        assert_eq!(err.field, "painBefore");
    }

    #[tokio::test]
    async fn test_record_numbers_sessions_and_stops_at_total() {
        let (state, _dir) = test_state().await;
        let (patient, series) = assigned_patient(&state.db, 2).await;

        let first = Session::record(&state.db, &patient.id, &new_session(7, 4)).await.unwrap().unwrap();
        let second = Session::record(&state.db, &patient.id, &new_session(6, 2)).await.unwrap().unwrap();
        assert_eq!(first.session_number, 1);
        assert_eq!(second.session_number, 2);
        assert_eq!(second.series_id, series.id);

        // Series complete: nothing is written and the counter stays put
        let third = Session::record(&state.db, &patient.id, &new_session(5, 1)).await.unwrap();
        assert!(third.is_none());
        assert_eq!(session_count(&state.db).await, 2);

        let patient = Patient::find_owned(&state.db, &patient.id, &patient.instructor_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patient.current_session, 2);
    }

    #[tokio::test]
    async fn test_concurrent_completions_get_distinct_numbers() {
        let (state, _dir) = test_state().await;
        let (patient, _series) = assigned_patient(&state.db, 10).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let db = state.db.clone();
            let patient_id = patient.id.clone();
            handles.push(tokio::spawn(async move {
                Session::record(&db, &patient_id, &new_session(6, 3)).await
            }));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            let session = handle.await.unwrap().unwrap().unwrap();
            numbers.push(session.session_number);
        }
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_snapshot_survives_series_deletion() {
        let (state, _dir) = test_state().await;
        let (patient, series) = assigned_patient(&state.db, 3).await;

        // Soft-delete directly, skipping the in-use check
        sqlx::query("UPDATE therapy_series SET is_active = 0 WHERE id = ?")
            .bind(&series.id)
            .execute(&state.db)
            .await
            .unwrap();

        let patient = Patient::find_owned(&state.db, &patient.id, &patient.instructor_id)
            .await
            .unwrap()
            .unwrap();
        let snapshot = patient.snapshot().unwrap();
        assert_eq!(snapshot.id, series.id);
        assert_eq!(snapshot.name, "Calma");
        assert_eq!(snapshot.postures.len(), 1);

        let session = Session::record(&state.db, &patient.id, &new_session(8, 5)).await.unwrap();
        assert_eq!(session.unwrap().session_number, 1);
    }

    #[tokio::test]
    async fn test_unassigned_patient_records_nothing() {
        let (state, _dir) = test_state().await;
        let instructor = User::create(&state.db, "ines@example.com", "x", "Ines", Role::Instructor)
            .await
            .unwrap();
        let patient = Patient::create(
            &state.db,
            &instructor.id,
            &PatientInput {
                name: "Luis".into(),
                email: "luis@example.com".into(),
                age: 50,
                condition: None,
            },
        )
        .await
        .unwrap();

        let session = Session::record(&state.db, &patient.id, &new_session(5, 5)).await.unwrap();
        assert!(session.is_none());
        assert_eq!(session_count(&state.db).await, 0);
    }
}

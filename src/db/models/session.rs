//! Practice session models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::db::now_timestamp;

/// A completed practice session. Sessions are append-only.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub patient_id: String,
    pub series_id: String,
    /// 1-based position within the assigned series
    pub session_number: i64,
    pub pain_before: i64,
    pub pain_after: i64,
    pub comments: String,
    pub duration_minutes: i64,
    pub completed_at: String,
}

/// Session joined with the series it belongs to
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionWithSeries {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub session: Session,
    pub series_name: Option<String>,
    pub therapy_type: Option<String>,
}

/// Body of `POST /api/sessions`; fields are validated by hand
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub pain_before: Option<serde_json::Value>,
    pub pain_after: Option<serde_json::Value>,
    pub comments: Option<String>,
    #[serde(alias = "duration")]
    pub duration_minutes: Option<serde_json::Value>,
}

/// Validated session fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub pain_before: i64,
    pub pain_after: i64,
    pub comments: String,
    pub duration_minutes: i64,
}

impl Session {
    /// Record a session and advance the patient's counter atomically.
    ///
    /// The counter is bumped first, guarded by the snapshot's session total,
    /// so the write lock is held before the number is read back. Returns
    /// `Ok(None)` without writing anything when the patient has no
    /// assignment or every session of it is already recorded.
    pub async fn record(
        db: &SqlitePool,
        patient_id: &str,
        session: &NewSession,
    ) -> Result<Option<Session>, sqlx::Error> {
        let mut tx = db.begin().await?;
        let now = now_timestamp();

        let advanced: Option<(i64, String)> = sqlx::query_as(
            r#"
            UPDATE patients
            SET current_session = current_session + 1, updated_at = ?
            WHERE id = ? AND is_active = 1
              AND assigned_series IS NOT NULL
              AND current_session < json_extract(assigned_series, '$.totalSessions')
            RETURNING current_session, json_extract(assigned_series, '$.id')
            "#,
        )
        .bind(&now)
        .bind(patient_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((session_number, series_id)) = advanced else {
            // Dropping the transaction rolls it back
            return Ok(None);
        };

        let id = uuid::Uuid::new_v4().to_string();
        let recorded = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, patient_id, series_id, session_number, pain_before, pain_after, comments, duration_minutes, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(patient_id)
        .bind(&series_id)
        .bind(session_number)
        .bind(session.pain_before)
        .bind(session.pain_after)
        .bind(&session.comments)
        .bind(session.duration_minutes)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(patient_id, session_number, "Session recorded");
        Ok(Some(recorded))
    }

    /// Sessions of a patient with their series, newest first
    pub async fn list_for_patient(db: &SqlitePool, patient_id: &str) -> Result<Vec<SessionWithSeries>, sqlx::Error> {
        sqlx::query_as::<_, SessionWithSeries>(
            r#"
            SELECT s.*, ts.name AS series_name, ts.therapy_type AS therapy_type
            FROM sessions s
            LEFT JOIN therapy_series ts ON ts.id = s.series_id
            WHERE s.patient_id = ?
            ORDER BY s.completed_at DESC, s.session_number DESC
            "#,
        )
        .bind(patient_id)
        .fetch_all(db)
        .await
    }
}

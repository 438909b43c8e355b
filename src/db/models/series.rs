//! Therapy series models.
//!
//! A series is an ordered list of catalog postures repeated for a fixed
//! number of sessions. Series are never edited; they are soft-deleted, and
//! patients keep a JSON snapshot of the series they were assigned.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::db::now_timestamp;

/// One posture within a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPosture {
    pub posture_id: i64,
    pub name: String,
    #[serde(default)]
    pub sanskrit: Option<String>,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct TherapySeries {
    pub id: String,
    pub name: String,
    pub therapy_type: String,
    /// JSON array of [`SeriesPosture`]
    pub postures: String,
    pub total_sessions: i64,
    pub instructor_id: String,
    pub is_active: bool,
    pub created_at: String,
}

/// Series as returned by the API and as stored in a patient's snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TherapySeriesResponse {
    pub id: String,
    pub name: String,
    pub therapy_type: String,
    pub postures: Vec<SeriesPosture>,
    pub total_sessions: i64,
    pub instructor_id: String,
    pub created_at: String,
}

/// Copy of a series taken when it is assigned to a patient
pub type SeriesSnapshot = TherapySeriesResponse;

impl TherapySeries {
    pub fn parsed_postures(&self) -> Vec<SeriesPosture> {
        serde_json::from_str(&self.postures).unwrap_or_default()
    }

    pub fn to_response(&self) -> TherapySeriesResponse {
        TherapySeriesResponse {
            id: self.id.clone(),
            name: self.name.clone(),
            therapy_type: self.therapy_type.clone(),
            postures: self.parsed_postures(),
            total_sessions: self.total_sessions,
            instructor_id: self.instructor_id.clone(),
            created_at: self.created_at.clone(),
        }
    }

    /// Active series owned by `instructor_id`
    pub async fn find_owned(
        db: &SqlitePool,
        id: &str,
        instructor_id: &str,
    ) -> Result<Option<TherapySeries>, sqlx::Error> {
        sqlx::query_as::<_, TherapySeries>(
            "SELECT * FROM therapy_series WHERE id = ? AND instructor_id = ? AND is_active = 1",
        )
        .bind(id)
        .bind(instructor_id)
        .fetch_optional(db)
        .await
    }

    pub async fn name_taken(db: &SqlitePool, instructor_id: &str, name: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM therapy_series WHERE instructor_id = ? AND name = ? AND is_active = 1",
        )
        .bind(instructor_id)
        .bind(name)
        .fetch_optional(db)
        .await?;
        Ok(row.is_some())
    }

    pub async fn create(
        db: &SqlitePool,
        instructor_id: &str,
        name: &str,
        therapy_type: &str,
        postures: &[SeriesPosture],
        total_sessions: i64,
    ) -> Result<TherapySeries, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let postures_json = serde_json::to_string(postures).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query_as::<_, TherapySeries>(
            r#"
            INSERT INTO therapy_series (id, name, therapy_type, postures, total_sessions, instructor_id, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(therapy_type)
        .bind(&postures_json)
        .bind(total_sessions)
        .bind(instructor_id)
        .bind(now_timestamp())
        .fetch_one(db)
        .await
    }

    /// Number of active patients whose snapshot refers to this series
    pub async fn count_assigned(db: &SqlitePool, id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM patients WHERE is_active = 1 AND json_extract(assigned_series, '$.id') = ?",
        )
        .bind(id)
        .fetch_one(db)
        .await?;
        Ok(count)
    }

    pub async fn soft_delete(db: &SqlitePool, id: &str, instructor_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE therapy_series SET is_active = 0 WHERE id = ? AND instructor_id = ? AND is_active = 1",
        )
        .bind(id)
        .bind(instructor_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Series row with usage counts for list views
#[derive(Debug, Clone, FromRow)]
pub struct SeriesWithCountsRow {
    #[sqlx(flatten)]
    pub series: TherapySeries,
    pub assigned_patients: i64,
    pub sessions_recorded: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesWithCounts {
    #[serde(flatten)]
    pub series: TherapySeriesResponse,
    pub assigned_patients: i64,
    pub sessions_recorded: i64,
}

impl From<SeriesWithCountsRow> for SeriesWithCounts {
    fn from(row: SeriesWithCountsRow) -> Self {
        Self {
            series: row.series.to_response(),
            assigned_patients: row.assigned_patients,
            sessions_recorded: row.sessions_recorded,
        }
    }
}

impl SeriesWithCounts {
    /// Active series of an instructor, newest first
    pub async fn list_for_instructor(
        db: &SqlitePool,
        instructor_id: &str,
    ) -> Result<Vec<SeriesWithCounts>, sqlx::Error> {
        let rows = sqlx::query_as::<_, SeriesWithCountsRow>(
            r#"
            SELECT ts.*,
                   (SELECT COUNT(*) FROM patients p
                     WHERE p.is_active = 1 AND json_extract(p.assigned_series, '$.id') = ts.id) AS assigned_patients,
                   (SELECT COUNT(*) FROM sessions s WHERE s.series_id = ts.id) AS sessions_recorded
            FROM therapy_series ts
            WHERE ts.instructor_id = ? AND ts.is_active = 1
            ORDER BY ts.created_at DESC, ts.rowid DESC
            "#,
        )
        .bind(instructor_id)
        .fetch_all(db)
        .await?;

        Ok(rows.into_iter().map(SeriesWithCounts::from).collect())
    }
}

/// Body of `POST /api/therapy-series`; fields are validated by hand
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSeriesRequest {
    pub name: Option<String>,
    pub therapy_type: Option<String>,
    pub postures: Option<serde_json::Value>,
    pub total_sessions: Option<serde_json::Value>,
}

/// Body of `POST /api/patients/{id}/assign-series`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignSeriesRequest {
    pub series_id: Option<String>,
}

//! Patient models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::series::SeriesSnapshot;
use crate::db::now_timestamp;

#[derive(Debug, Clone, FromRow)]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub email: String,
    pub age: i64,
    pub condition: Option<String>,
    pub instructor_id: String,
    /// JSON [`SeriesSnapshot`], set on assignment
    pub assigned_series: Option<String>,
    pub current_session: i64,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Validated patient fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientInput {
    pub name: String,
    pub email: String,
    pub age: i64,
    pub condition: Option<String>,
}

/// Body of patient create/update requests; fields are validated by hand
#[derive(Debug, Default, Deserialize)]
pub struct PatientRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub age: Option<serde_json::Value>,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub age: i64,
    pub condition: Option<String>,
    pub instructor_id: String,
    pub assigned_series: Option<SeriesSnapshot>,
    pub current_session: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Patient> for PatientResponse {
    fn from(patient: Patient) -> Self {
        let assigned_series = patient.snapshot();
        Self {
            id: patient.id,
            name: patient.name,
            email: patient.email,
            age: patient.age,
            condition: patient.condition,
            instructor_id: patient.instructor_id,
            assigned_series,
            current_session: patient.current_session,
            created_at: patient.created_at,
            updated_at: patient.updated_at,
        }
    }
}

impl Patient {
    /// Parsed assignment snapshot; None when unassigned or unreadable
    pub fn snapshot(&self) -> Option<SeriesSnapshot> {
        self.assigned_series
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
    }

    /// Active patient owned by `instructor_id`
    pub async fn find_owned(
        db: &SqlitePool,
        id: &str,
        instructor_id: &str,
    ) -> Result<Option<Patient>, sqlx::Error> {
        sqlx::query_as::<_, Patient>(
            "SELECT * FROM patients WHERE id = ? AND instructor_id = ? AND is_active = 1",
        )
        .bind(id)
        .bind(instructor_id)
        .fetch_optional(db)
        .await
    }

    /// Active patient record matching a patient account's email.
    ///
    /// An email may be registered with several instructors; the most recently
    /// updated record wins.
    pub async fn find_active_by_email(db: &SqlitePool, email: &str) -> Result<Option<Patient>, sqlx::Error> {
        sqlx::query_as::<_, Patient>(
            "SELECT * FROM patients WHERE email = ? AND is_active = 1 ORDER BY updated_at DESC, rowid DESC LIMIT 1",
        )
        .bind(email)
        .fetch_optional(db)
        .await
    }

    /// Whether another active patient of the instructor uses `email`
    pub async fn email_taken(
        db: &SqlitePool,
        instructor_id: &str,
        email: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM patients
            WHERE instructor_id = ? AND email = ? AND is_active = 1 AND id != COALESCE(?, '')
            "#,
        )
        .bind(instructor_id)
        .bind(email)
        .bind(exclude_id)
        .fetch_optional(db)
        .await?;
        Ok(row.is_some())
    }

    pub async fn create(
        db: &SqlitePool,
        instructor_id: &str,
        input: &PatientInput,
    ) -> Result<Patient, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();

        sqlx::query_as::<_, Patient>(
            r#"
            INSERT INTO patients (id, name, email, age, condition, instructor_id, current_session, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, 1, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(input.age)
        .bind(&input.condition)
        .bind(instructor_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(db)
        .await
    }

    /// Replace the editable fields; None when the patient is not owned or active
    pub async fn update(
        db: &SqlitePool,
        id: &str,
        instructor_id: &str,
        input: &PatientInput,
    ) -> Result<Option<Patient>, sqlx::Error> {
        sqlx::query_as::<_, Patient>(
            r#"
            UPDATE patients
            SET name = ?, email = ?, age = ?, condition = ?, updated_at = ?
            WHERE id = ? AND instructor_id = ? AND is_active = 1
            RETURNING *
            "#,
        )
        .bind(&input.name)
        .bind(&input.email)
        .bind(input.age)
        .bind(&input.condition)
        .bind(now_timestamp())
        .bind(id)
        .bind(instructor_id)
        .fetch_optional(db)
        .await
    }

    pub async fn soft_delete(db: &SqlitePool, id: &str, instructor_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE patients SET is_active = 0, updated_at = ? WHERE id = ? AND instructor_id = ? AND is_active = 1",
        )
        .bind(now_timestamp())
        .bind(id)
        .bind(instructor_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store a series snapshot and restart the session count
    pub async fn assign_series(
        db: &SqlitePool,
        id: &str,
        instructor_id: &str,
        snapshot: &SeriesSnapshot,
    ) -> Result<Option<Patient>, sqlx::Error> {
        let snapshot_json = serde_json::to_string(snapshot).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query_as::<_, Patient>(
            r#"
            UPDATE patients
            SET assigned_series = ?, current_session = 0, updated_at = ?
            WHERE id = ? AND instructor_id = ? AND is_active = 1
            RETURNING *
            "#,
        )
        .bind(&snapshot_json)
        .bind(now_timestamp())
        .bind(id)
        .bind(instructor_id)
        .fetch_optional(db)
        .await
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PatientWithStatsRow {
    #[sqlx(flatten)]
    pub patient: Patient,
    pub total_sessions_completed: i64,
    pub avg_pain_improvement: Option<f64>,
}

/// Patient with session aggregates for list views
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientWithStats {
    #[serde(flatten)]
    pub patient: PatientResponse,
    pub total_sessions_completed: i64,
    pub avg_pain_improvement: Option<f64>,
}

impl From<PatientWithStatsRow> for PatientWithStats {
    fn from(row: PatientWithStatsRow) -> Self {
        Self {
            patient: row.patient.into(),
            total_sessions_completed: row.total_sessions_completed,
            avg_pain_improvement: row.avg_pain_improvement,
        }
    }
}

impl PatientWithStats {
    /// Active patients of an instructor, newest first
    pub async fn list_for_instructor(
        db: &SqlitePool,
        instructor_id: &str,
    ) -> Result<Vec<PatientWithStats>, sqlx::Error> {
        let rows = sqlx::query_as::<_, PatientWithStatsRow>(
            r#"
            SELECT p.*,
                   COUNT(s.id) AS total_sessions_completed,
                   AVG(s.pain_before - s.pain_after) AS avg_pain_improvement
            FROM patients p
            LEFT JOIN sessions s ON s.patient_id = p.id
            WHERE p.instructor_id = ? AND p.is_active = 1
            GROUP BY p.id
            ORDER BY p.created_at DESC, p.rowid DESC
            "#,
        )
        .bind(instructor_id)
        .fetch_all(db)
        .await?;

        Ok(rows.into_iter().map(PatientWithStats::from).collect())
    }
}

/// Response of `GET /api/my-series`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MySeriesResponse {
    pub series: SeriesSnapshot,
    pub current_session: i64,
    pub patient_info: PatientInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientInfo {
    pub name: String,
    pub condition: Option<String>,
}

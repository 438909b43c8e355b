//! Aggregates for the instructor dashboard and session reports.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_patients: i64,
    /// Active patients with a series assigned
    pub active_patients: i64,
    pub total_series: i64,
    pub total_sessions: i64,
    pub avg_pain_improvement: Option<f64>,
    pub avg_session_duration: Option<f64>,
}

impl DashboardStats {
    pub async fn for_instructor(db: &SqlitePool, instructor_id: &str) -> Result<DashboardStats, sqlx::Error> {
        let mut stats = sqlx::query_as::<_, DashboardStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM patients WHERE instructor_id = ?1 AND is_active = 1) AS total_patients,
                (SELECT COUNT(*) FROM patients
                  WHERE instructor_id = ?1 AND is_active = 1 AND assigned_series IS NOT NULL) AS active_patients,
                (SELECT COUNT(*) FROM therapy_series WHERE instructor_id = ?1 AND is_active = 1) AS total_series,
                COUNT(s.id) AS total_sessions,
                AVG(s.pain_before - s.pain_after) AS avg_pain_improvement,
                AVG(s.duration_minutes) AS avg_session_duration
            FROM sessions s
            JOIN patients p ON p.id = s.patient_id
            WHERE p.instructor_id = ?1 AND p.is_active = 1
            "#,
        )
        .bind(instructor_id)
        .fetch_one(db)
        .await?;

        // Two decimals for improvement, whole minutes for duration
        stats.avg_pain_improvement = stats.avg_pain_improvement.map(|v| (v * 100.0).round() / 100.0);
        stats.avg_session_duration = stats.avg_session_duration.map(f64::round);
        Ok(stats)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub patient_name: String,
    pub session_number: i64,
    pub pain_before: i64,
    pub pain_after: i64,
    pub date: String,
}

impl RecentActivity {
    pub async fn latest(db: &SqlitePool, instructor_id: &str, limit: i64) -> Result<Vec<RecentActivity>, sqlx::Error> {
        sqlx::query_as::<_, RecentActivity>(
            r#"
            SELECT p.name AS patient_name, s.session_number, s.pain_before, s.pain_after, s.completed_at AS date
            FROM sessions s
            JOIN patients p ON p.id = s.patient_id
            WHERE p.instructor_id = ?
            ORDER BY s.completed_at DESC, s.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(instructor_id)
        .bind(limit)
        .fetch_all(db)
        .await
    }
}

/// Monthly pain averages
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PainTrend {
    /// `YYYY-MM`
    pub month: String,
    pub avg_pain_before: f64,
    pub avg_pain_after: f64,
    pub session_count: i64,
}

impl PainTrend {
    /// Trend over the last `months` months, oldest first
    pub async fn monthly(db: &SqlitePool, instructor_id: &str, months: u32) -> Result<Vec<PainTrend>, sqlx::Error> {
        sqlx::query_as::<_, PainTrend>(
            r#"
            SELECT strftime('%Y-%m', s.completed_at) AS month,
                   AVG(s.pain_before) AS avg_pain_before,
                   AVG(s.pain_after) AS avg_pain_after,
                   COUNT(s.id) AS session_count
            FROM sessions s
            JOIN patients p ON p.id = s.patient_id
            WHERE p.instructor_id = ? AND s.completed_at >= date('now', ?)
            GROUP BY month
            ORDER BY month
            "#,
        )
        .bind(instructor_id)
        .bind(format!("-{} months", months))
        .fetch_all(db)
        .await
    }
}

/// Session aggregates per therapy type
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TherapyStats {
    pub therapy_type: String,
    pub session_count: i64,
    pub avg_improvement: Option<f64>,
    pub avg_duration: Option<f64>,
}

impl TherapyStats {
    pub async fn by_type(db: &SqlitePool, instructor_id: &str) -> Result<Vec<TherapyStats>, sqlx::Error> {
        sqlx::query_as::<_, TherapyStats>(
            r#"
            SELECT ts.therapy_type,
                   COUNT(s.id) AS session_count,
                   AVG(s.pain_before - s.pain_after) AS avg_improvement,
                   AVG(s.duration_minutes) AS avg_duration
            FROM sessions s
            JOIN therapy_series ts ON ts.id = s.series_id
            JOIN patients p ON p.id = s.patient_id
            WHERE p.instructor_id = ?
            GROUP BY ts.therapy_type
            ORDER BY ts.therapy_type
            "#,
        )
        .bind(instructor_id)
        .fetch_all(db)
        .await
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub stats: DashboardStats,
    pub recent_activity: Vec<RecentActivity>,
    pub pain_trends: Vec<PainTrend>,
    pub therapy_stats: Vec<TherapyStats>,
    pub generated_at: String,
}

/// One line of the session report
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub patient_name: String,
    pub patient_email: String,
    pub patient_age: i64,
    pub patient_condition: Option<String>,
    pub series_name: String,
    pub therapy_type: String,
    pub session_number: i64,
    pub pain_before: i64,
    pub pain_after: i64,
    pub pain_improvement: i64,
    pub duration_minutes: i64,
    pub comments: String,
    pub completed_at: String,
}

impl ReportRow {
    /// Sessions of the instructor's patients, newest first.
    ///
    /// Dates are inclusive; a bare `YYYY-MM-DD` upper bound covers the whole day.
    pub async fn fetch(
        db: &SqlitePool,
        instructor_id: &str,
        date_from: Option<&str>,
        date_to: Option<&str>,
    ) -> Result<Vec<ReportRow>, sqlx::Error> {
        sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT p.name AS patient_name,
                   p.email AS patient_email,
                   p.age AS patient_age,
                   p.condition AS patient_condition,
                   ts.name AS series_name,
                   ts.therapy_type AS therapy_type,
                   s.session_number,
                   s.pain_before,
                   s.pain_after,
                   s.pain_before - s.pain_after AS pain_improvement,
                   s.duration_minutes,
                   s.comments,
                   s.completed_at
            FROM sessions s
            JOIN patients p ON p.id = s.patient_id
            JOIN therapy_series ts ON ts.id = s.series_id
            WHERE p.instructor_id = ?1
              AND (?2 IS NULL OR s.completed_at >= ?2)
              AND (?3 IS NULL OR s.completed_at <= CASE WHEN length(?3) = 10 THEN ?3 || ' 23:59:59' ELSE ?3 END)
            ORDER BY s.completed_at DESC, s.rowid DESC
            "#,
        )
        .bind(instructor_id)
        .bind(date_from)
        .bind(date_to)
        .fetch_all(db)
        .await
    }
}

/// Query string of `GET /api/reports/export`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub format: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_sessions: usize,
    pub avg_pain_improvement: f64,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub report_data: Vec<ReportRow>,
    pub generated_at: String,
    pub instructor: String,
    pub summary: ReportSummary,
}

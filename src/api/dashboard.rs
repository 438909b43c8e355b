//! Instructor dashboard analytics and report export.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::analytics::track_event;
use super::auth::AuthUser;
use super::cache::ResponseCache;
use super::cached_json;
use super::error::ApiError;
use super::validation::{ValidationCode, ValidationError};
use crate::db::{
    events, now_timestamp, DashboardResponse, DashboardStats, PainTrend, RecentActivity, ReportQuery, ReportResponse,
    ReportRow, ReportSummary, Role, TherapyStats,
};
use crate::retry::with_retry;
use crate::AppState;

const RECENT_ACTIVITY_LIMIT: i64 = 10;
const PAIN_TREND_MONTHS: u32 = 6;

/// Aggregated analytics for the caller's patients
pub async fn dashboard_analytics(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    auth.require(Role::Instructor)?;

    let key = ResponseCache::key("/api/dashboard/analytics", &auth.id);
    let ttl = Duration::from_secs(state.config.cache.dashboard_ttl_secs);
    cached_json(&state, key, ttl, || async {
        let db = &state.db;
        let id = auth.id.as_str();
        let (stats, recent_activity, pain_trends, therapy_stats) = tokio::try_join!(
            with_retry(&state.retry, || DashboardStats::for_instructor(db, id)),
            with_retry(&state.retry, || RecentActivity::latest(db, id, RECENT_ACTIVITY_LIMIT)),
            with_retry(&state.retry, || PainTrend::monthly(db, id, PAIN_TREND_MONTHS)),
            with_retry(&state.retry, || TherapyStats::by_type(db, id)),
        )?;

        Ok::<_, ApiError>(DashboardResponse {
            stats,
            recent_activity,
            pain_trends,
            therapy_stats,
            generated_at: now_timestamp(),
        })
    })
    .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Json,
    Csv,
}

fn parse_format(raw: Option<&str>) -> Result<ReportFormat, ValidationError> {
    match raw.map(|f| f.trim().to_lowercase()).as_deref() {
        None | Some("") | Some("json") => Ok(ReportFormat::Json),
        Some("csv") => Ok(ReportFormat::Csv),
        Some(_) => Err(ValidationError::new(
            "format",
            ValidationCode::Format,
            "Format must be json or csv",
        )),
    }
}

/// Accepts `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`; blank means unbounded
fn parse_report_date(raw: Option<&str>, field: &str) -> Result<Option<String>, ValidationError> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let valid = NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || chrono::NaiveDateTime::parse_from_str(value, crate::db::TIMESTAMP_FORMAT).is_ok();
    if valid {
        Ok(Some(value.to_string()))
    } else {
        Err(ValidationError::new(
            field,
            ValidationCode::Format,
            "Dates must use the YYYY-MM-DD format",
        ))
    }
}

fn summarize(rows: &[ReportRow], date_from: Option<String>, date_to: Option<String>) -> ReportSummary {
    let avg_pain_improvement = if rows.is_empty() {
        0.0
    } else {
        let total: i64 = rows.iter().map(|r| r.pain_improvement).sum();
        (total as f64 / rows.len() as f64 * 100.0).round() / 100.0
    };

    ReportSummary {
        total_sessions: rows.len(),
        avg_pain_improvement,
        date_from,
        date_to,
    }
}

const CSV_HEADER: [&str; 13] = [
    "Patient",
    "Email",
    "Age",
    "Condition",
    "Series",
    "Therapy Type",
    "Session",
    "Pain Before",
    "Pain After",
    "Improvement",
    "Duration (min)",
    "Comments",
    "Completed At",
];

fn render_csv(rows: &[ReportRow]) -> Result<String, ApiError> {
    let csv_error = |e: csv::Error| ApiError::internal(format!("Failed to write CSV: {}", e));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER).map_err(csv_error)?;
    for row in rows {
        writer
            .write_record([
                row.patient_name.clone(),
                row.patient_email.clone(),
                row.patient_age.to_string(),
                row.patient_condition.clone().unwrap_or_default(),
                row.series_name.clone(),
                row.therapy_type.clone(),
                row.session_number.to_string(),
                row.pain_before.to_string(),
                row.pain_after.to_string(),
                row.pain_improvement.to_string(),
                row.duration_minutes.to_string(),
                row.comments.clone(),
                row.completed_at.clone(),
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ApiError::internal(format!("Failed to flush CSV: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| ApiError::internal(format!("CSV is not UTF-8: {}", e)))
}

/// Session report of the caller's patients as JSON or CSV
pub async fn export_report(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    auth.require(Role::Instructor)?;

    let format = parse_format(query.format.as_deref())?;
    let date_from = parse_report_date(query.date_from.as_deref(), "dateFrom")?;
    let date_to = parse_report_date(query.date_to.as_deref(), "dateTo")?;

    let rows = with_retry(&state.retry, || {
        ReportRow::fetch(&state.db, &auth.id, date_from.as_deref(), date_to.as_deref())
    })
    .await?;

    tracing::info!(instructor_id = %auth.id, rows = rows.len(), ?format, "Report exported");
    track_event(
        &state,
        Some(&auth.id),
        events::REPORT_EXPORTED,
        json!({
            "format": if format == ReportFormat::Csv { "csv" } else { "json" },
            "rows": rows.len(),
            "dateFrom": date_from,
            "dateTo": date_to,
        }),
    )
    .await;

    match format {
        ReportFormat::Csv => {
            let filename = format!(
                "softzen-report-{}.csv",
                chrono::Utc::now().format("%Y-%m-%d")
            );
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                render_csv(&rows)?,
            )
                .into_response())
        }
        ReportFormat::Json => {
            let summary = summarize(&rows, date_from, date_to);
            Ok(Json(ReportResponse {
                report_data: rows,
                generated_at: now_timestamp(),
                instructor: auth.name,
                summary,
            })
            .into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(comments: &str, pain_before: i64, pain_after: i64) -> ReportRow {
        ReportRow {
            patient_name: "Ana López".into(),
            patient_email: "ana@example.com".into(),
            patient_age: 34,
            patient_condition: Some("anxiety".into()),
            series_name: "Calma".into(),
            therapy_type: "anxiety".into(),
            session_number: 1,
            pain_before,
            pain_after,
            pain_improvement: pain_before - pain_after,
            duration_minutes: 30,
            comments: comments.into(),
            completed_at: "2024-03-01 10:00:00".into(),
        }
    }

    #[test]
    fn test_render_csv() {
        let csv = render_csv(&[row("Relaxed, calm", 7, 3), row("said \"namaste\"", 6, 6)]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER.join(",").as_str()));

        let line = lines.next().unwrap();
        assert!(line.starts_with("Ana López,ana@example.com,34,anxiety,Calma,anxiety,1,7,3,4,30,"));
        assert!(line.contains("\"Relaxed, calm\""));

        let line = lines.next().unwrap();
        assert!(line.contains("\"said \"\"namaste\"\"\""));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format(None).unwrap(), ReportFormat::Json);
        assert_eq!(parse_format(Some("CSV")).unwrap(), ReportFormat::Csv);
        let err = parse_format(Some("xml")).unwrap_err();
        assert_eq!(err.field, "format");
    }

    #[test]
    fn test_parse_report_date() {
        assert_eq!(parse_report_date(None, "dateFrom").unwrap(), None);
        assert_eq!(parse_report_date(Some(" "), "dateFrom").unwrap(), None);
        assert_eq!(
            parse_report_date(Some("2024-03-01"), "dateFrom").unwrap().as_deref(),
            Some("2024-03-01")
        );
        let err = parse_report_date(Some("03/01/2024"), "dateTo").unwrap_err();
        assert_eq!(err.field, "dateTo");
    }

    #[test]
    fn test_summary_average() {
        let summary = summarize(&[row("a", 7, 3), row("b", 6, 5)], None, None);
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.avg_pain_improvement, 2.5);

        let empty = summarize(&[], Some("2024-01-01".into()), None);
        assert_eq!(empty.avg_pain_improvement, 0.0);
        assert_eq!(empty.date_from.as_deref(), Some("2024-01-01"));
    }
}

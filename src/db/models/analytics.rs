//! Analytics events.

use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::db::now_timestamp;

/// Event type names recorded by the API
pub mod events {
    pub const USER_REGISTERED: &str = "user_registered";
    pub const USER_LOGIN: &str = "user_login";
    pub const USER_DEACTIVATED: &str = "user_deactivated";
    pub const PATIENT_CREATED: &str = "patient_created";
    pub const PATIENT_UPDATED: &str = "patient_updated";
    pub const PATIENT_DELETED: &str = "patient_deleted";
    pub const SERIES_CREATED: &str = "series_created";
    pub const SERIES_DELETED: &str = "series_deleted";
    pub const SERIES_ASSIGNED: &str = "series_assigned";
    pub const SESSION_COMPLETED: &str = "session_completed";
    pub const REPORT_EXPORTED: &str = "report_exported";
    pub const API_REQUEST: &str = "api_request";
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub id: String,
    pub user_id: Option<String>,
    pub event_type: String,
    /// JSON object
    pub event_data: String,
    pub created_at: String,
}

impl AnalyticsEvent {
    pub async fn record(
        db: &SqlitePool,
        user_id: Option<&str>,
        event_type: &str,
        data: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO analytics_events (id, user_id, event_type, event_data, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(event_type)
        .bind(data.to_string())
        .bind(now_timestamp())
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn list_for_user(db: &SqlitePool, user_id: &str) -> Result<Vec<AnalyticsEvent>, sqlx::Error> {
        sqlx::query_as::<_, AnalyticsEvent>(
            "SELECT * FROM analytics_events WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(db)
        .await
    }
}

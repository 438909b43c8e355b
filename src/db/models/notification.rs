//! In-app notifications.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::db::now_timestamp;

/// Notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Sent to a patient's account when a series is assigned
    SeriesAssigned,
    /// Sent to the instructor when a patient records a session
    SessionCompleted,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SeriesAssigned => write!(f, "series_assigned"),
            Self::SessionCompleted => write!(f, "session_completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
}

impl Notification {
    pub async fn create(
        db: &SqlitePool,
        user_id: &str,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, type, title, message, is_read, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(kind.to_string())
        .bind(title)
        .bind(message)
        .bind(now_timestamp())
        .execute(db)
        .await?;
        Ok(())
    }

    /// Latest notifications of a user, newest first
    pub async fn list_recent(db: &SqlitePool, user_id: &str, limit: i64) -> Result<Vec<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(db)
        .await
    }

    /// Mark one of the user's notifications read; false when none matched
    pub async fn mark_read(db: &SqlitePool, id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

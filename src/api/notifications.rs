//! Notification endpoints and the best-effort sender used by other handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiError;
use crate::db::{Notification, NotificationKind};
use crate::retry::with_retry;
use crate::AppState;

/// How many notifications the list endpoint returns
const NOTIFICATION_LIST_LIMIT: i64 = 20;

/// Create a notification for `user_id`.
///
/// One attempt only; a failure is logged and never fails the caller's request.
pub async fn notify_user(state: &AppState, user_id: &str, kind: NotificationKind, title: &str, message: &str) {
    if let Err(e) = Notification::create(&state.db, user_id, kind, title, message).await {
        tracing::warn!(
            user_id = user_id,
            kind = %kind,
            error = %e,
            "Failed to create notification"
        );
    }
}

/// Latest notifications of the caller
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let notifications = with_retry(&state.retry, || {
        Notification::list_recent(&state.db, &auth.id, NOTIFICATION_LIST_LIMIT)
    })
    .await?;

    Ok(Json(notifications))
}

/// Mark one of the caller's notifications as read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = with_retry(&state.retry, || Notification::mark_read(&state.db, &id, &auth.id)).await?;
    if !updated {
        return Err(ApiError::not_found("Notification not found"));
    }

    Ok(Json(json!({ "id": id, "message": "Notification marked as read" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Role, User};
    use crate::test_support::test_state;

    #[tokio::test]
    async fn test_notify_and_mark_read() {
        let (state, _dir) = test_state().await;
        let user = User::create(&state.db, "ana@example.com", "x", "Ana", Role::Patient)
            .await
            .unwrap();

        notify_user(&state, &user.id, NotificationKind::SeriesAssigned, "New series", "Start when ready").await;

        let list = Notification::list_recent(&state.db, &user.id, 20).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].kind, "series_assigned");
        assert!(!list[0].is_read);

        assert!(Notification::mark_read(&state.db, &list[0].id, &user.id).await.unwrap());
        // Another user's id does not match
        assert!(!Notification::mark_read(&state.db, &list[0].id, "someone-else").await.unwrap());

        let list = Notification::list_recent(&state.db, &user.id, 20).await.unwrap();
        assert!(list[0].is_read);
    }

    #[tokio::test]
    async fn test_notify_unknown_user_is_swallowed() {
        let (state, _dir) = test_state().await;
        notify_user(&state, "ghost", NotificationKind::SessionCompleted, "t", "m").await;

        let list = Notification::list_recent(&state.db, "ghost", 20).await.unwrap();
        assert!(list.is_empty());
    }
}

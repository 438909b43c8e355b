//! Best-effort analytics events.

use serde_json::Value;

use crate::db::AnalyticsEvent;
use crate::AppState;

/// Record an analytics event.
///
/// One attempt only; a failure is logged and never surfaces to the caller.
pub async fn track_event(state: &AppState, user_id: Option<&str>, event_type: &str, data: Value) {
    if let Err(e) = AnalyticsEvent::record(&state.db, user_id, event_type, &data).await {
        tracing::warn!(
            event_type = event_type,
            user_id = user_id,
            error = %e,
            "Failed to record analytics event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{events, Role, User};
    use crate::test_support::test_state;
    use serde_json::json;

    #[tokio::test]
    async fn test_track_event_records_row() {
        let (state, _dir) = test_state().await;
        let user = User::create(&state.db, "ana@example.com", "x", "Ana", Role::Instructor)
            .await
            .unwrap();

        track_event(&state, Some(&user.id), events::USER_LOGIN, json!({"source": "test"})).await;

        let recorded = AnalyticsEvent::list_for_user(&state.db, &user.id).await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].event_type, "user_login");
        assert!(recorded[0].event_data.contains("source"));
    }

    #[tokio::test]
    async fn test_track_event_swallows_failures() {
        let (state, _dir) = test_state().await;
        // Unknown user violates the foreign key
        track_event(&state, Some("missing-user"), events::USER_LOGIN, json!({})).await;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM analytics_events")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}

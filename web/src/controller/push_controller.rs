use crate::error::{Error, Result};
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use log::*;
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

/// Producer-facing push request. `raw_id` anchors reconnect replay for
/// this event; producers leave it empty for frames that need no replay.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PushParams {
    pub user_id: String,
    pub event_name: String,
    pub payload: Value,
    #[serde(default)]
    pub raw_id: String,
}

/// POST an event at a user, fire-and-forget.
///
/// Producers must call this only after their own transaction has
/// committed; a rollback must never be followed by a push. There is no
/// delivery status in the response by design.
#[utoipa::path(
    post,
    path = "/push",
    request_body = PushParams,
    responses(
        (status = 204, description = "Event accepted for delivery"),
        (status = 422, description = "Invalid push request")
    )
)]
pub async fn create(
    State(app_state): State<AppState>,
    Json(params): Json<PushParams>,
) -> Result<StatusCode> {
    if params.user_id.trim().is_empty() {
        return Err(Error::invalid("user_id must not be empty"));
    }
    if params.event_name.trim().is_empty() {
        return Err(Error::invalid("event_name must not be empty"));
    }

    debug!(
        "Accepting push of {} for user {}",
        params.event_name, params.user_id
    );

    app_state
        .gateway
        .push(
            &params.user_id,
            &params.event_name,
            params.payload,
            &params.raw_id,
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;
    use service::config::Config;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn single_instance_state() -> AppState {
        let config = Config::try_parse_from([
            "pulse",
            "--replay-profile",
            "memory",
            "--broadcast-profile",
            "local",
        ])
        .unwrap();
        AppState::new(config, None)
    }

    #[tokio::test]
    async fn test_push_delivers_to_registered_connection() {
        let state = single_instance_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state
            .registry
            .register("u1".to_string(), tx, Duration::from_secs(3600));

        let status = create(
            State(state),
            Json(PushParams {
                user_id: "u1".to_string(),
                event_name: events::MESSAGE_CREATED.to_string(),
                payload: json!({"body": "hi"}),
                raw_id: "1".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_push_rejects_blank_user_id() {
        let state = single_instance_state();

        let result = create(
            State(state),
            Json(PushParams {
                user_id: "  ".to_string(),
                event_name: events::MESSAGE_CREATED.to_string(),
                payload: json!({}),
                raw_id: String::new(),
            }),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_push_rejects_blank_event_name() {
        let state = single_instance_state();

        let result = create(
            State(state),
            Json(PushParams {
                user_id: "u1".to_string(),
                event_name: String::new(),
                payload: json!({}),
                raw_id: String::new(),
            }),
        )
        .await;

        assert!(result.is_err());
    }
}

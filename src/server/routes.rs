//! HTTP endpoint handlers.
//!
//! Every response uses the `{success: true, ...}` / `{success: false,
//! message}` envelope. Validation here is required-field presence only;
//! domain errors carry their own HTTP status.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::error::WagateError;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub number: Option<String>,
    pub message: Option<String>,
    pub schedule: Option<ScheduleSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleSpec {
    pub date: Option<String>,
    pub time: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendChatRequest {
    pub number: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelScheduleRequest {
    pub job_id: Option<String>,
}

fn success(mut body: serde_json::Value) -> Response {
    if let Some(obj) = body.as_object_mut() {
        let _ = obj.insert("success".to_string(), json!(true));
    }
    (StatusCode::OK, Json(body)).into_response()
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({"success": false, "message": message.into()})),
    )
        .into_response()
}

fn domain_error(err: WagateError) -> Response {
    failure(err.status_code(), err.to_string())
}

fn missing(field: &str) -> Response {
    failure(
        StatusCode::BAD_REQUEST,
        format!("Missing required field: {field}"),
    )
}

/// POST /send-message: send now, or schedule when a schedule is attached.
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    let Some(number) = req.number.filter(|v| !v.is_empty()) else {
        return missing("number");
    };
    let Some(message) = req.message.filter(|v| !v.is_empty()) else {
        return missing("message");
    };

    match req.schedule {
        Some(spec) => {
            let (Some(date), Some(time), Some(timezone)) = (spec.date, spec.time, spec.timezone)
            else {
                return failure(
                    StatusCode::BAD_REQUEST,
                    "Schedule requires date, time and timezone",
                );
            };
            match state
                .scheduler
                .schedule(&number, &message, &date, &time, &timezone)
                .await
            {
                Ok(receipt) => success(json!({
                    "message": format!("Message scheduled for {}", receipt.display_time),
                    "jobId": receipt.id,
                    "scheduledTime": receipt.display_time,
                })),
                Err(e @ WagateError::InvalidSchedule(_)) => {
                    failure(StatusCode::BAD_REQUEST, e.to_string())
                }
                Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
        None => match state.gateway.send_message(&number, &message).await {
            Ok(_) => success(json!({"message": "Message sent"})),
            // This endpoint reports every send failure as a server error.
            Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
    }
}

/// POST /api/sendchat: send now, with fine-grained failure codes.
pub async fn send_chat(
    State(state): State<AppState>,
    Json(req): Json<SendChatRequest>,
) -> Response {
    let Some(number) = req.number.filter(|v| !v.is_empty()) else {
        return missing("number");
    };
    let Some(text) = req.text.filter(|v| !v.is_empty()) else {
        return missing("text");
    };

    match state.gateway.send_message(&number, &text).await {
        Ok(message_id) => success(json!({
            "message": "Message sent",
            "messageId": message_id,
        })),
        Err(e) => domain_error(e),
    }
}

/// GET /scheduled-messages
pub async fn scheduled_messages(State(state): State<AppState>) -> Response {
    let scheduled = state.scheduler.list().await;
    success(json!({ "scheduled": scheduled }))
}

/// POST /cancel-schedule
pub async fn cancel_schedule(
    State(state): State<AppState>,
    Json(req): Json<CancelScheduleRequest>,
) -> Response {
    let Some(job_id) = req.job_id.filter(|v| !v.is_empty()) else {
        return missing("jobId");
    };
    match state.scheduler.cancel(&job_id).await {
        Ok(()) => success(json!({
            "message": format!("Scheduled message {job_id} cancelled"),
        })),
        Err(e) => domain_error(e),
    }
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Response {
    let status = state.gateway.status().await;
    match serde_json::to_value(&status) {
        Ok(body) => success(body),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// POST /logout responds immediately; the terminal path exits the process
/// after its grace delay.
pub async fn logout(State(state): State<AppState>) -> Response {
    let gateway = state.gateway.clone();
    let _ = tokio::spawn(async move {
        gateway.logout().await;
    });
    success(json!({"message": "Logout initiated"}))
}

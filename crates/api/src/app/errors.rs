use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use multibpo_infra::accounts::AccountError;
use multibpo_infra::gateway::GatewayError;

pub fn gateway_error_to_response(err: GatewayError) -> axum::response::Response {
    match err {
        GatewayError::InvalidQuestion(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_question", msg),
        GatewayError::InvalidSession(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_session", msg),
        GatewayError::QuotaExceeded(e) => (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(json!({
                "success": false,
                "error": "quota_exceeded",
                "message": e.to_string(),
                "limit_reached": true,
                "next_reset": e.next_reset(),
            })),
        )
            .into_response(),
        GatewayError::AccountNotFound => {
            json_error(StatusCode::NOT_FOUND, "account_not_found", "account not found")
        }
        GatewayError::Persistence(msg) => {
            error!(error = %msg, "persistence failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "persistence_error", "internal error")
        }
        GatewayError::Generation(msg) => {
            error!(error = %msg, "answer generation failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "generation_error", "internal error")
        }
    }
}

pub fn account_error_to_response(err: AccountError) -> axum::response::Response {
    match err {
        AccountError::Invalid(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        AccountError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "account not found"),
        AccountError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        AccountError::InvalidCredentials => json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "invalid email or password",
        ),
        AccountError::EmailNotConfirmed => json_error(
            StatusCode::FORBIDDEN,
            "email_not_confirmed",
            "confirm your email address before the first login",
        ),
        AccountError::Persistence(msg) => {
            error!(error = %msg, "persistence failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "persistence_error", "internal error")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use multibpo_auth::{Account, ModuleAccess, NewPassword, RegistrationMethod};
use multibpo_core::QuestionId;
use multibpo_quota::QuestionRecord;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct AskQuestionRequest {
    pub question: String,
    /// Client-generated token; required when no bearer token is sent.
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub session_id: Option<String>,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub whatsapp: String,
    #[serde(default)]
    pub method: RegistrationMethod,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

impl RegisterRequest {
    /// A missing confirmation never matches, so it fails validation.
    pub fn new_password(&self) -> Option<NewPassword> {
        self.password.as_ref().map(|password| {
            NewPassword::new(
                password.clone(),
                self.password_confirm.clone().unwrap_or_default(),
            )
        })
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendConfirmationRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const MAX_HISTORY_LIMIT: usize = 100;

impl HistoryQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub account: Account,
    pub email_sent: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub account: Account,
}

#[derive(Debug, Serialize)]
pub struct ModuleAccessResponse {
    pub module: String,
    pub access: ModuleAccess,
}

#[derive(Debug, Serialize)]
pub struct HistoryItem {
    pub id: QuestionId,
    pub question: String,
    pub answer: String,
    /// Seconds, millisecond precision.
    pub response_time: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<QuestionRecord> for HistoryItem {
    fn from(record: QuestionRecord) -> Self {
        Self {
            response_time: record.response_seconds(),
            id: record.id,
            question: record.question.as_str().to_string(),
            answer: record.answer,
            created_at: record.created_at,
        }
    }
}

// -------------------------
// Helpers
// -------------------------

pub fn parse_uuid(raw: &str, field: &'static str) -> Result<Uuid, axum::response::Response> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "validation_error",
            format!("{field} must be a UUID"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_limit_defaults_and_clamps() {
        assert_eq!(HistoryQuery { limit: None }.effective_limit(), 20);
        assert_eq!(HistoryQuery { limit: Some(0) }.effective_limit(), 1);
        assert_eq!(HistoryQuery { limit: Some(500) }.effective_limit(), 100);
        assert_eq!(HistoryQuery { limit: Some(7) }.effective_limit(), 7);
    }

    #[test]
    fn register_request_defaults_to_email_method() {
        let req: RegisterRequest =
            serde_json::from_str(r#"{"email":"a@b.com","whatsapp":"11987654321"}"#).unwrap();
        assert_eq!(req.method, RegistrationMethod::Email);

        let req: RegisterRequest =
            serde_json::from_str(r#"{"email":"a@b.com","method":"google"}"#).unwrap();
        assert_eq!(req.method, RegistrationMethod::Google);
        assert!(req.whatsapp.is_empty());
        assert!(req.new_password().is_none());
    }

    #[test]
    fn missing_password_confirmation_fails_validation() {
        let req: RegisterRequest =
            serde_json::from_str(r#"{"email":"a@b.com","password":"abcdefgh1"}"#).unwrap();
        assert!(req.new_password().unwrap().validate().is_err());
    }

    #[test]
    fn bad_uuid_is_rejected() {
        assert!(parse_uuid("not-a-uuid", "token").is_err());
        assert!(parse_uuid(&Uuid::new_v4().to_string(), "token").is_ok());
    }
}

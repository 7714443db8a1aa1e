//! Question text and persisted question/answer records.

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use multibpo_core::{AccountId, DomainError, DomainResult, QuestionId};

use crate::session::SessionToken;

pub const MIN_QUESTION_CHARS: usize = 3;
pub const MAX_QUESTION_CHARS: usize = 2000;

/// A validated, trimmed question.
///
/// The length cap applies to the raw input; the minimum applies after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionText(String);

impl QuestionText {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        if raw.chars().count() > MAX_QUESTION_CHARS {
            return Err(DomainError::validation(format!(
                "question must be at most {MAX_QUESTION_CHARS} characters"
            )));
        }
        let trimmed = raw.trim();
        if trimmed.chars().count() < MIN_QUESTION_CHARS {
            return Err(DomainError::validation(format!(
                "question must have at least {MIN_QUESTION_CHARS} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `max` characters, for log lines.
    pub fn preview(&self, max: usize) -> String {
        self.0.chars().take(max).collect()
    }
}

/// Who asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum QuestionOwner {
    Account(AccountId),
    Session(SessionToken),
}

/// Request metadata captured alongside each question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub ip_address: Option<IpAddr>,
    pub user_agent: String,
}

/// Immutable record of one answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: QuestionId,
    pub owner: QuestionOwner,
    pub question: QuestionText,
    pub answer: String,
    pub response_time: Duration,
    pub client: ClientMetadata,
    pub created_at: DateTime<Utc>,
}

impl QuestionRecord {
    pub fn new(
        owner: QuestionOwner,
        question: QuestionText,
        answer: String,
        response_time: Duration,
        client: ClientMetadata,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: QuestionId::new(),
            owner,
            question,
            answer,
            response_time,
            client,
            created_at,
        }
    }

    /// Response time in seconds, rounded to milliseconds.
    pub fn response_seconds(&self) -> f64 {
        (self.response_time.as_secs_f64() * 1000.0).round() / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_characters_after_trim_is_too_short() {
        assert!(QuestionText::parse("hi").is_err());
        assert!(QuestionText::parse("   hi   ").is_err());
        assert_eq!(QuestionText::parse("  hey ").unwrap().as_str(), "hey");
    }

    #[test]
    fn length_cap_counts_raw_characters() {
        let exactly = "a".repeat(MAX_QUESTION_CHARS);
        assert!(QuestionText::parse(&exactly).is_ok());

        let padded = format!(" {exactly}");
        assert!(QuestionText::parse(&padded).is_err());
    }

    #[test]
    fn multibyte_characters_count_once() {
        assert!(QuestionText::parse("ção").is_ok());
    }

    #[test]
    fn owner_serializes_with_kind_tag() {
        let owner = QuestionOwner::Session(SessionToken::parse("abc").unwrap());
        let json = serde_json::to_value(&owner).unwrap();
        assert_eq!(json["kind"], "session");
        assert_eq!(json["id"], "abc");
    }

    #[test]
    fn response_seconds_rounds_to_millis() {
        let record = QuestionRecord::new(
            QuestionOwner::Account(AccountId::new()),
            QuestionText::parse("what is a ledger?").unwrap(),
            "an answer".to_string(),
            Duration::from_micros(1_234_567),
            ClientMetadata::default(),
            Utc::now(),
        );
        assert_eq!(record.response_seconds(), 1.235);
    }
}

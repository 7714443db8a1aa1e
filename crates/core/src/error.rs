//! Errors raised by the pure quota, account and entitlement rules.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Rule violations. Storage and transport failures live in `multibpo-infra`;
/// a spent quota is `QuotaExceeded` in `multibpo-quota`, not a domain error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Rejected input: bad email, short question, blank session token, weak password.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The account is not in a state that allows the transition
    /// (confirming an already confirmed email).
    #[error("invalid account state: {0}")]
    InvalidState(String),

    /// Email sign-ups must confirm their address before logging in.
    #[error("email address not confirmed")]
    EmailNotConfirmed,

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

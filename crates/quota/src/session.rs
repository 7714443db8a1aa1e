//! Anonymous sessions: quota tracking for visitors without an account.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use multibpo_core::{DomainError, DomainResult, Remaining};

use crate::tracker::{LifetimeQuota, QuotaExceeded, QuotaSnapshot};

pub const MAX_SESSION_TOKEN_LEN: usize = 100;

/// Opaque, client-generated session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(String);

impl SessionToken {
    /// Trim and validate a raw token (1..=100 characters).
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(DomainError::validation("session token is required"));
        }
        if token.chars().count() > MAX_SESSION_TOKEN_LEN {
            return Err(DomainError::validation(format!(
                "session token must be at most {MAX_SESSION_TOKEN_LEN} characters"
            )));
        }
        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for logs; never log the whole token.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(8).collect();
        format!("{prefix}…")
    }
}

impl core::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionToken {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionToken> for String {
    fn from(value: SessionToken) -> Self {
        value.0
    }
}

/// Anonymous visitor record. Created lazily on first contact, never reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousSession {
    pub token: SessionToken,
    pub quota: LifetimeQuota,
    pub ip_address: Option<IpAddr>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl AnonymousSession {
    pub fn open(token: SessionToken, ip_address: Option<IpAddr>, now: DateTime<Utc>) -> Self {
        Self {
            token,
            quota: LifetimeQuota::new(),
            ip_address,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn remaining(&self, limit: u32) -> Remaining {
        self.quota.remaining(limit)
    }

    pub fn try_consume(&mut self, limit: u32, now: DateTime<Utc>) -> Result<QuotaSnapshot, QuotaExceeded> {
        let snapshot = self.quota.try_consume(limit)?;
        self.last_activity = now;
        Ok(snapshot)
    }

    pub fn snapshot(&self, limit: u32) -> QuotaSnapshot {
        self.quota.snapshot(limit)
    }
}

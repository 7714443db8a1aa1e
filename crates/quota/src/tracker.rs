//! Quota state machines.
//!
//! Accounts use [`WindowedQuota`]: a counter that resets lazily once the rolling
//! window has elapsed since the last reset. Every check runs the reset first, so
//! even a status read may zero the counter.
//!
//! Anonymous sessions use [`LifetimeQuota`]: a monotonic counter with a hard cap
//! and no time dimension.
//!
//! Rejection never mutates the counter.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use multibpo_core::{QuestionLimit, Remaining};

/// Point-in-time view of a quota counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub used: u32,
    pub limit: QuestionLimit,
    pub remaining: Remaining,
    /// Only set for windowed (account) quotas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reset: Option<DateTime<Utc>>,
}

/// Refusal to consume a question.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuotaExceeded {
    /// Anonymous allowance is spent for good.
    #[error("you have used all {limit} free questions; create an account to keep asking")]
    Lifetime { limit: u32 },

    /// Account allowance is spent until the window rolls over.
    #[error(
        "you have reached the limit of {limit} questions for this period; it resets at {}",
        .next_reset.to_rfc3339()
    )]
    Window { limit: u32, next_reset: DateTime<Utc> },
}

impl QuotaExceeded {
    /// Whether the caller can expect the allowance to come back.
    pub fn resets(&self) -> bool {
        matches!(self, QuotaExceeded::Window { .. })
    }

    pub fn next_reset(&self) -> Option<DateTime<Utc>> {
        match self {
            QuotaExceeded::Lifetime { .. } => None,
            QuotaExceeded::Window { next_reset, .. } => Some(*next_reset),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Windowed (registered accounts)
// ─────────────────────────────────────────────────────────────────────────────

/// Rolling-window counter carried by every registered account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowedQuota {
    used: u32,
    last_reset: DateTime<Utc>,
}

impl WindowedQuota {
    /// Fresh counter whose window starts at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            used: 0,
            last_reset: now,
        }
    }

    /// Rebuild from persisted state.
    pub fn restore(used: u32, last_reset: DateTime<Utc>) -> Self {
        Self { used, last_reset }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn last_reset(&self) -> DateTime<Utc> {
        self.last_reset
    }

    pub fn next_reset(&self, window: Duration) -> DateTime<Utc> {
        self.last_reset + window
    }

    pub fn window_expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_reset > window
    }

    /// Apply the lazy reset. Returns `true` if the counter was zeroed.
    pub fn refresh(&mut self, window: Duration, now: DateTime<Utc>) -> bool {
        if self.window_expired(window, now) {
            self.used = 0;
            self.last_reset = now;
            true
        } else {
            false
        }
    }

    /// Remaining allowance. Applies the lazy reset first.
    pub fn remaining(&mut self, limit: QuestionLimit, window: Duration, now: DateTime<Utc>) -> Remaining {
        self.refresh(window, now);
        limit.remaining_after(self.used)
    }

    /// Consume one question if the limit allows it.
    ///
    /// Unlimited tiers always succeed and still count, so usage stays auditable.
    pub fn try_consume(
        &mut self,
        limit: QuestionLimit,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot, QuotaExceeded> {
        self.refresh(window, now);

        if !limit.admits(self.used) {
            return Err(QuotaExceeded::Window {
                limit: limit.as_number().unwrap_or_default(),
                next_reset: self.next_reset(window),
            });
        }

        self.used = self.used.saturating_add(1);
        Ok(self.snapshot(limit, window))
    }

    /// View without applying the reset (use after `refresh`).
    pub fn snapshot(&self, limit: QuestionLimit, window: Duration) -> QuotaSnapshot {
        QuotaSnapshot {
            used: self.used,
            limit,
            remaining: limit.remaining_after(self.used),
            next_reset: Some(self.next_reset(window)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifetime (anonymous sessions)
// ─────────────────────────────────────────────────────────────────────────────

/// Monotonic counter with a hard cap; never resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeQuota {
    used: u32,
}

impl LifetimeQuota {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(used: u32) -> Self {
        Self { used }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self, limit: u32) -> Remaining {
        QuestionLimit::Limited(limit).remaining_after(self.used)
    }

    pub fn try_consume(&mut self, limit: u32) -> Result<QuotaSnapshot, QuotaExceeded> {
        if self.used >= limit {
            return Err(QuotaExceeded::Lifetime { limit });
        }
        self.used += 1;
        Ok(self.snapshot(limit))
    }

    pub fn snapshot(&self, limit: u32) -> QuotaSnapshot {
        QuotaSnapshot {
            used: self.used,
            limit: QuestionLimit::Limited(limit),
            remaining: self.remaining(limit),
            next_reset: None,
        }
    }
}

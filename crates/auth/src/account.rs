//! Registered accounts: registration, email confirmation and the per-account
//! question quota.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use multibpo_core::{AccountId, DomainError, DomainResult, QuestionLimit, Tier};
use multibpo_quota::{QuotaExceeded, QuotaRules, QuotaSnapshot, WindowedQuota};

use crate::password::{self, NewPassword};

/// How long an email confirmation token stays valid.
pub const CONFIRMATION_TTL_HOURS: i64 = 24;

// ─────────────────────────────────────────────────────────────────────────────
// Registration method
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMethod {
    #[default]
    Email,
    Google,
    Facebook,
}

impl RegistrationMethod {
    /// Social providers have already verified the address.
    pub fn is_social(&self) -> bool {
        matches!(self, RegistrationMethod::Google | RegistrationMethod::Facebook)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationMethod::Email => "email",
            RegistrationMethod::Google => "google",
            RegistrationMethod::Facebook => "facebook",
        }
    }
}

impl core::str::FromStr for RegistrationMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(RegistrationMethod::Email),
            "google" => Ok(RegistrationMethod::Google),
            "facebook" => Ok(RegistrationMethod::Facebook),
            other => Err(DomainError::validation(format!(
                "unknown registration method '{other}'"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Account
// ─────────────────────────────────────────────────────────────────────────────

/// Command to register a new account.
///
/// Email sign-ups must choose a password; social sign-ups may omit it.
#[derive(Debug, Clone)]
pub struct RegisterAccount {
    pub account_id: AccountId,
    pub email: String,
    pub whatsapp: String,
    pub method: RegistrationMethod,
    pub password: Option<NewPassword>,
    pub occurred_at: DateTime<Utc>,
}

/// A registered account.
///
/// # Invariants
/// - `email` is trimmed and lower-cased.
/// - `quota.used()` never exceeds the tier limit within one window.
/// - A confirmed account holds no confirmation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub whatsapp: String,
    pub tier: Tier,
    pub method: RegistrationMethod,
    pub email_confirmed: bool,
    #[serde(skip_serializing, default)]
    pub confirmation_token: Option<Uuid>,
    /// Argon2 PHC string. `None` for social sign-ups without a password.
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub confirmation_sent_at: Option<DateTime<Utc>>,
    pub quota: WindowedQuota,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn register(cmd: &RegisterAccount) -> DomainResult<Self> {
        let email = cmd.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }

        let whatsapp = if cmd.method.is_social() && cmd.whatsapp.trim().is_empty() {
            String::new()
        } else {
            normalize_whatsapp(&cmd.whatsapp)?
        };

        let password_hash = match (&cmd.password, cmd.method) {
            (Some(new), _) => Some(new.hash()?),
            (None, RegistrationMethod::Email) => {
                return Err(DomainError::validation("password is required"));
            }
            (None, _) => None,
        };

        let mut account = Self {
            id: cmd.account_id,
            email,
            whatsapp,
            tier: Tier::Registered,
            method: cmd.method,
            email_confirmed: cmd.method.is_social(),
            confirmation_token: None,
            confirmation_sent_at: None,
            password_hash,
            quota: WindowedQuota::new(cmd.occurred_at),
            created_at: cmd.occurred_at,
        };

        if !account.email_confirmed {
            account.issue_confirmation(cmd.occurred_at);
        }

        Ok(account)
    }

    /// Rotate the confirmation token. Returns the new token.
    pub fn issue_confirmation(&mut self, now: DateTime<Utc>) -> Uuid {
        let token = Uuid::new_v4();
        self.confirmation_token = Some(token);
        self.confirmation_sent_at = Some(now);
        token
    }

    pub fn confirmation_expired(&self, now: DateTime<Utc>) -> bool {
        match self.confirmation_sent_at {
            Some(sent_at) => now - sent_at > Duration::hours(CONFIRMATION_TTL_HOURS),
            None => true,
        }
    }

    pub fn confirm_email(&mut self, token: Uuid, now: DateTime<Utc>) -> DomainResult<()> {
        if self.email_confirmed {
            return Err(DomainError::invalid_state("email already confirmed"));
        }
        if self.confirmation_token != Some(token) {
            return Err(DomainError::validation("invalid confirmation token"));
        }
        if self.confirmation_expired(now) {
            return Err(DomainError::validation("confirmation token expired"));
        }

        self.email_confirmed = true;
        self.confirmation_token = None;
        Ok(())
    }

    pub fn verify_password(&self, candidate: &str) -> bool {
        self.password_hash
            .as_deref()
            .is_some_and(|phc| password::verify_password(candidate, phc))
    }

    /// Email sign-ups cannot log in until the address is confirmed.
    pub fn ensure_can_log_in(&self) -> DomainResult<()> {
        if self.method == RegistrationMethod::Email && !self.email_confirmed {
            return Err(DomainError::EmailNotConfirmed);
        }
        Ok(())
    }

    pub fn set_tier(&mut self, tier: Tier) {
        self.tier = tier;
    }

    pub fn question_limit(&self, rules: &QuotaRules) -> QuestionLimit {
        rules.limit_for(self.tier)
    }

    /// Consume one question for this account (lazy window reset included).
    pub fn try_consume_question(
        &mut self,
        rules: &QuotaRules,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot, QuotaExceeded> {
        let limit = self.question_limit(rules);
        self.quota.try_consume(limit, rules.window, now)
    }

    /// Current quota view. Applies the lazy reset, so this may mutate.
    pub fn quota_status(&mut self, rules: &QuotaRules, now: DateTime<Utc>) -> QuotaSnapshot {
        let limit = self.question_limit(rules);
        self.quota.refresh(rules.window, now);
        self.quota.snapshot(limit, rules.window)
    }
}

/// Normalise a Brazilian WhatsApp number to `(DD) DDDDD-DDDD` or `(DD) DDDD-DDDD`.
pub fn normalize_whatsapp(raw: &str) -> DomainResult<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        11 => Ok(format!("({}) {}-{}", &digits[..2], &digits[2..7], &digits[7..])),
        10 => Ok(format!("({}) {}-{}", &digits[..2], &digits[2..6], &digits[6..])),
        _ => Err(DomainError::validation(
            "whatsapp must have 10 or 11 digits (area code included)",
        )),
    }
}

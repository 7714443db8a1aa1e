//! Account lifecycle orchestration: registration, email confirmation, profile
//! and module access checks.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use multibpo_auth::{Account, EntitlementPolicy, Entitlements, ModuleAccess, RegisterAccount};
use multibpo_core::{AccountId, DomainError, Tier};

use crate::gateway::QuotaView;
use crate::store::{AccountQuota, AccountStore, StoreError};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Invalid(String),

    #[error("account not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    /// Unknown email or wrong password; the two are not told apart.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("email address must be confirmed before the first login")]
    EmailNotConfirmed,

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<DomainError> for AccountError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvalidState(msg)
            | DomainError::InvalidId(msg) => AccountError::Invalid(msg),
            DomainError::EmailNotConfirmed => AccountError::EmailNotConfirmed,
        }
    }
}

impl From<StoreError> for AccountError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => AccountError::NotFound,
            StoreError::Conflict(msg) => AccountError::Conflict(msg),
            StoreError::Backend(msg) => AccountError::Persistence(msg),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Confirmation delivery
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("confirmation delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers email confirmation tokens (mail relay, queue, ...).
#[async_trait::async_trait]
pub trait ConfirmationNotifier: Send + Sync {
    async fn send_confirmation(&self, account: &Account, token: Uuid) -> Result<(), NotifyError>;
}

/// Development notifier: logs the delivery instead of sending mail.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogConfirmationNotifier;

#[async_trait::async_trait]
impl ConfirmationNotifier for LogConfirmationNotifier {
    async fn send_confirmation(&self, account: &Account, token: Uuid) -> Result<(), NotifyError> {
        info!(account_id = %account.id, email = %account.email, "confirmation email queued");
        debug!(%token, "confirmation token");
        Ok(())
    }
}

/// Keeps every issued token in memory (tests, local tooling).
#[derive(Debug, Default)]
pub struct InMemoryConfirmationOutbox {
    sent: Mutex<Vec<(String, Uuid)>>,
}

impl InMemoryConfirmationOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest token sent to `email`.
    pub fn last_token_for(&self, email: &str) -> Option<Uuid> {
        let sent = self.sent.lock().ok()?;
        sent.iter()
            .rev()
            .find(|(to, _)| to.eq_ignore_ascii_case(email.trim()))
            .map(|(_, token)| *token)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl ConfirmationNotifier for InMemoryConfirmationOutbox {
    async fn send_confirmation(&self, account: &Account, token: Uuid) -> Result<(), NotifyError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError("outbox lock poisoned".to_string()))?;
        sent.push((account.email.clone(), token));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

/// Account view returned by `/me`.
#[derive(Debug, Clone, Serialize)]
pub struct AccountProfile {
    pub account: Account,
    pub entitlements: Entitlements,
    pub quota: QuotaView,
}

#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    notifier: Arc<dyn ConfirmationNotifier>,
    policy: Arc<EntitlementPolicy>,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        notifier: Arc<dyn ConfirmationNotifier>,
        policy: Arc<EntitlementPolicy>,
    ) -> Self {
        Self {
            accounts,
            notifier,
            policy,
        }
    }

    /// Register and, for email sign-ups, send the confirmation token.
    ///
    /// A failed delivery is logged; the account is still created.
    #[instrument(skip(self, cmd), fields(account_id = %cmd.account_id, method = cmd.method.as_str()), err)]
    pub async fn register(&self, cmd: RegisterAccount) -> Result<Account, AccountError> {
        let account = Account::register(&cmd)?;
        self.accounts.insert(account.clone()).await?;
        info!(email = %account.email, "account registered");

        if let Some(token) = account.confirmation_token {
            self.deliver(&account, token).await;
        }
        Ok(account)
    }

    #[instrument(skip(self, token), err)]
    pub async fn confirm_email(&self, token: Uuid, now: DateTime<Utc>) -> Result<Account, AccountError> {
        let mut account = self
            .accounts
            .find_by_confirmation_token(token)
            .await?
            .ok_or_else(|| AccountError::Invalid("invalid or expired token".to_string()))?;

        account.confirm_email(token, now)?;
        self.accounts.save(&account).await?;
        info!(account_id = %account.id, "email confirmed");
        Ok(account)
    }

    /// Rotate the confirmation token and send it again.
    #[instrument(skip(self), err)]
    pub async fn resend_confirmation(&self, email: &str, now: DateTime<Utc>) -> Result<(), AccountError> {
        if email.trim().is_empty() {
            return Err(AccountError::Invalid("email is required".to_string()));
        }

        let mut account = self
            .accounts
            .find_by_email(email)
            .await?
            .ok_or(AccountError::NotFound)?;

        if account.email_confirmed {
            return Err(AccountError::Invalid("email already confirmed".to_string()));
        }

        let token = account.issue_confirmation(now);
        self.accounts.save(&account).await?;
        self.deliver(&account, token).await;
        Ok(())
    }

    /// Check email and password. Email sign-ups must have confirmed the address.
    #[instrument(skip(self, password), err)]
    pub async fn login(&self, email: &str, password: &str) -> Result<Account, AccountError> {
        let account = self
            .accounts
            .find_by_email(email)
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        if !account.verify_password(password) {
            info!(account_id = %account.id, "login refused: wrong password");
            return Err(AccountError::InvalidCredentials);
        }
        account.ensure_can_log_in()?;

        info!(account_id = %account.id, "login succeeded");
        Ok(account)
    }

    /// Upgrade or downgrade an account's tier (billing collaborator hook).
    #[instrument(skip(self), err)]
    pub async fn set_tier(&self, id: AccountId, tier: Tier) -> Result<Account, AccountError> {
        let mut account = self.accounts.get(id).await?;
        account.set_tier(tier);
        self.accounts.save(&account).await?;
        info!(account_id = %id, %tier, "tier changed");
        Ok(account)
    }

    /// Account, entitlements and quota. Applies the lazy window reset.
    #[instrument(skip(self), err)]
    pub async fn profile(&self, id: AccountId, now: DateTime<Utc>) -> Result<AccountProfile, AccountError> {
        let AccountQuota { account, snapshot } = self
            .accounts
            .quota_status(id, self.policy.quota_rules(), now)
            .await?;

        Ok(AccountProfile {
            entitlements: self.policy.entitlements(account.tier, account.email_confirmed),
            quota: QuotaView::for_account(&self.policy, &account, snapshot),
            account,
        })
    }

    pub async fn module_access(&self, id: AccountId, module: &str) -> Result<ModuleAccess, AccountError> {
        let account = self.accounts.get(id).await?;
        Ok(self
            .policy
            .can_access_module(account.tier, account.email_confirmed, module))
    }

    async fn deliver(&self, account: &Account, token: Uuid) {
        if let Err(e) = self.notifier.send_confirmation(account, token).await {
            warn!(account_id = %account.id, error = %e, "confirmation email not sent");
        }
    }
}

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use multibpo_auth::Account;
use multibpo_core::AccountId;
use multibpo_quota::{
    AnonymousSession, QuestionOwner, QuestionRecord, QuotaExceeded, QuotaRules, QuotaSnapshot,
    SessionToken,
};

/// Storage operation error.
///
/// Infrastructure failures only. A spent quota is not an error here; it comes
/// back as the inner `Err` of a [`ConsumeResult`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// Uniqueness violation (duplicate email, duplicate id).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Outcome of an atomic check-and-increment.
pub type ConsumeResult<T> = Result<T, QuotaExceeded>;

/// Account state right after a quota operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountQuota {
    pub account: Account,
    pub snapshot: QuotaSnapshot,
}

/// Registered accounts.
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Fails with `Conflict` if the id or email is taken.
    async fn insert(&self, account: Account) -> Result<(), StoreError>;

    async fn get(&self, id: AccountId) -> Result<Account, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_confirmation_token(&self, token: Uuid) -> Result<Option<Account>, StoreError>;

    /// Persist profile fields (tier, whatsapp, confirmation state).
    ///
    /// The quota counter is left untouched: only `consume_question` and
    /// `quota_status` move it.
    async fn save(&self, account: &Account) -> Result<(), StoreError>;

    /// Atomically apply the lazy window reset and consume one question.
    async fn consume_question(
        &self,
        id: AccountId,
        rules: &QuotaRules,
        now: DateTime<Utc>,
    ) -> Result<ConsumeResult<AccountQuota>, StoreError>;

    /// Apply the lazy window reset and return the current quota view.
    async fn quota_status(
        &self,
        id: AccountId,
        rules: &QuotaRules,
        now: DateTime<Utc>,
    ) -> Result<AccountQuota, StoreError>;
}

/// Anonymous sessions keyed by client token.
#[async_trait::async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Idempotent insert-if-absent. Concurrent first contact creates one record.
    async fn get_or_create(
        &self,
        token: &SessionToken,
        ip_address: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Result<AnonymousSession, StoreError>;

    /// Conditional increment (`used < limit`) that also bumps `last_activity`.
    async fn consume(
        &self,
        token: &SessionToken,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<ConsumeResult<QuotaSnapshot>, StoreError>;
}

/// Append-only log of answered questions.
#[async_trait::async_trait]
pub trait QuestionLog: Send + Sync {
    async fn append(&self, record: QuestionRecord) -> Result<(), StoreError>;

    /// Most recent records first.
    async fn list_for_owner(
        &self,
        owner: &QuestionOwner,
        limit: usize,
    ) -> Result<Vec<QuestionRecord>, StoreError>;
}

#[async_trait::async_trait]
impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    async fn insert(&self, account: Account) -> Result<(), StoreError> {
        (**self).insert(account).await
    }

    async fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        (**self).get(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        (**self).find_by_email(email).await
    }

    async fn find_by_confirmation_token(&self, token: Uuid) -> Result<Option<Account>, StoreError> {
        (**self).find_by_confirmation_token(token).await
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        (**self).save(account).await
    }

    async fn consume_question(
        &self,
        id: AccountId,
        rules: &QuotaRules,
        now: DateTime<Utc>,
    ) -> Result<ConsumeResult<AccountQuota>, StoreError> {
        (**self).consume_question(id, rules, now).await
    }

    async fn quota_status(
        &self,
        id: AccountId,
        rules: &QuotaRules,
        now: DateTime<Utc>,
    ) -> Result<AccountQuota, StoreError> {
        (**self).quota_status(id, rules, now).await
    }
}

#[async_trait::async_trait]
impl<S> SessionRegistry for Arc<S>
where
    S: SessionRegistry + ?Sized,
{
    async fn get_or_create(
        &self,
        token: &SessionToken,
        ip_address: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Result<AnonymousSession, StoreError> {
        (**self).get_or_create(token, ip_address, now).await
    }

    async fn consume(
        &self,
        token: &SessionToken,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<ConsumeResult<QuotaSnapshot>, StoreError> {
        (**self).consume(token, limit, now).await
    }
}

#[async_trait::async_trait]
impl<S> QuestionLog for Arc<S>
where
    S: QuestionLog + ?Sized,
{
    async fn append(&self, record: QuestionRecord) -> Result<(), StoreError> {
        (**self).append(record).await
    }

    async fn list_for_owner(
        &self,
        owner: &QuestionOwner,
        limit: usize,
    ) -> Result<Vec<QuestionRecord>, StoreError> {
        (**self).list_for_owner(owner, limit).await
    }
}

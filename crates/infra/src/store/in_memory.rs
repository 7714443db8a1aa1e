//! In-memory backends for tests and single-process development.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use multibpo_auth::Account;
use multibpo_core::AccountId;
use multibpo_quota::{
    AnonymousSession, QuestionOwner, QuestionRecord, QuotaRules, QuotaSnapshot, SessionToken,
};

use super::r#trait::{
    AccountQuota, AccountStore, ConsumeResult, QuestionLog, SessionRegistry, StoreError,
};

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AccountIndex {
    by_id: HashMap<AccountId, Arc<Mutex<Account>>>,
    by_email: HashMap<String, AccountId>,
}

/// Accounts held behind a per-account mutex.
///
/// The outer lock guards the index only; a quota check-and-increment holds
/// just the mutex of the account involved.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    index: RwLock<AccountIndex>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, id: AccountId) -> Result<Arc<Mutex<Account>>, StoreError> {
        let index = self.index.read().map_err(poisoned)?;
        index.by_id.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    fn snapshot_all(&self) -> Result<Vec<Arc<Mutex<Account>>>, StoreError> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(index.by_id.values().cloned().collect())
    }
}

#[async_trait::async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn insert(&self, account: Account) -> Result<(), StoreError> {
        let mut index = self.index.write().map_err(poisoned)?;

        if index.by_email.contains_key(&account.email) {
            return Err(StoreError::Conflict(format!(
                "email '{}' is already registered",
                account.email
            )));
        }
        if index.by_id.contains_key(&account.id) {
            return Err(StoreError::Conflict(format!("account {} already exists", account.id)));
        }

        index.by_email.insert(account.email.clone(), account.id);
        index.by_id.insert(account.id, Arc::new(Mutex::new(account)));
        Ok(())
    }

    async fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        let cell = self.cell(id)?;
        let account = cell.lock().map_err(poisoned)?;
        Ok(account.clone())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let key = email.trim().to_lowercase();
        let id = {
            let index = self.index.read().map_err(poisoned)?;
            index.by_email.get(&key).copied()
        };
        match id {
            Some(id) => self.get(id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_by_confirmation_token(&self, token: Uuid) -> Result<Option<Account>, StoreError> {
        for cell in self.snapshot_all()? {
            let account = cell.lock().map_err(poisoned)?;
            if account.confirmation_token == Some(token) {
                return Ok(Some(account.clone()));
            }
        }
        Ok(None)
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        let cell = self.cell(account.id)?;
        let mut stored = cell.lock().map_err(poisoned)?;

        stored.whatsapp = account.whatsapp.clone();
        stored.tier = account.tier;
        stored.email_confirmed = account.email_confirmed;
        stored.confirmation_token = account.confirmation_token;
        stored.confirmation_sent_at = account.confirmation_sent_at;
        Ok(())
    }

    async fn consume_question(
        &self,
        id: AccountId,
        rules: &QuotaRules,
        now: DateTime<Utc>,
    ) -> Result<ConsumeResult<AccountQuota>, StoreError> {
        let cell = self.cell(id)?;
        let mut account = cell.lock().map_err(poisoned)?;

        Ok(account
            .try_consume_question(rules, now)
            .map(|snapshot| AccountQuota {
                account: account.clone(),
                snapshot,
            }))
    }

    async fn quota_status(
        &self,
        id: AccountId,
        rules: &QuotaRules,
        now: DateTime<Utc>,
    ) -> Result<AccountQuota, StoreError> {
        let cell = self.cell(id)?;
        let mut account = cell.lock().map_err(poisoned)?;

        let snapshot = account.quota_status(rules, now);
        Ok(AccountQuota {
            account: account.clone(),
            snapshot,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Anonymous sessions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemorySessionRegistry {
    sessions: RwLock<HashMap<SessionToken, AnonymousSession>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn get_or_create(
        &self,
        token: &SessionToken,
        ip_address: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Result<AnonymousSession, StoreError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let session = sessions
            .entry(token.clone())
            .or_insert_with(|| AnonymousSession::open(token.clone(), ip_address, now));
        Ok(session.clone())
    }

    async fn consume(
        &self,
        token: &SessionToken,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<ConsumeResult<QuotaSnapshot>, StoreError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        match sessions.entry(token.clone()) {
            Entry::Occupied(mut entry) => Ok(entry.get_mut().try_consume(limit, now)),
            Entry::Vacant(_) => Err(StoreError::NotFound),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Question log
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryQuestionLog {
    records: RwLock<Vec<QuestionRecord>>,
}

impl InMemoryQuestionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl QuestionLog for InMemoryQuestionLog {
    async fn append(&self, record: QuestionRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Conflict(format!("question {} already logged", record.id)));
        }
        records.push(record);
        Ok(())
    }

    async fn list_for_owner(
        &self,
        owner: &QuestionOwner,
        limit: usize,
    ) -> Result<Vec<QuestionRecord>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .iter()
            .rev()
            .filter(|r| &r.owner == owner)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use multibpo_auth::{RegisterAccount, RegistrationMethod};
    use multibpo_core::{QuestionLimit, Remaining, Tier};
    use multibpo_quota::{ClientMetadata, QuestionText, QuotaExceeded, WindowedQuota};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap()
    }

    fn account(email: &str) -> Account {
        Account::register(&RegisterAccount {
            account_id: AccountId::new(),
            email: email.to_string(),
            whatsapp: "11987654321".to_string(),
            method: RegistrationMethod::Google,
            password: None,
            occurred_at: t0(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = InMemoryAccountStore::new();
        store.insert(account("a@example.com")).await.unwrap();

        let err = store.insert(account("A@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.find_by_email(" A@EXAMPLE.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn consume_stops_at_registered_limit() {
        let store = InMemoryAccountStore::new();
        let mut acc = account("b@example.com");
        acc.quota = WindowedQuota::restore(10, t0());
        let id = acc.id;
        store.insert(acc).await.unwrap();
        let rules = QuotaRules::default();
        let now = t0() + Duration::days(1);

        let ok = store.consume_question(id, &rules, now).await.unwrap().unwrap();
        assert_eq!(ok.snapshot.used, 11);
        assert_eq!(ok.snapshot.remaining, Remaining::Limited(0));

        let refused = store.consume_question(id, &rules, now).await.unwrap().unwrap_err();
        assert!(matches!(refused, QuotaExceeded::Window { limit: 11, .. }));
        assert_eq!(store.get(id).await.unwrap().quota.used(), 11);
    }

    #[tokio::test]
    async fn save_keeps_the_stored_counter() {
        let store = InMemoryAccountStore::new();
        let acc = account("c@example.com");
        let id = acc.id;
        store.insert(acc.clone()).await.unwrap();
        store
            .consume_question(id, &QuotaRules::default(), t0())
            .await
            .unwrap()
            .unwrap();

        let mut stale = acc;
        stale.set_tier(Tier::Subscriber);
        store.save(&stale).await.unwrap();

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.tier, Tier::Subscriber);
        assert_eq!(stored.quota.used(), 1);
        assert_eq!(stored.question_limit(&QuotaRules::default()), QuestionLimit::Unlimited);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let store = InMemoryAccountStore::new();
        let err = store
            .quota_status(AccountId::new(), &QuotaRules::default(), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn session_get_or_create_is_idempotent() {
        let registry = InMemorySessionRegistry::new();
        let token = SessionToken::parse("visitor-1").unwrap();

        let first = registry.get_or_create(&token, None, t0()).await.unwrap();
        registry.consume(&token, 4, t0()).await.unwrap().unwrap();
        let again = registry
            .get_or_create(&token, None, t0() + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(again.created_at, first.created_at);
        assert_eq!(again.quota.used(), 1);
    }

    #[tokio::test]
    async fn consume_on_unknown_session_is_not_found() {
        let registry = InMemorySessionRegistry::new();
        let token = SessionToken::parse("ghost").unwrap();
        assert!(matches!(
            registry.consume(&token, 4, t0()).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn question_log_lists_newest_first_per_owner() {
        let log = InMemoryQuestionLog::new();
        let owner = QuestionOwner::Session(SessionToken::parse("s-1").unwrap());
        let other = QuestionOwner::Account(AccountId::new());

        for (i, who) in [&owner, &other, &owner].into_iter().enumerate() {
            log.append(QuestionRecord::new(
                who.clone(),
                QuestionText::parse(&format!("question number {i}")).unwrap(),
                "answer".to_string(),
                std::time::Duration::from_millis(5),
                ClientMetadata::default(),
                t0() + Duration::minutes(i as i64),
            ))
            .await
            .unwrap();
        }

        let listed = log.list_for_owner(&owner, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].question.as_str(), "question number 2");
        assert_eq!(log.len(), 3);
    }
}

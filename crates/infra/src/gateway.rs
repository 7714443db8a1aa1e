//! Question gateway: the end-to-end "ask Luca IA" operation.
//!
//! ```text
//! AskQuestion
//!   ↓
//! 1. Validate the question text (3..=2000 chars)
//!   ↓
//! 2. Resolve the caller (account first, otherwise session token)
//!   ↓
//! 3. Atomically consume one quota unit (store-level check-and-increment)
//!   ↓
//! 4. Generate the answer (outside any lock), measuring latency
//!   ↓
//! 5. Append the question record
//!   ↓
//! 6. Return the answer plus the caller's updated quota view
//! ```
//!
//! A refused quota aborts before step 4: nothing is answered or recorded.
//! A unit consumed in step 3 is never refunded, even if later steps fail.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use multibpo_ai::AnswerGenerator;
use multibpo_auth::{Account, EntitlementPolicy, ModuleName};
use multibpo_core::{AccountId, DomainError, QuestionId, QuestionLimit, Remaining, Tier};
use multibpo_quota::{
    ClientMetadata, QuestionOwner, QuestionRecord, QuestionText, QuotaExceeded, QuotaSnapshot,
    SessionToken,
};

use crate::store::{AccountQuota, AccountStore, QuestionLog, SessionRegistry, StoreError};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidQuestion(String),

    #[error("{0}")]
    InvalidSession(String),

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error("account not found")]
    AccountNotFound,

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("answer generation failed: {0}")]
    Generation(String),
}

impl From<StoreError> for GatewayError {
    fn from(value: StoreError) -> Self {
        GatewayError::Persistence(value.to_string())
    }
}

fn account_error(err: StoreError) -> GatewayError {
    match err {
        StoreError::NotFound => GatewayError::AccountNotFound,
        other => other.into(),
    }
}

fn validation_message(err: DomainError) -> String {
    match err {
        DomainError::Validation(msg) => msg,
        other => other.to_string(),
    }
}

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Authenticated account (takes precedence over any session token).
    Account(AccountId),
    /// Anonymous visitor identified by a client-supplied token.
    Anonymous { session_token: Option<String> },
}

impl Caller {
    pub fn kind(&self) -> &'static str {
        match self {
            Caller::Account(_) => "account",
            Caller::Anonymous { .. } => "anonymous",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AskQuestion {
    pub caller: Caller,
    pub question: String,
    pub client: ClientMetadata,
    pub now: DateTime<Utc>,
}

/// Quota and module view returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaView {
    pub tier: Tier,
    pub used: u32,
    pub limit: QuestionLimit,
    pub remaining: Remaining,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reset: Option<DateTime<Utc>>,
    pub allowed_modules: Vec<ModuleName>,
    pub blocked_modules: Vec<ModuleName>,
}

impl QuotaView {
    pub fn for_account(policy: &EntitlementPolicy, account: &Account, snapshot: QuotaSnapshot) -> Self {
        Self {
            tier: account.tier,
            used: snapshot.used,
            limit: snapshot.limit,
            remaining: snapshot.remaining,
            next_reset: snapshot.next_reset,
            allowed_modules: policy.allowed_modules(account.tier, account.email_confirmed),
            blocked_modules: policy.blocked_modules(account.tier, account.email_confirmed),
        }
    }

    pub fn for_session(policy: &EntitlementPolicy, snapshot: QuotaSnapshot) -> Self {
        Self {
            tier: Tier::Anonymous,
            used: snapshot.used,
            limit: snapshot.limit,
            remaining: snapshot.remaining,
            next_reset: None,
            allowed_modules: Vec::new(),
            blocked_modules: policy.blocked_modules(Tier::Anonymous, false),
        }
    }
}

/// Successful answer.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question_id: QuestionId,
    pub question: String,
    pub answer: String,
    /// Generation latency in seconds (millisecond precision).
    pub response_time: f64,
    pub quota: QuotaView,
}

#[derive(Clone)]
pub struct QuestionGateway {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionRegistry>,
    log: Arc<dyn QuestionLog>,
    generator: Arc<dyn AnswerGenerator>,
    policy: Arc<EntitlementPolicy>,
}

impl QuestionGateway {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionRegistry>,
        log: Arc<dyn QuestionLog>,
        generator: Arc<dyn AnswerGenerator>,
        policy: Arc<EntitlementPolicy>,
    ) -> Self {
        Self {
            accounts,
            sessions,
            log,
            generator,
            policy,
        }
    }

    pub fn policy(&self) -> &EntitlementPolicy {
        &self.policy
    }

    #[instrument(skip(self, req), fields(caller = req.caller.kind()))]
    pub async fn ask(&self, req: AskQuestion) -> Result<Answer, GatewayError> {
        let question = QuestionText::parse(&req.question)
            .map_err(|e| GatewayError::InvalidQuestion(validation_message(e)))?;

        let rules = *self.policy.quota_rules();

        let (owner, quota) = match req.caller {
            Caller::Account(id) => {
                let AccountQuota { account, snapshot } = self
                    .accounts
                    .consume_question(id, &rules, req.now)
                    .await
                    .map_err(account_error)?
                    .inspect_err(|e| info!(account_id = %id, reason = %e, "question refused"))?;

                (
                    QuestionOwner::Account(id),
                    QuotaView::for_account(&self.policy, &account, snapshot),
                )
            }
            Caller::Anonymous { session_token } => {
                let token = parse_session(session_token.as_deref())?;
                self.sessions
                    .get_or_create(&token, req.client.ip_address, req.now)
                    .await?;

                let snapshot = self
                    .sessions
                    .consume(&token, rules.anonymous_limit, req.now)
                    .await?
                    .inspect_err(|e| info!(session = %token.redacted(), reason = %e, "question refused"))?;

                (
                    QuestionOwner::Session(token),
                    QuotaView::for_session(&self.policy, snapshot),
                )
            }
        };

        debug!(
            used = quota.used,
            preview = %question.preview(50),
            "quota unit consumed"
        );

        let started = Instant::now();
        let answer = self
            .generator
            .generate(question.as_str())
            .await
            .map_err(|e| {
                warn!(error = %e, "answer generation failed; consumed quota is not refunded");
                GatewayError::Generation(e.to_string())
            })?;
        let elapsed = started.elapsed();

        let record = QuestionRecord::new(
            owner,
            question.clone(),
            answer.clone(),
            elapsed,
            req.client,
            req.now,
        );
        let question_id = record.id;
        let response_time = record.response_seconds();

        self.log.append(record).await.inspect_err(|e| {
            warn!(error = %e, %question_id, "question answered but not recorded");
        })?;

        info!(%question_id, response_time, remaining = ?quota.remaining, "question answered");

        Ok(Answer {
            question_id,
            question: question.as_str().to_string(),
            answer,
            response_time,
            quota,
        })
    }

    /// Quota view without consuming. Account reads apply the lazy reset;
    /// anonymous reads create the session on first contact.
    #[instrument(skip(self, caller), fields(caller = caller.kind()))]
    pub async fn status(
        &self,
        caller: Caller,
        ip_address: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Result<QuotaView, GatewayError> {
        let rules = *self.policy.quota_rules();

        match caller {
            Caller::Account(id) => {
                let AccountQuota { account, snapshot } = self
                    .accounts
                    .quota_status(id, &rules, now)
                    .await
                    .map_err(account_error)?;
                Ok(QuotaView::for_account(&self.policy, &account, snapshot))
            }
            Caller::Anonymous { session_token } => {
                let token = parse_session(session_token.as_deref())?;
                let session = self.sessions.get_or_create(&token, ip_address, now).await?;
                Ok(QuotaView::for_session(
                    &self.policy,
                    session.snapshot(rules.anonymous_limit),
                ))
            }
        }
    }

    /// Most recent questions asked by `owner`.
    pub async fn history(
        &self,
        owner: &QuestionOwner,
        limit: usize,
    ) -> Result<Vec<QuestionRecord>, GatewayError> {
        Ok(self.log.list_for_owner(owner, limit).await?)
    }
}

fn parse_session(raw: Option<&str>) -> Result<SessionToken, GatewayError> {
    let raw = raw.ok_or_else(|| GatewayError::InvalidSession("session_id is required".to_string()))?;
    SessionToken::parse(raw).map_err(|e| GatewayError::InvalidSession(validation_message(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use multibpo_ai::{AiError, LocalAnswerGenerator};
    use multibpo_auth::{EntitlementConfig, RegisterAccount, RegistrationMethod};
    use multibpo_quota::WindowedQuota;

    use crate::store::{InMemoryAccountStore, InMemoryQuestionLog, InMemorySessionRegistry};

    struct FailingGenerator;

    #[async_trait::async_trait]
    impl AnswerGenerator for FailingGenerator {
        async fn generate(&self, _question: &str) -> Result<String, AiError> {
            Err(AiError::GenerationFailed("model offline".to_string()))
        }
    }

    struct Fixture {
        gateway: QuestionGateway,
        accounts: Arc<InMemoryAccountStore>,
        sessions: Arc<InMemorySessionRegistry>,
        log: Arc<InMemoryQuestionLog>,
    }

    fn fixture_with(generator: Arc<dyn AnswerGenerator>) -> Fixture {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let sessions = Arc::new(InMemorySessionRegistry::new());
        let log = Arc::new(InMemoryQuestionLog::new());
        let policy = Arc::new(EntitlementPolicy::new(EntitlementConfig::default()).unwrap());
        let gateway = QuestionGateway::new(
            accounts.clone(),
            sessions.clone(),
            log.clone(),
            generator,
            policy,
        );
        Fixture {
            gateway,
            accounts,
            sessions,
            log,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(LocalAnswerGenerator::default()))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 7, 10, 0, 0).unwrap()
    }

    async fn seed_account(f: &Fixture, tier: Tier, used: u32) -> AccountId {
        let mut account = Account::register(&RegisterAccount {
            account_id: AccountId::new(),
            email: format!("{}@example.com", AccountId::new()),
            whatsapp: String::new(),
            method: RegistrationMethod::Google,
            password: None,
            occurred_at: t0(),
        })
        .unwrap();
        account.set_tier(tier);
        account.quota = WindowedQuota::restore(used, t0());
        let id = account.id;
        f.accounts.insert(account).await.unwrap();
        id
    }

    fn ask(caller: Caller, question: &str, now: DateTime<Utc>) -> AskQuestion {
        AskQuestion {
            caller,
            question: question.to_string(),
            client: ClientMetadata {
                ip_address: Some("10.0.0.7".parse().unwrap()),
                user_agent: "tests".to_string(),
            },
            now,
        }
    }

    fn anon(token: &str) -> Caller {
        Caller::Anonymous {
            session_token: Some(token.to_string()),
        }
    }

    #[tokio::test]
    async fn registered_at_ten_gets_last_question_then_is_refused() {
        let f = fixture();
        let id = seed_account(&f, Tier::Registered, 10).await;
        let now = t0() + Duration::days(2);

        let answer = f
            .gateway
            .ask(ask(Caller::Account(id), "how do I issue an invoice?", now))
            .await
            .unwrap();
        assert_eq!(answer.quota.used, 11);
        assert_eq!(answer.quota.remaining, Remaining::Limited(0));
        assert_eq!(answer.quota.next_reset, Some(t0() + Duration::days(7)));
        assert!(answer.answer.contains("how do I issue an invoice?"));

        let err = f
            .gateway
            .ask(ask(Caller::Account(id), "one more please", now))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::QuotaExceeded(QuotaExceeded::Window { .. })));
        assert_eq!(f.accounts.get(id).await.unwrap().quota.used(), 11);
        assert_eq!(f.log.len(), 1);
    }

    #[tokio::test]
    async fn anonymous_is_capped_at_four_forever() {
        let f = fixture();
        for i in 0..4 {
            let now = t0() + Duration::days(i * 30);
            f.gateway.ask(ask(anon("visitor"), "what is luca?", now)).await.unwrap();
        }

        let much_later = t0() + Duration::days(3650);
        let err = f
            .gateway
            .ask(ask(anon("visitor"), "what is luca?", much_later))
            .await
            .unwrap_err();
        match err {
            GatewayError::QuotaExceeded(e) => {
                assert!(!e.resets());
                assert!(e.to_string().contains("create an account"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let status = f.gateway.status(anon("visitor"), None, much_later).await.unwrap();
        assert_eq!(status.used, 4);
        assert_eq!(status.remaining, Remaining::Limited(0));
        assert_eq!(status.tier, Tier::Anonymous);
        assert_eq!(status.blocked_modules.len(), 11);
    }

    #[tokio::test]
    async fn subscriber_is_unlimited_but_counted() {
        let f = fixture();
        let id = seed_account(&f, Tier::Subscriber, 500).await;

        let answer = f
            .gateway
            .ask(ask(Caller::Account(id), "unlimited?", t0()))
            .await
            .unwrap();
        assert_eq!(answer.quota.limit, QuestionLimit::Unlimited);
        assert_eq!(answer.quota.remaining, Remaining::Unlimited);
        assert_eq!(answer.quota.used, 501);
        assert_eq!(answer.quota.allowed_modules.len(), 11);
    }

    #[tokio::test]
    async fn short_question_consumes_nothing() {
        let f = fixture();
        let id = seed_account(&f, Tier::Registered, 0).await;

        let err = f
            .gateway
            .ask(ask(Caller::Account(id), "hi", t0()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidQuestion(_)));
        assert_eq!(f.accounts.get(id).await.unwrap().quota.used(), 0);
        assert!(f.log.is_empty());

        let err = f.gateway.ask(ask(anon("s"), "  hi  ", t0())).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidQuestion(_)));
        assert!(f.sessions.is_empty());
    }

    #[tokio::test]
    async fn anonymous_without_token_is_invalid_session() {
        let f = fixture();
        for caller in [
            Caller::Anonymous { session_token: None },
            Caller::Anonymous {
                session_token: Some("   ".to_string()),
            },
        ] {
            let err = f
                .gateway
                .ask(ask(caller, "valid question", t0()))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::InvalidSession(_)));
        }
    }

    #[tokio::test]
    async fn unknown_account_is_reported() {
        let f = fixture();
        let err = f
            .gateway
            .ask(ask(Caller::Account(AccountId::new()), "who am I?", t0()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AccountNotFound));
    }

    #[tokio::test]
    async fn status_read_applies_window_reset() {
        let f = fixture();
        let id = seed_account(&f, Tier::Registered, 11).await;
        let later = t0() + Duration::days(8);

        let view = f.gateway.status(Caller::Account(id), None, later).await.unwrap();

        assert_eq!(view.used, 0);
        assert_eq!(view.remaining, Remaining::Limited(11));
        assert_eq!(view.next_reset, Some(later + Duration::days(7)));
        assert_eq!(f.accounts.get(id).await.unwrap().quota.last_reset(), later);
    }

    #[tokio::test]
    async fn generator_failure_keeps_the_consumed_unit() {
        let f = fixture_with(Arc::new(FailingGenerator));

        let err = f.gateway.ask(ask(anon("s-9"), "is it down?", t0())).await.unwrap_err();
        assert!(matches!(err, GatewayError::Generation(_)));

        let status = f.gateway.status(anon("s-9"), None, t0()).await.unwrap();
        assert_eq!(status.used, 1);
        assert!(f.log.is_empty());
    }

    #[tokio::test]
    async fn history_is_scoped_to_the_owner() {
        let f = fixture();
        f.gateway.ask(ask(anon("mine"), "first question", t0())).await.unwrap();
        f.gateway.ask(ask(anon("theirs"), "other question", t0())).await.unwrap();

        let owner = QuestionOwner::Session(SessionToken::parse("mine").unwrap());
        let history = f.gateway.history(&owner, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question.as_str(), "first question");
        assert_eq!(history[0].client.user_agent, "tests");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_asks_with_one_unit_left_succeed_once() {
        let f = fixture();
        let id = seed_account(&f, Tier::Registered, 10).await;
        let gateway = f.gateway.clone();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let gateway = gateway.clone();
            tasks.push(tokio::spawn(async move {
                gateway
                    .ask(ask(Caller::Account(id), "race condition?", t0()))
                    .await
            }));
        }

        let mut ok = 0;
        let mut refused = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(GatewayError::QuotaExceeded(_)) => refused += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(refused, 15);
        assert_eq!(f.accounts.get(id).await.unwrap().quota.used(), 11);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_contact_creates_one_session() {
        let f = fixture();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let gateway = f.gateway.clone();
            tasks.push(tokio::spawn(async move {
                gateway.ask(ask(anon("fresh"), "hello there", t0())).await
            }));
        }

        let ok = count_successes(tasks).await;
        assert_eq!(ok, 4);
        assert_eq!(f.sessions.len(), 1);
    }

    async fn count_successes(
        tasks: Vec<tokio::task::JoinHandle<Result<Answer, GatewayError>>>,
    ) -> usize {
        let mut ok = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        ok
    }
}

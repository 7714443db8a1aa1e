//! Postgres-backed stores.
//!
//! Quota check-and-increment is a single conditional `UPDATE … RETURNING`, so
//! concurrent requests for the same identity serialise on the row lock and the
//! limit can never be overshot.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Backend` |
//! | RowNotFound | N/A | `NotFound` |
//! | Other | N/A | `Backend` |

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use multibpo_auth::{Account, RegistrationMethod};
use multibpo_core::{AccountId, QuestionId, Tier};
use multibpo_quota::{
    AnonymousSession, ClientMetadata, LifetimeQuota, QuestionOwner, QuestionRecord, QuestionText,
    QuotaExceeded, QuotaRules, QuotaSnapshot, SessionToken, WindowedQuota,
};

use super::r#trait::{
    AccountQuota, AccountStore, ConsumeResult, QuestionLog, SessionRegistry, StoreError,
};

/// Tables used by the Postgres backends.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id                   UUID PRIMARY KEY,
    email                TEXT NOT NULL UNIQUE,
    whatsapp             TEXT NOT NULL,
    tier                 TEXT NOT NULL CHECK (tier IN ('anonymous', 'registered', 'subscriber')),
    registration_method  TEXT NOT NULL,
    email_confirmed      BOOLEAN NOT NULL DEFAULT FALSE,
    confirmation_token   UUID UNIQUE,
    confirmation_sent_at TIMESTAMPTZ,
    password_hash        TEXT,
    questions_used       INTEGER NOT NULL DEFAULT 0 CHECK (questions_used >= 0),
    last_reset           TIMESTAMPTZ NOT NULL,
    created_at           TIMESTAMPTZ NOT NULL
);

ALTER TABLE accounts ADD COLUMN IF NOT EXISTS password_hash TEXT;

CREATE TABLE IF NOT EXISTS anonymous_sessions (
    token          TEXT PRIMARY KEY,
    questions_used INTEGER NOT NULL DEFAULT 0 CHECK (questions_used >= 0),
    ip_address     TEXT,
    created_at     TIMESTAMPTZ NOT NULL,
    last_activity  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS assistant_questions (
    id               UUID PRIMARY KEY,
    account_id       UUID REFERENCES accounts (id),
    session_token    TEXT REFERENCES anonymous_sessions (token),
    question         TEXT NOT NULL,
    answer           TEXT NOT NULL,
    response_time_us BIGINT NOT NULL,
    ip_address       TEXT,
    user_agent       TEXT NOT NULL DEFAULT '',
    created_at       TIMESTAMPTZ NOT NULL,
    CHECK ((account_id IS NULL) <> (session_token IS NULL))
);

CREATE INDEX IF NOT EXISTS assistant_questions_account_idx
    ON assistant_questions (account_id, created_at DESC);
CREATE INDEX IF NOT EXISTS assistant_questions_session_idx
    ON assistant_questions (session_token, created_at DESC);
"#;

/// Create the tables if they do not exist yet.
#[instrument(skip(pool), err)]
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    Ok(())
}

const ACCOUNT_COLUMNS: &str = "id, email, whatsapp, tier, registration_method, email_confirmed, \
     confirmation_token, confirmation_sent_at, password_hash, questions_used, last_reset, created_at";

// ─────────────────────────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PostgresAccountStore {
    pool: Arc<PgPool>,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_account", e))?;

        row.map(|r| account_from_row(&r)).transpose()
    }
}

#[async_trait::async_trait]
impl AccountStore for PostgresAccountStore {
    #[instrument(skip(self, account), fields(account_id = %account.id), err)]
    async fn insert(&self, account: Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id,
                email,
                whatsapp,
                tier,
                registration_method,
                email_confirmed,
                confirmation_token,
                confirmation_sent_at,
                password_hash,
                questions_used,
                last_reset,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(&account.email)
        .bind(&account.whatsapp)
        .bind(account.tier.as_str())
        .bind(account.method.as_str())
        .bind(account.email_confirmed)
        .bind(account.confirmation_token)
        .bind(account.confirmation_sent_at)
        .bind(account.password_hash.as_deref())
        .bind(to_db_count(account.quota.used()))
        .bind(account.quota.last_reset())
        .bind(account.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_account", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        self.fetch(id).await?.ok_or(StoreError::NotFound)
    }

    #[instrument(skip(self), err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"))
            .bind(email.trim().to_lowercase())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_email", e))?;

        row.map(|r| account_from_row(&r)).transpose()
    }

    #[instrument(skip(self, token), err)]
    async fn find_by_confirmation_token(&self, token: Uuid) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE confirmation_token = $1"
        ))
        .bind(token)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_confirmation_token", e))?;

        row.map(|r| account_from_row(&r)).transpose()
    }

    #[instrument(skip(self, account), fields(account_id = %account.id), err)]
    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                whatsapp = $2,
                tier = $3,
                email_confirmed = $4,
                confirmation_token = $5,
                confirmation_sent_at = $6
            WHERE id = $1
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(&account.whatsapp)
        .bind(account.tier.as_str())
        .bind(account.email_confirmed)
        .bind(account.confirmation_token)
        .bind(account.confirmation_sent_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_account", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, rules), fields(account_id = %id, used = tracing::field::Empty), err)]
    async fn consume_question(
        &self,
        id: AccountId,
        rules: &QuotaRules,
        now: DateTime<Utc>,
    ) -> Result<ConsumeResult<AccountQuota>, StoreError> {
        // `last_reset < reset_before` is the same test as `now - last_reset > window`.
        let reset_before = now - rules.window;

        let row = sqlx::query(&format!(
            r#"
            UPDATE accounts SET
                questions_used = CASE WHEN last_reset < $3 THEN 1 ELSE questions_used + 1 END,
                last_reset = CASE WHEN last_reset < $3 THEN $2 ELSE last_reset END
            WHERE id = $1
              AND (
                    tier = 'subscriber'
                 OR (CASE WHEN last_reset < $3 THEN 0 ELSE questions_used END)
                    < (CASE tier WHEN 'anonymous' THEN $4 ELSE $5 END)
              )
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(now)
        .bind(reset_before)
        .bind(to_db_count(rules.anonymous_limit))
        .bind(to_db_count(rules.registered_limit))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("consume_question", e))?;

        if let Some(row) = row {
            let account = account_from_row(&row)?;
            let snapshot = account
                .quota
                .snapshot(account.question_limit(rules), rules.window);
            Span::current().record("used", snapshot.used);
            return Ok(Ok(AccountQuota { account, snapshot }));
        }

        // Nothing updated: either the account is missing or the quota is spent.
        let account = self.fetch(id).await?.ok_or(StoreError::NotFound)?;
        let limit = account.question_limit(rules);
        Ok(Err(QuotaExceeded::Window {
            limit: limit.as_number().unwrap_or_default(),
            next_reset: account.quota.next_reset(rules.window),
        }))
    }

    #[instrument(skip(self, rules), fields(account_id = %id), err)]
    async fn quota_status(
        &self,
        id: AccountId,
        rules: &QuotaRules,
        now: DateTime<Utc>,
    ) -> Result<AccountQuota, StoreError> {
        let reset_before = now - rules.window;

        let row = sqlx::query(&format!(
            r#"
            UPDATE accounts SET
                questions_used = CASE WHEN last_reset < $3 THEN 0 ELSE questions_used END,
                last_reset = CASE WHEN last_reset < $3 THEN $2 ELSE last_reset END
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(now)
        .bind(reset_before)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("quota_status", e))?
        .ok_or(StoreError::NotFound)?;

        let account = account_from_row(&row)?;
        let snapshot = account
            .quota
            .snapshot(account.question_limit(rules), rules.window);
        Ok(AccountQuota { account, snapshot })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Anonymous sessions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PostgresSessionRegistry {
    pool: Arc<PgPool>,
}

impl PostgresSessionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl SessionRegistry for PostgresSessionRegistry {
    #[instrument(skip(self, token), fields(session = %token.redacted()), err)]
    async fn get_or_create(
        &self,
        token: &SessionToken,
        ip_address: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Result<AnonymousSession, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO anonymous_sessions (token, questions_used, ip_address, created_at, last_activity)
            VALUES ($1, 0, $2, $3, $3)
            ON CONFLICT (token) DO NOTHING
            "#,
        )
        .bind(token.as_str())
        .bind(ip_address.map(|ip| ip.to_string()))
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;

        let row = sqlx::query(
            r#"
            SELECT token, questions_used, ip_address, created_at, last_activity
            FROM anonymous_sessions
            WHERE token = $1
            "#,
        )
        .bind(token.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_session", e))?;

        session_from_row(&row)
    }

    #[instrument(skip(self, token), fields(session = %token.redacted()), err)]
    async fn consume(
        &self,
        token: &SessionToken,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<ConsumeResult<QuotaSnapshot>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE anonymous_sessions
            SET questions_used = questions_used + 1,
                last_activity = $2
            WHERE token = $1 AND questions_used < $3
            RETURNING questions_used
            "#,
        )
        .bind(token.as_str())
        .bind(now)
        .bind(to_db_count(limit))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("consume_session", e))?;

        if let Some(row) = row {
            let used = from_db_count(row.try_get("questions_used").map_err(row_error)?)?;
            return Ok(Ok(LifetimeQuota::restore(used).snapshot(limit)));
        }

        let exists = sqlx::query("SELECT 1 FROM anonymous_sessions WHERE token = $1")
            .bind(token.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("check_session", e))?;

        match exists {
            Some(_) => Ok(Err(QuotaExceeded::Lifetime { limit })),
            None => Err(StoreError::NotFound),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Question log
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PostgresQuestionLog {
    pool: Arc<PgPool>,
}

impl PostgresQuestionLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl QuestionLog for PostgresQuestionLog {
    #[instrument(skip(self, record), fields(question_id = %record.id), err)]
    async fn append(&self, record: QuestionRecord) -> Result<(), StoreError> {
        let (account_id, session_token) = owner_columns(&record.owner);

        sqlx::query(
            r#"
            INSERT INTO assistant_questions (
                id,
                account_id,
                session_token,
                question,
                answer,
                response_time_us,
                ip_address,
                user_agent,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(account_id)
        .bind(session_token)
        .bind(record.question.as_str())
        .bind(&record.answer)
        .bind(i64::try_from(record.response_time.as_micros()).unwrap_or(i64::MAX))
        .bind(record.client.ip_address.map(|ip| ip.to_string()))
        .bind(&record.client.user_agent)
        .bind(record.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_question", e))?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_for_owner(
        &self,
        owner: &QuestionOwner,
        limit: usize,
    ) -> Result<Vec<QuestionRecord>, StoreError> {
        let (account_id, session_token) = owner_columns(owner);

        let rows = sqlx::query(
            r#"
            SELECT
                id,
                account_id,
                session_token,
                question,
                answer,
                response_time_us,
                ip_address,
                user_agent,
                created_at
            FROM assistant_questions
            WHERE ($1::uuid IS NOT NULL AND account_id = $1)
               OR ($2::text IS NOT NULL AND session_token = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(account_id)
        .bind(session_token)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_questions", e))?;

        rows.iter().map(question_from_row).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<Account, StoreError> {
    let tier: String = row.try_get("tier").map_err(row_error)?;
    let method: String = row.try_get("registration_method").map_err(row_error)?;
    let used: i32 = row.try_get("questions_used").map_err(row_error)?;

    Ok(Account {
        id: AccountId::from_uuid(row.try_get("id").map_err(row_error)?),
        email: row.try_get("email").map_err(row_error)?,
        whatsapp: row.try_get("whatsapp").map_err(row_error)?,
        tier: tier
            .parse::<Tier>()
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        method: method
            .parse::<RegistrationMethod>()
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        email_confirmed: row.try_get("email_confirmed").map_err(row_error)?,
        confirmation_token: row.try_get("confirmation_token").map_err(row_error)?,
        confirmation_sent_at: row.try_get("confirmation_sent_at").map_err(row_error)?,
        password_hash: row.try_get("password_hash").map_err(row_error)?,
        quota: WindowedQuota::restore(
            from_db_count(used)?,
            row.try_get("last_reset").map_err(row_error)?,
        ),
        created_at: row.try_get("created_at").map_err(row_error)?,
    })
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> Result<AnonymousSession, StoreError> {
    let token: String = row.try_get("token").map_err(row_error)?;
    let ip: Option<String> = row.try_get("ip_address").map_err(row_error)?;

    Ok(AnonymousSession {
        token: SessionToken::parse(&token).map_err(|e| StoreError::Backend(e.to_string()))?,
        quota: LifetimeQuota::restore(from_db_count(
            row.try_get("questions_used").map_err(row_error)?,
        )?),
        ip_address: ip.and_then(|s| s.parse().ok()),
        created_at: row.try_get("created_at").map_err(row_error)?,
        last_activity: row.try_get("last_activity").map_err(row_error)?,
    })
}

fn question_from_row(row: &sqlx::postgres::PgRow) -> Result<QuestionRecord, StoreError> {
    let account_id: Option<Uuid> = row.try_get("account_id").map_err(row_error)?;
    let session_token: Option<String> = row.try_get("session_token").map_err(row_error)?;
    let owner = match (account_id, session_token) {
        (Some(id), None) => QuestionOwner::Account(AccountId::from_uuid(id)),
        (None, Some(token)) => QuestionOwner::Session(
            SessionToken::parse(&token).map_err(|e| StoreError::Backend(e.to_string()))?,
        ),
        _ => {
            return Err(StoreError::Backend(
                "question row must reference exactly one owner".to_string(),
            ));
        }
    };

    let question: String = row.try_get("question").map_err(row_error)?;
    let micros: i64 = row.try_get("response_time_us").map_err(row_error)?;
    let ip: Option<String> = row.try_get("ip_address").map_err(row_error)?;

    Ok(QuestionRecord {
        id: QuestionId::from_uuid(row.try_get("id").map_err(row_error)?),
        owner,
        question: QuestionText::parse(&question).map_err(|e| StoreError::Backend(e.to_string()))?,
        answer: row.try_get("answer").map_err(row_error)?,
        response_time: std::time::Duration::from_micros(u64::try_from(micros).unwrap_or_default()),
        client: ClientMetadata {
            ip_address: ip.and_then(|s| s.parse().ok()),
            user_agent: row.try_get("user_agent").map_err(row_error)?,
        },
        created_at: row.try_get("created_at").map_err(row_error)?,
    })
}

fn owner_columns(owner: &QuestionOwner) -> (Option<Uuid>, Option<&str>) {
    match owner {
        QuestionOwner::Account(id) => (Some(*id.as_uuid()), None),
        QuestionOwner::Session(token) => (None, Some(token.as_str())),
    }
}

fn to_db_count(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn from_db_count(n: i32) -> Result<u32, StoreError> {
    u32::try_from(n).map_err(|_| StoreError::Backend(format!("negative question count {n}")))
}

fn row_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use multibpo_ai::{AnswerGenerator, LocalAnswerGenerator};
use multibpo_auth::{EntitlementPolicy, Hs256JwtValidator};
use multibpo_core::DomainError;
use multibpo_infra::{
    accounts::{AccountService, ConfirmationNotifier, LogConfirmationNotifier},
    config::{AppConfig, StorageConfig},
    gateway::QuestionGateway,
    store::{
        AccountStore, InMemoryAccountStore, InMemoryQuestionLog, InMemorySessionRegistry,
        PostgresAccountStore, PostgresQuestionLog, PostgresSessionRegistry, QuestionLog,
        SessionRegistry, StoreError, migrate,
    },
};

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("invalid entitlement configuration: {0}")]
    Policy(#[from] DomainError),

    #[error("failed to connect to Postgres: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to prepare schema: {0}")]
    Schema(#[from] StoreError),
}

/// Everything the handlers need, shared behind an `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub gateway: QuestionGateway,
    pub accounts: AccountService,
    pub policy: Arc<EntitlementPolicy>,
    /// Signs login tokens and verifies bearer tokens with the same secret.
    pub tokens: Arc<Hs256JwtValidator>,
}

struct Stores {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionRegistry>,
    log: Arc<dyn QuestionLog>,
}

impl AppServices {
    /// In-process stores; state is lost on restart.
    pub fn in_memory(
        config: &AppConfig,
        notifier: Arc<dyn ConfirmationNotifier>,
    ) -> Result<Self, ServicesError> {
        let stores = Stores {
            accounts: Arc::new(InMemoryAccountStore::new()),
            sessions: Arc::new(InMemorySessionRegistry::new()),
            log: Arc::new(InMemoryQuestionLog::new()),
        };
        Self::wire(config, stores, notifier)
    }

    /// Postgres-backed stores over an existing pool. Creates missing tables.
    pub async fn postgres(
        config: &AppConfig,
        pool: PgPool,
        notifier: Arc<dyn ConfirmationNotifier>,
    ) -> Result<Self, ServicesError> {
        migrate(&pool).await?;
        let stores = Stores {
            accounts: Arc::new(PostgresAccountStore::new(pool.clone())),
            sessions: Arc::new(PostgresSessionRegistry::new(pool.clone())),
            log: Arc::new(PostgresQuestionLog::new(pool)),
        };
        Self::wire(config, stores, notifier)
    }

    fn wire(
        config: &AppConfig,
        stores: Stores,
        notifier: Arc<dyn ConfirmationNotifier>,
    ) -> Result<Self, ServicesError> {
        let policy = Arc::new(EntitlementPolicy::new(config.entitlements())?);
        let generator: Arc<dyn AnswerGenerator> = Arc::new(LocalAnswerGenerator::default());

        let gateway = QuestionGateway::new(
            stores.accounts.clone(),
            stores.sessions,
            stores.log,
            generator,
            policy.clone(),
        );
        let accounts = AccountService::new(stores.accounts, notifier, policy.clone());

        Ok(Self {
            gateway,
            accounts,
            policy,
            tokens: Arc::new(Hs256JwtValidator::new(config.jwt_secret.as_bytes().to_vec())),
        })
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, ServicesError> {
    let notifier: Arc<dyn ConfirmationNotifier> = Arc::new(LogConfirmationNotifier);

    match &config.storage {
        StorageConfig::InMemory => {
            info!("using in-memory stores");
            AppServices::in_memory(config, notifier)
        }
        StorageConfig::Postgres { database_url } => {
            info!("using Postgres stores");
            let pool = PgPool::connect(database_url).await?;
            AppServices::postgres(config, pool, notifier).await
        }
    }
}

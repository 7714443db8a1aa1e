use std::sync::Arc;

use chrono::{Duration, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use multibpo_auth::{Account, RegisterAccount, RegistrationMethod};
use multibpo_core::{AccountId, QuestionLimit, Tier};
use multibpo_infra::store::{AccountStore, InMemoryAccountStore, InMemorySessionRegistry, SessionRegistry};
use multibpo_quota::{QuotaRules, SessionToken, WindowedQuota};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn subscriber_account() -> Account {
    let mut account = Account::register(&RegisterAccount {
        account_id: AccountId::new(),
        email: format!("{}@bench.local", AccountId::new()),
        whatsapp: String::new(),
        method: RegistrationMethod::Google,
        password: None,
        occurred_at: Utc::now(),
    })
    .unwrap();
    account.set_tier(Tier::Subscriber);
    account
}

/// Pure state machine cost: lazy reset check + increment.
fn bench_windowed_try_consume(c: &mut Criterion) {
    let window = Duration::days(7);
    let now = Utc::now();

    c.bench_function("windowed_try_consume_unlimited", |b| {
        let mut quota = WindowedQuota::new(now);
        b.iter(|| {
            let _ = black_box(quota.try_consume(QuestionLimit::Unlimited, window, now));
        });
    });

    c.bench_function("windowed_try_consume_refused", |b| {
        let mut quota = WindowedQuota::restore(11, now);
        b.iter(|| {
            let _ = black_box(quota.try_consume(QuestionLimit::Limited(11), window, now));
        });
    });
}

/// Many tasks hammering one account through the store's per-account mutex.
fn bench_contended_account_consume(c: &mut Criterion) {
    let rt = runtime();
    let rules = QuotaRules::default();
    let mut group = c.benchmark_group("contended_account_consume");

    for tasks in [1usize, 8, 64] {
        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            let store = Arc::new(InMemoryAccountStore::new());
            let account = subscriber_account();
            let id = account.id;
            rt.block_on(store.insert(account)).unwrap();

            b.iter(|| {
                rt.block_on(async {
                    let mut handles = Vec::with_capacity(tasks);
                    for _ in 0..tasks {
                        let store = store.clone();
                        handles.push(tokio::spawn(async move {
                            store.consume_question(id, &rules, Utc::now()).await
                        }));
                    }
                    for handle in handles {
                        let _ = black_box(handle.await);
                    }
                });
            });
        });
    }

    group.finish();
}

/// First contact for fresh tokens vs repeat lookups of one token.
fn bench_session_get_or_create(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("session_get_or_create");

    group.bench_function("existing_token", |b| {
        let registry = InMemorySessionRegistry::new();
        let token = SessionToken::parse("bench-session").unwrap();
        b.iter(|| {
            let _ = black_box(rt.block_on(registry.get_or_create(&token, None, Utc::now())));
        });
    });

    group.bench_function("fresh_tokens", |b| {
        let registry = InMemorySessionRegistry::new();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let token = SessionToken::parse(&format!("bench-{n}")).unwrap();
            let _ = black_box(rt.block_on(registry.get_or_create(&token, None, Utc::now())));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_windowed_try_consume,
    bench_contended_account_consume,
    bench_session_get_or_create
);
criterion_main!(benches);

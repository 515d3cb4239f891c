//! End-to-end tests for the runtime facade.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{AggregateId, RetryOptions};
use entity::account::{self, ACCOUNT, Account, AccountError};
use entity::{CommandEnv, CommandError, Entity, EntityDescription, PayloadSchema};
use event_store::{
    AppendOptions, DomainEvent, EventStore, EventStoreError, InMemoryEventStore, RecordedEvent,
    Revision,
};
use runtime::{Config, ConfigError, ExecuteOptions, Runtime, RuntimeError};
use serde_json::{Value, json};
use tokio::task::JoinSet;
use worker_pool::{PoolConfig, PoolError};

fn id() -> AggregateId {
    AggregateId::new(ACCOUNT, "acc-1")
}

fn fast_config() -> Config {
    Config {
        retry: RetryOptions {
            limit: 5,
            delay: Duration::from_millis(1),
        },
        ..Config::default()
    }
}

fn accounts(store: InMemoryEventStore) -> Runtime<Account, AccountError> {
    Runtime::new(fast_config(), store, account::description()).unwrap()
}

/// Fails the first `failures` appends as if the backend were throttling.
struct ThrottledStore {
    inner: InMemoryEventStore,
    failures: AtomicU32,
}

#[async_trait]
impl EventStore for ThrottledStore {
    async fn load(&self, aggregate: &AggregateId) -> Result<Vec<RecordedEvent>, EventStoreError> {
        self.inner.load(aggregate).await
    }

    async fn append(
        &self,
        aggregate: &AggregateId,
        events: Vec<DomainEvent>,
        options: AppendOptions,
    ) -> Result<Revision, EventStoreError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(EventStoreError::Transient("throttled".into()));
        }
        self.inner.append(aggregate, events, options).await
    }
}

async fn stall(
    _env: CommandEnv,
    _entity: Option<Entity<i64>>,
    _cmd: Value,
) -> Result<(), CommandError<Infallible>> {
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}

async fn bump(
    env: CommandEnv,
    _entity: Option<Entity<i64>>,
    _cmd: Value,
) -> Result<(), CommandError<Infallible>> {
    env.append_event("bumped", &json!({})).await?;
    Ok(())
}

fn ticker() -> EntityDescription<i64, Infallible> {
    EntityDescription::builder("ticker")
        .initializer("bumped", |_: Value| 1)
        .reducer("bumped", |total: i64, _: Value| total + 1)
        .creation_command("stall", PayloadSchema::any(), stall)
        .creation_command("bump", PayloadSchema::any(), bump)
        .build()
}

fn ticker_runtime(store: InMemoryEventStore, pool: PoolConfig) -> Runtime<i64, Infallible> {
    let config = Config {
        pool,
        ..fast_config()
    };
    Runtime::new(config, store, ticker()).unwrap()
}

fn tick() -> AggregateId {
    AggregateId::new("ticker", "t-1")
}

mod execution {
    use super::*;

    #[tokio::test]
    async fn commands_run_and_return_the_fresh_entity() {
        let runtime = accounts(InMemoryEventStore::new());
        runtime
            .execute("open", id(), json!({ "owner": "ada", "initial_deposit": 40 }))
            .await
            .unwrap();

        let account = runtime
            .execute("deposit", id(), json!({ "amount": 2 }))
            .await
            .unwrap();

        assert_eq!(account.state.balance, 42);
        assert_eq!(runtime.load(&id()).await.unwrap().revision, account.revision);
    }

    #[tokio::test]
    async fn invalid_payload_is_a_client_error() {
        let store = InMemoryEventStore::new();
        let runtime = accounts(store.clone());
        runtime
            .execute("open", id(), json!({ "owner": "ada" }))
            .await
            .unwrap();

        let err = runtime
            .execute("deposit", id(), json!({ "amount": "lots" }))
            .await
            .unwrap_err();

        assert!(err.is_client_error());
        assert!(matches!(err, RuntimeError::Command(CommandError::Validation(_))));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn rejections_are_surfaced_unchanged() {
        let runtime = accounts(InMemoryEventStore::new());
        runtime
            .execute("open", id(), json!({ "owner": "ada", "initial_deposit": 5 }))
            .await
            .unwrap();

        let err = runtime
            .execute("withdraw", id(), json!({ "amount": 6 }))
            .await
            .unwrap_err();

        assert_eq!(
            err.rejection(),
            Some(&AccountError::InsufficientBalance {
                balance: 5,
                requested: 6
            })
        );
    }

    #[tokio::test]
    async fn loading_a_missing_aggregate_is_not_available() {
        let runtime = accounts(InMemoryEventStore::new());
        let err = runtime.load(&id()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Command(CommandError::NotAvailable(_))));
    }

    #[tokio::test]
    async fn correlation_id_is_stamped_on_events() {
        let store = InMemoryEventStore::new();
        let runtime = accounts(store.clone());

        runtime
            .execute_with(
                "open",
                id(),
                json!({ "owner": "ada" }),
                ExecuteOptions::default().correlation_id("req-9"),
            )
            .await
            .unwrap();

        let events = store.load(&id()).await.unwrap();
        assert_eq!(events[0].metadata.correlation_id.as_deref(), Some("req-9"));
    }

    #[tokio::test]
    async fn transient_store_faults_are_retried() {
        let store = ThrottledStore {
            inner: InMemoryEventStore::new(),
            failures: AtomicU32::new(3),
        };
        let runtime = Runtime::new(fast_config(), store, account::description()).unwrap();

        let account = runtime
            .execute("open", id(), json!({ "owner": "ada", "initial_deposit": 9 }))
            .await
            .unwrap();

        assert_eq!(account.state.balance, 9);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config {
            retry: RetryOptions::with_limit(40),
            ..Config::default()
        };
        let result = Runtime::new(config, InMemoryEventStore::new(), account::description());
        assert!(matches!(result, Err(RuntimeError::Config(ConfigError::Retry(_)))));
    }

    #[test]
    fn zero_concurrency_is_a_config_error() {
        let config = Config {
            pool: PoolConfig {
                max_concurrency: 0,
                ..PoolConfig::default()
            },
            ..Config::default()
        };
        let err = Runtime::new(config, InMemoryEventStore::new(), account::description())
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Config(ConfigError::ZeroConcurrency)));
        assert!(!err.is_client_error());
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_aggregate_commands_never_conflict() {
        let runtime = accounts(InMemoryEventStore::new());
        runtime
            .execute("open", id(), json!({ "owner": "ada", "initial_deposit": 50 }))
            .await
            .unwrap();

        let mut set = JoinSet::new();
        for _ in 0..10 {
            let runtime = runtime.clone();
            set.spawn(async move {
                runtime
                    .execute("withdraw", id(), json!({ "amount": 10 }))
                    .await
            });
        }
        let mut succeeded = 0;
        let mut rejected = 0;
        while let Some(joined) = set.join_next().await {
            match joined.unwrap() {
                Ok(_) => succeeded += 1,
                Err(e) if e.rejection().is_some() => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!((succeeded, rejected), (5, 5));
        assert_eq!(runtime.load(&id()).await.unwrap().state.balance, 0);
    }
}

mod capacity {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_to_pool_timeout() {
        let runtime = ticker_runtime(InMemoryEventStore::new(), PoolConfig::default());

        let err = runtime
            .execute_with(
                "stall",
                tick(),
                json!({}),
                ExecuteOptions::default().timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();

        assert!(err.is_capacity());
        assert!(matches!(err, RuntimeError::Pool(PoolError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn work_timed_out_behind_its_aggregate_never_runs() {
        let store = InMemoryEventStore::new();
        let runtime = ticker_runtime(store.clone(), PoolConfig::default());

        let stalled = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.execute("stall", tick(), json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let err = runtime
            .execute_with(
                "bump",
                tick(),
                json!({}),
                ExecuteOptions::default().timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Pool(PoolError::Timeout(_))));

        // The stall appends nothing, so there is no entity to return.
        let stalled = stalled.await.unwrap();
        assert!(matches!(stalled, Err(RuntimeError::Command(CommandError::NotAvailable(_)))));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_aggregate_leaves_pool_capacity_for_others() {
        let runtime = ticker_runtime(
            InMemoryEventStore::new(),
            PoolConfig {
                max_concurrency: 2,
                ..PoolConfig::default()
            },
        );
        let stalls: Vec<_> = (0..2)
            .map(|_| {
                let runtime = runtime.clone();
                tokio::spawn(async move { runtime.execute("stall", tick(), json!({})).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let started = tokio::time::Instant::now();
        let other = runtime
            .execute("bump", AggregateId::new("ticker", "other"), json!({}))
            .await
            .unwrap();

        let waited = started.elapsed();
        assert!(waited < Duration::from_millis(100), "other aggregate waited {waited:?}");
        assert_eq!(other.state, 1);
        for stall in stalls {
            stall.await.unwrap().unwrap_err();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_handler_still_holds_its_aggregate() {
        let runtime = ticker_runtime(InMemoryEventStore::new(), PoolConfig::default());

        let err = runtime
            .execute_with(
                "stall",
                tick(),
                json!({}),
                ExecuteOptions::default().timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Pool(PoolError::Timeout(_))));

        let started = tokio::time::Instant::now();
        let ticker = runtime.execute("bump", tick(), json!({})).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(900));
        assert_eq!(ticker.state, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_pool_fails_fast() {
        let runtime = ticker_runtime(
            InMemoryEventStore::new(),
            PoolConfig {
                max_concurrency: 1,
                max_pending: 0,
                ..PoolConfig::default()
            },
        );
        let busy = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.execute("stall", tick(), json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let err = runtime
            .execute("bump", AggregateId::new("ticker", "t-2"), json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::Pool(PoolError::Saturated { .. })));
        busy.await.unwrap().unwrap_err();
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work() {
        let runtime = accounts(InMemoryEventStore::new());
        let report = runtime.shutdown().await;
        assert_eq!(report.abandoned, 0);

        let err = runtime
            .execute("open", id(), json!({ "owner": "ada" }))
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::Pool(PoolError::ShuttingDown)));
    }
}

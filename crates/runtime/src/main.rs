//! Demo entry point: runs a few account commands through the runtime.

use common::AggregateId;
use entity::account::{self, ACCOUNT};
use event_store::InMemoryEventStore;
use runtime::{Config, Runtime, telemetry};
use serde_json::json;
use tokio::task::JoinSet;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    telemetry::init_tracing(&config)?;

    // 2. Runtime over an in-memory store
    let runtime = Runtime::new(config, InMemoryEventStore::new(), account::description())?;
    let id = AggregateId::new(ACCOUNT, "demo");

    // 3. Open the account, then race a handful of withdrawals against it
    runtime
        .execute("open", id.clone(), json!({ "owner": "demo", "initial_deposit": 100 }))
        .await?;

    let mut withdrawals = JoinSet::new();
    for _ in 0..5 {
        let runtime = runtime.clone();
        let id = id.clone();
        withdrawals.spawn(async move {
            runtime
                .execute("withdraw", id, json!({ "amount": 30 }))
                .await
        });
    }
    while let Some(joined) = withdrawals.join_next().await {
        match joined? {
            Ok(account) => tracing::info!(balance = account.state.balance, "withdrawal accepted"),
            Err(e) if e.rejection().is_some() => tracing::info!(error = %e, "withdrawal rejected"),
            Err(e) => return Err(e.into()),
        }
    }

    // 4. Print the final entity and drain the pool
    let account = runtime.load(&id).await?;
    println!("{}", serde_json::to_string_pretty(&account)?);

    let report = runtime.shutdown().await;
    tracing::info!(completed = report.completed, abandoned = report.abandoned, "runtime stopped");
    Ok(())
}

// Reviewflow worker binary
//
// Wires the store, broker, LLM manager, action registry, engine, and
// dispatcher together, then runs the worker pool until SIGINT.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reviewflow_core::llm::{LlmManager, ProviderRegistry};
use reviewflow_core::EnvConfig;
use reviewflow_engine::{
    AccessAuditLog, ActionRegistry, AllowAll, Dispatcher, EngineConfig, ExecutionEngine,
};
use reviewflow_queue::{QueueBroker, RedisBroker};
use reviewflow_storage::{InMemoryWorkflowStore, PostgresWorkflowStore, WorkflowStore};
use reviewflow_worker::{WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reviewflow_worker=debug,reviewflow_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EnvConfig::from_env().context("invalid environment configuration")?;
    tracing::info!(
        environment = %config.environment,
        worker_id = %config.queue.worker_id,
        "reviewflow-worker starting"
    );

    // Store: PostgreSQL when configured, in-memory otherwise
    let store: Arc<dyn WorkflowStore> = match (&config.database, config.skip_db_init) {
        (Some(db_config), false) => {
            let store = PostgresWorkflowStore::connect(db_config)
                .await
                .context("failed to open store")?;
            store.migrate().await.context("migrations failed")?;
            tracing::info!("connected to database");
            Arc::new(store)
        }
        _ => {
            tracing::warn!("DATABASE_URL not set or SKIP_DB_INIT enabled, using in-memory store");
            Arc::new(InMemoryWorkflowStore::new())
        }
    };

    let broker: Arc<dyn QueueBroker> = Arc::new(
        RedisBroker::connect(&config.queue)
            .await
            .context("failed to connect to queue broker")?,
    );

    // LLM providers: registered explicitly at startup
    let registry = Arc::new(ProviderRegistry::with_defaults());
    let llm = Arc::new(LlmManager::new(registry, &config.llm));
    tracing::info!(
        providers = ?llm.available_providers(),
        "LLM providers initialized"
    );

    let actions = Arc::new(ActionRegistry::with_builtins(Some(llm)));
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        actions,
        Arc::new(AllowAll),
        Arc::new(AccessAuditLog::new()),
        EngineConfig::default(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), broker.clone()));

    let pool = Arc::new(WorkerPool::new(
        broker,
        engine,
        dispatcher,
        WorkerConfig::default(),
    ));

    let shutdown = pool.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    pool.run().await;
    Ok(())
}

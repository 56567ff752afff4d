// Reviewflow intake server
//
// Serves the webhook endpoint and a masked health snapshot. Workflow
// CRUD and the dashboard are external collaborators.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use reviewflow_core::EnvConfig;
use reviewflow_engine::CommenterAdmission;
use reviewflow_queue::{QueueBroker, RedisBroker};
use reviewflow_storage::{
    CreateIntegration, InMemoryWorkflowStore, PostgresWorkflowStore, StoreError, WorkflowStore,
};

mod webhook;

use webhook::WebhookState;

#[derive(Clone)]
struct HealthState {
    store: Arc<dyn WorkflowStore>,
    queue: Arc<dyn QueueBroker>,
}

async fn health(State(state): State<HealthState>) -> Json<serde_json::Value> {
    let store_health = state.store.health().await;
    let queue_status = match state.queue.stats().await {
        Ok(stats) => json!({
            "status": "healthy",
            "pending": stats.pending,
            "processing": stats.processing,
            "active_workers": stats.active_workers.len(),
        }),
        Err(_) => json!({ "status": "unavailable" }),
    };

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "database": store_health,
        "queue": queue_status,
    }))
}

/// The integration instance this endpoint serves; created on first boot.
async fn default_integration(store: &Arc<dyn WorkflowStore>) -> Result<Uuid> {
    let existing = store
        .list_integrations(false)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .into_iter()
        .find(|integration| integration.name == "default");

    if let Some(integration) = existing {
        return Ok(integration.id);
    }

    match store
        .create_integration(CreateIntegration {
            name: "default".to_string(),
            integration_type: "github".to_string(),
            config: json!({}),
            enabled: true,
            credentials_encrypted: None,
        })
        .await
    {
        Ok(integration) => Ok(integration.id),
        // Another instance won the race
        Err(StoreError::Conflict(_)) => default_integration_retry(store).await,
        Err(err) => Err(anyhow::anyhow!(err.to_string())),
    }
}

async fn default_integration_retry(store: &Arc<dyn WorkflowStore>) -> Result<Uuid> {
    store
        .list_integrations(false)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .into_iter()
        .find(|integration| integration.name == "default")
        .map(|integration| integration.id)
        .context("default integration disappeared after conflict")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reviewflow_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EnvConfig::from_env().context("invalid environment configuration")?;
    tracing::info!(environment = %config.environment, "reviewflow-api starting");

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

    let queue: Arc<dyn QueueBroker> = Arc::new(
        RedisBroker::connect(&config.queue)
            .await
            .context("failed to connect to queue broker")?,
    );

    if config.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET not set; webhook deliveries will be rejected");
    }

    let integration_id = default_integration(&store).await?;
    let webhook_state = WebhookState {
        store: store.clone(),
        queue: queue.clone(),
        admission: Arc::new(CommenterAdmission::new(store.clone())),
        integration_id,
        secret: config.webhook_secret.clone(),
    };
    let health_state = HealthState {
        store: store.clone(),
        queue: queue.clone(),
    };

    let app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .route(
            "/api/webhook",
            post(webhook::handle).with_state(webhook_state),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = "0.0.0.0:9000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

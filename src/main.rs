use anyhow::{Context, Result};
use std::sync::Arc;
use telemetry_gateway::bus::{MessageBus, MqttMessageBus};
use telemetry_gateway::config::Config;
use telemetry_gateway::http::{self, AppState};
use telemetry_gateway::ingest::IngestService;
use telemetry_gateway::store::{build_pool, PgTelemetryStore};

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,telemetry_gateway=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let pool = build_pool(&config.database_url, config.db_pool_size)
        .await
        .context("failed to connect to the telemetry database")?;
    let store = Arc::new(PgTelemetryStore::new(pool));
    store
        .ensure_schema()
        .await
        .context("failed to prepare the telemetry schema")?;

    // Adapters are built once here and handed to the orchestrator; connection
    // lifecycle stays with process startup/shutdown.
    let bus = Arc::new(MqttMessageBus::new(
        &config.mqtt_client_id,
        &config.mqtt_host,
        config.mqtt_port,
        config.mqtt_username.as_deref(),
        config.mqtt_password.as_deref(),
        &config.mqtt_topic_prefix,
    ));
    bus.connect().await?;

    let ingest = IngestService::new(bus.clone(), store);
    let app = http::router(AppState {
        ingest,
        max_batch: config.max_batch,
    });

    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", config.http_bind))?;
    tracing::info!(bind = %config.http_bind, "telemetry gateway listening");
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = http_handle => {}
    }

    bus.disconnect().await?;
    Ok(())
}

use crate::bus::MessageBus;
use crate::error::map_ingest_error;
use crate::ingest::{BatchIngestAck, IngestAck, IngestService};
use crate::store::TelemetryStore;
use crate::telemetry::RawTelemetry;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub struct AppState<B, S> {
    pub ingest: IngestService<B, S>,
    /// Batch size cap enforced here at the boundary, not by the orchestrator.
    pub max_batch: usize,
}

impl<B, S> Clone for AppState<B, S> {
    fn clone(&self) -> Self {
        Self {
            ingest: self.ingest.clone(),
            max_batch: self.max_batch,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchIngestRequest {
    pub telemetry: Vec<RawTelemetry>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: String,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn telemetry_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "telemetry-ingestion",
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn ingest_telemetry<B: MessageBus, S: TelemetryStore>(
    State(state): State<AppState<B, S>>,
    Json(payload): Json<RawTelemetry>,
) -> Result<(StatusCode, Json<IngestAck>), (StatusCode, String)> {
    let ack = state
        .ingest
        .ingest(payload)
        .await
        .map_err(map_ingest_error)?;
    // 202: the stream has the event, the store write is still in flight.
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn ingest_telemetry_batch<B: MessageBus, S: TelemetryStore>(
    State(state): State<AppState<B, S>>,
    Json(payload): Json<BatchIngestRequest>,
) -> Result<(StatusCode, Json<BatchIngestAck>), (StatusCode, String)> {
    if payload.telemetry.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "telemetry batch must contain at least one item".to_string(),
        ));
    }
    if payload.telemetry.len() > state.max_batch {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("telemetry batch cannot exceed {} items", state.max_batch),
        ));
    }

    let ack = state
        .ingest
        .ingest_batch(payload.telemetry)
        .await
        .map_err(map_ingest_error)?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

pub fn router<B: MessageBus, S: TelemetryStore>(state: AppState<B, S>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/telemetry", post(ingest_telemetry::<B, S>))
        .route(
            "/api/v1/telemetry/batch",
            post(ingest_telemetry_batch::<B, S>),
        )
        .route("/api/v1/telemetry/health", get(telemetry_health))
        .with_state(state)
}

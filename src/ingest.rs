use crate::bus::MessageBus;
use crate::error::IngestError;
use crate::store::TelemetryStore;
use crate::telemetry::{RawTelemetry, TelemetryRecord};
use futures::future;
use serde::Serialize;
use std::sync::Arc;

/// Acknowledgment for a single ingested reading.
#[derive(Debug, Clone, Serialize)]
pub struct IngestAck {
    pub success: bool,
    pub message: String,
    pub telemetry: IngestedTelemetry,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestedTelemetry {
    pub device_id: String,
    pub truck_id: String,
    pub timestamp: String,
    pub needs_alert: bool,
}

/// Acknowledgment for a batch. `success` is true even with per-item
/// validation failures; the batch call itself only fails when the bus does.
#[derive(Debug, Clone, Serialize)]
pub struct BatchIngestAck {
    pub success: bool,
    pub message: String,
    pub ingested: usize,
    pub failed: usize,
}

/// Sequences the two sides of an ingest: publish to the message bus
/// (authoritative, must succeed) and persistence to the telemetry store
/// (best effort, detached). Generic over its two ports so tests swap in
/// mocks; the process wires in MQTT and Postgres adapters once at startup.
pub struct IngestService<B, S> {
    bus: Arc<B>,
    store: Arc<S>,
}

impl<B, S> Clone for IngestService<B, S> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            store: Arc::clone(&self.store),
        }
    }
}

impl<B, S> IngestService<B, S>
where
    B: MessageBus,
    S: TelemetryStore,
{
    pub fn new(bus: Arc<B>, store: Arc<S>) -> Self {
        Self { bus, store }
    }

    /// Ingest one reading: validate, publish keyed by device id, then hand
    /// the record to the store off the response path.
    pub async fn ingest(&self, input: RawTelemetry) -> Result<IngestAck, IngestError> {
        let record = TelemetryRecord::from_raw(&input)?;

        // The stream is the system of record: a publish failure fails the
        // whole ingest and the store is never touched.
        self.bus.publish(&record, record.device_id()).await?;

        let ack = IngestAck {
            success: true,
            message: "Telemetry data ingested successfully".to_string(),
            telemetry: IngestedTelemetry {
                device_id: record.device_id().to_string(),
                truck_id: record.truck_id().to_string(),
                timestamp: record.timestamp().to_rfc3339(),
                needs_alert: record.needs_alert(),
            },
        };

        self.spawn_persist(vec![record]);

        Ok(ack)
    }

    /// Ingest an ordered batch. Validation failures are isolated per item;
    /// the publish of everything that validated is one bus operation and a
    /// bus failure aborts the whole call.
    pub async fn ingest_batch(
        &self,
        inputs: Vec<RawTelemetry>,
    ) -> Result<BatchIngestAck, IngestError> {
        let mut records = Vec::with_capacity(inputs.len());
        let mut failed = 0usize;

        for (index, input) in inputs.into_iter().enumerate() {
            match TelemetryRecord::from_raw(&input) {
                Ok(record) => records.push(record),
                Err(err) => {
                    failed += 1;
                    tracing::warn!(
                        index,
                        device_id = %input.device_id,
                        error = %err,
                        "rejected telemetry batch item"
                    );
                }
            }
        }

        let ingested = records.len();
        if !records.is_empty() {
            self.bus.publish_batch(&records).await?;
            self.spawn_persist(records);
        }

        Ok(BatchIngestAck {
            success: true,
            message: "Batch telemetry ingestion completed".to_string(),
            ingested,
            failed,
        })
    }

    /// The store write is never awaited on the response path. The bus is
    /// authoritative and the store a lagging read index, so a failed save
    /// only ever reaches the log.
    fn spawn_persist(&self, records: Vec<TelemetryRecord>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let results = future::join_all(records.iter().map(|record| store.save(record))).await;
            for (record, result) in records.iter().zip(results) {
                if let Err(err) = result {
                    tracing::warn!(
                        device_id = %record.device_id(),
                        truck_id = %record.truck_id(),
                        error = %err,
                        "failed to persist telemetry"
                    );
                }
            }
        });
    }
}

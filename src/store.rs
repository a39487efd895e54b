use crate::error::StoreError;
use crate::telemetry::{TelemetryData, TelemetryRecord};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use uuid::Uuid;

/// A telemetry record as the store returned it: the validated record plus
/// store-assigned identity and creation metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTelemetry {
    pub id: Uuid,
    pub record: TelemetryRecord,
    pub created_at: DateTime<Utc>,
}

/// Best-effort read index of the event stream. The orchestrator only ever
/// calls `save`, and never on the request path; the read methods exist for
/// query-side consumers.
pub trait TelemetryStore: Send + Sync + 'static {
    fn save(
        &self,
        record: &TelemetryRecord,
    ) -> impl Future<Output = Result<StoredTelemetry, StoreError>> + Send;

    fn find_by_device_id(
        &self,
        device_id: &str,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<StoredTelemetry>, StoreError>> + Send;

    fn find_by_truck_id(
        &self,
        truck_id: &str,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<StoredTelemetry>, StoreError>> + Send;

    fn find_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<StoredTelemetry>, StoreError>> + Send;

    fn latest_by_device_id(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<Option<StoredTelemetry>, StoreError>> + Send;
}

pub async fn build_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct TelemetryRow {
    id: Uuid,
    device_id: String,
    truck_id: String,
    latitude: f64,
    longitude: f64,
    temperature: f64,
    humidity: f64,
    ts: DateTime<Utc>,
    speed: Option<f64>,
    altitude: Option<f64>,
    created_at: DateTime<Utc>,
}

impl TelemetryRow {
    /// Rows go back through domain validation on the way out, so a consumer
    /// never sees a record the domain would not have accepted.
    fn into_stored(self) -> Result<StoredTelemetry, StoreError> {
        let record = TelemetryRecord::create(TelemetryData {
            device_id: self.device_id,
            truck_id: self.truck_id,
            latitude: self.latitude,
            longitude: self.longitude,
            temperature: self.temperature,
            humidity: self.humidity,
            timestamp: self.ts,
            speed: self.speed,
            altitude: self.altitude,
        })
        .map_err(|source| StoreError::Corrupt {
            id: self.id,
            source,
        })?;
        Ok(StoredTelemetry {
            id: self.id,
            record,
            created_at: self.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, device_id, truck_id, latitude, longitude, temperature, \
                              humidity, ts, speed, altitude, created_at";

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the telemetry table and its read indexes if missing, so a
    /// fresh database serves the gateway without a separate migration step.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS telemetry (
                id uuid PRIMARY KEY,
                device_id text NOT NULL,
                truck_id text NOT NULL,
                latitude double precision NOT NULL,
                longitude double precision NOT NULL,
                temperature double precision NOT NULL,
                humidity double precision NOT NULL,
                ts timestamptz NOT NULL,
                speed double precision NULL,
                altitude double precision NULL,
                created_at timestamptz NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS telemetry_device_ts_idx ON telemetry (device_id, ts DESC)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS telemetry_truck_ts_idx ON telemetry (truck_id, ts DESC)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl TelemetryStore for PgTelemetryStore {
    async fn save(&self, record: &TelemetryRecord) -> Result<StoredTelemetry, StoreError> {
        let id = Uuid::new_v4();
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO telemetry (id, device_id, truck_id, latitude, longitude,
                                   temperature, humidity, ts, speed, altitude)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING created_at
            "#,
        )
        .bind(id)
        .bind(record.device_id())
        .bind(record.truck_id())
        .bind(record.latitude())
        .bind(record.longitude())
        .bind(record.temperature())
        .bind(record.humidity())
        .bind(record.timestamp())
        .bind(record.speed())
        .bind(record.altitude())
        .fetch_one(&self.pool)
        .await?;

        Ok(StoredTelemetry {
            id,
            record: record.clone(),
            created_at,
        })
    }

    async fn find_by_device_id(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredTelemetry>, StoreError> {
        let rows: Vec<TelemetryRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM telemetry WHERE device_id = $1 ORDER BY ts DESC LIMIT $2",
        ))
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TelemetryRow::into_stored).collect()
    }

    async fn find_by_truck_id(
        &self,
        truck_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredTelemetry>, StoreError> {
        let rows: Vec<TelemetryRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM telemetry WHERE truck_id = $1 ORDER BY ts DESC LIMIT $2",
        ))
        .bind(truck_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TelemetryRow::into_stored).collect()
    }

    async fn find_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredTelemetry>, StoreError> {
        let rows: Vec<TelemetryRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM telemetry WHERE ts >= $1 AND ts <= $2 ORDER BY ts DESC",
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TelemetryRow::into_stored).collect()
    }

    async fn latest_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<StoredTelemetry>, StoreError> {
        let row: Option<TelemetryRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM telemetry WHERE device_id = $1 ORDER BY ts DESC LIMIT 1",
        ))
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TelemetryRow::into_stored).transpose()
    }
}

use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// A domain bound violated while constructing a telemetry record. Every
/// variant's message names the offending field and its valid range so the
/// HTTP boundary can return it verbatim as a client error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("device id is required and cannot be empty")]
    DeviceIdRequired,
    #[error("truck id is required and cannot be empty")]
    TruckIdRequired,
    #[error("latitude must be between -90 and 90 degrees")]
    LatitudeOutOfRange,
    #[error("longitude must be between -180 and 180 degrees")]
    LongitudeOutOfRange,
    #[error("temperature must be between -40 and 40 degrees Celsius")]
    TemperatureOutOfRange,
    #[error("humidity must be between 0 and 100 percent")]
    HumidityOutOfRange,
    #[error("invalid timestamp format, expected an RFC 3339 datetime")]
    InvalidTimestamp,
    #[error("timestamp cannot be more than 60 seconds in the future")]
    TimestampInFuture,
    #[error("speed must be between 0 and 200 km/h")]
    SpeedOutOfRange,
    #[error("altitude must be between -500 and 9000 meters")]
    AltitudeOutOfRange,
}

#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("message bus is not connected")]
    NotConnected,
    #[error("message bus publish failed: {0}")]
    Publish(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("telemetry store query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("stored telemetry row {id} no longer satisfies domain bounds: {source}")]
    Corrupt { id: Uuid, source: ValidationError },
}

/// The only error type the HTTP boundary sees. Store errors never appear
/// here: persistence is fire-and-forget and its failures stop at the log.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to publish telemetry to the message bus: {0}")]
    Connectivity(#[from] BusError),
    #[error("unexpected ingestion failure: {0}")]
    Unexpected(String),
}

pub fn map_ingest_error(err: IngestError) -> (StatusCode, String) {
    match err {
        IngestError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
        IngestError::Connectivity(err) => {
            tracing::error!(error = %err, "message bus unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        IngestError::Unexpected(err) => {
            tracing::error!(error = %err, "unexpected ingest error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

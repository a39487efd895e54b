use crate::error::BusError;
use crate::telemetry::TelemetryRecord;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Event stream port consumed by the ingestion orchestrator.
///
/// `key` is the sole ordering/grouping hint and callers always pass the
/// device id, so downstream consumers observe one device's events in
/// emission order. A disconnected bus must fail a publish immediately
/// instead of hanging.
pub trait MessageBus: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    fn connect(&self) -> impl Future<Output = Result<(), BusError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), BusError>> + Send;

    fn publish(
        &self,
        record: &TelemetryRecord,
        key: &str,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Ordered multi-record send. Adapters with a native batch capability
    /// override this; the default publishes each record sequentially, keyed
    /// by its own device id, preserving input order.
    fn publish_batch(
        &self,
        records: &[TelemetryRecord],
    ) -> impl Future<Output = Result<(), BusError>> + Send {
        async move {
            for record in records {
                self.publish(record, record.device_id()).await?;
            }
            Ok(())
        }
    }
}

/// MQTT-backed bus. The partition key maps to the topic path
/// (`<prefix>/<device-id>/telemetry`); routing metadata for downstream
/// filters rides as envelope fields next to the canonical record, since
/// MQTT 3.1.1 has no user properties.
pub struct MqttMessageBus {
    client: AsyncClient,
    // Taken once by connect(); rumqttc reconnects inside the loop after that.
    eventloop: Mutex<Option<EventLoop>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    topic_prefix: String,
}

impl MqttMessageBus {
    pub fn new(
        client_id: &str,
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        topic_prefix: &str,
    ) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(10));
        if let (Some(username), Some(password)) = (username, password) {
            options.set_credentials(username, password);
        }
        let (client, eventloop) = AsyncClient::new(options, 256);
        Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            topic_prefix: topic_prefix.to_string(),
        }
    }

    async fn send(&self, record: &TelemetryRecord, key: &str) -> Result<(), BusError> {
        let topic = telemetry_topic(&self.topic_prefix, key);
        let payload = encode_event(record)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|err| BusError::Publish(err.to_string()))?;
        tracing::debug!(device_id = %key, "telemetry event published");
        Ok(())
    }
}

impl MessageBus for MqttMessageBus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Idempotent: the first call starts the event-loop task, later calls
    /// return immediately.
    async fn connect(&self) -> Result<(), BusError> {
        let eventloop = match self.eventloop.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(eventloop) = eventloop else {
            return Ok(());
        };
        let connected = self.connected.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(run_event_loop(eventloop, connected, shutdown));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.client
            .disconnect()
            .await
            .map_err(|err| BusError::Publish(err.to_string()))?;
        Ok(())
    }

    async fn publish(&self, record: &TelemetryRecord, key: &str) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        self.send(record, key).await
    }

    /// One connected check up front, then ordered sends over the single
    /// client session.
    async fn publish_batch(&self, records: &[TelemetryRecord]) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        for record in records {
            self.send(record, record.device_id()).await?;
        }
        tracing::debug!(count = records.len(), "telemetry batch published");
        Ok(())
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                connected.store(true, Ordering::Relaxed);
                tracing::info!("mqtt broker connected");
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                connected.store(false, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(err) => {
                connected.store(false, Ordering::Relaxed);
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                tracing::warn!(error = %err, "mqtt event loop error");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
    }
}

fn telemetry_topic(prefix: &str, key: &str) -> String {
    format!("{}/{}/telemetry", prefix, key)
}

fn encode_event(record: &TelemetryRecord) -> Result<Vec<u8>, BusError> {
    let envelope = json!({
        "event_type": "telemetry-ingested",
        "device_id": record.device_id(),
        "truck_id": record.truck_id(),
        "timestamp": record.timestamp().to_rfc3339(),
        "needs_alert": record.needs_alert(),
        "record": record.to_transport(),
    });
    serde_json::to_vec(&envelope).map_err(|err| BusError::Publish(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RawTelemetry;

    fn record(temperature: f64) -> TelemetryRecord {
        TelemetryRecord::from_raw(&RawTelemetry {
            device_id: "device-042".to_string(),
            truck_id: "truck-7".to_string(),
            latitude: 52.52,
            longitude: 13.405,
            temperature,
            humidity: 40.0,
            timestamp: Some("2025-03-01T12:00:00Z".to_string()),
            speed: None,
            altitude: None,
        })
        .expect("valid record")
    }

    #[test]
    fn topic_is_keyed_by_device() {
        assert_eq!(
            telemetry_topic("fleet", "device-042"),
            "fleet/device-042/telemetry"
        );
    }

    #[test]
    fn envelope_carries_filter_fields_and_canonical_record() {
        let payload = encode_event(&record(12.0)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["event_type"], "telemetry-ingested");
        assert_eq!(value["device_id"], "device-042");
        assert_eq!(value["truck_id"], "truck-7");
        assert_eq!(value["needs_alert"], true);
        assert_eq!(value["record"]["temperature"], 12.0);
        // Absent optionals stay off the wire entirely.
        assert!(value["record"].as_object().unwrap().get("speed").is_none());
    }

    #[test]
    fn envelope_alert_flag_tracks_the_record() {
        let payload = encode_event(&record(-5.0)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["needs_alert"], false);
    }

    #[tokio::test]
    async fn publish_fails_fast_when_disconnected() {
        let bus = MqttMessageBus::new("test-bus", "127.0.0.1", 1883, None, None, "fleet");
        let err = bus
            .publish(&record(0.0), "device-042")
            .await
            .expect_err("publish must fail");
        assert!(matches!(err, BusError::NotConnected));
    }

    #[tokio::test]
    async fn batch_publish_fails_fast_when_disconnected() {
        let bus = MqttMessageBus::new("test-bus-batch", "127.0.0.1", 1883, None, None, "fleet");
        let err = bus
            .publish_batch(&[record(0.0)])
            .await
            .expect_err("publish must fail");
        assert!(matches!(err, BusError::NotConnected));
    }
}

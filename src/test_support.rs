use crate::bus::MessageBus;
use crate::error::{BusError, StoreError};
use crate::store::{StoredTelemetry, TelemetryStore};
use crate::telemetry::TelemetryRecord;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Shared, ordered log of port interactions so tests can assert the
/// publish-before-persist sequencing across both mocks.
#[derive(Clone, Default)]
pub struct SharedEvents(Arc<Mutex<Vec<String>>>);

impl SharedEvents {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Waits until at least `count` events were recorded. The store side runs on
/// a detached task, so tests must wait rather than assert immediately.
pub async fn wait_for_events(events: &SharedEvents, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while events.len() < count {
        if tokio::time::Instant::now() > deadline {
            panic!(
                "timed out waiting for {count} events, saw {:?}",
                events.snapshot()
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Bus mock relying on the trait's default sequential `publish_batch`.
pub struct MockBus {
    connected: AtomicBool,
    fail_publish: bool,
    /// Publish keys in the order the bus saw them.
    pub published: Mutex<Vec<String>>,
    events: SharedEvents,
}

impl MockBus {
    pub fn connected(events: SharedEvents) -> Self {
        Self {
            connected: AtomicBool::new(true),
            fail_publish: false,
            published: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn disconnected(events: SharedEvents) -> Self {
        Self {
            connected: AtomicBool::new(false),
            ..Self::connected(events)
        }
    }

    pub fn failing(events: SharedEvents) -> Self {
        Self {
            fail_publish: true,
            ..Self::connected(events)
        }
    }
}

impl MessageBus for MockBus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn connect(&self) -> Result<(), BusError> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn publish(&self, _record: &TelemetryRecord, key: &str) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        if self.fail_publish {
            return Err(BusError::Publish("mock publish failure".to_string()));
        }
        self.published.lock().unwrap().push(key.to_string());
        self.events.push(format!("publish:{key}"));
        Ok(())
    }
}

/// Bus mock with a native batch send, for asserting the orchestrator makes
/// exactly one batch call against a capable adapter.
pub struct BatchMockBus {
    pub batch_calls: AtomicUsize,
    events: SharedEvents,
}

impl BatchMockBus {
    pub fn new(events: SharedEvents) -> Self {
        Self {
            batch_calls: AtomicUsize::new(0),
            events,
        }
    }
}

impl MessageBus for BatchMockBus {
    fn is_connected(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn publish(&self, _record: &TelemetryRecord, key: &str) -> Result<(), BusError> {
        self.events.push(format!("publish:{key}"));
        Ok(())
    }

    async fn publish_batch(&self, records: &[TelemetryRecord]) -> Result<(), BusError> {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        self.events.push(format!("publish_batch:{}", records.len()));
        Ok(())
    }
}

pub struct MockStore {
    fail_save: bool,
    pub saved: Mutex<Vec<TelemetryRecord>>,
    events: SharedEvents,
}

impl MockStore {
    pub fn new(events: SharedEvents) -> Self {
        Self {
            fail_save: false,
            saved: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn failing(events: SharedEvents) -> Self {
        Self {
            fail_save: true,
            ..Self::new(events)
        }
    }

    fn stored(record: &TelemetryRecord) -> StoredTelemetry {
        StoredTelemetry {
            id: Uuid::new_v4(),
            record: record.clone(),
            created_at: Utc::now(),
        }
    }

    fn sorted_newest_first(records: Vec<TelemetryRecord>) -> Vec<StoredTelemetry> {
        let mut stored: Vec<StoredTelemetry> = records.iter().map(Self::stored).collect();
        stored.sort_by_key(|entry| std::cmp::Reverse(entry.record.timestamp()));
        stored
    }
}

impl TelemetryStore for MockStore {
    async fn save(&self, record: &TelemetryRecord) -> Result<StoredTelemetry, StoreError> {
        if self.fail_save {
            self.events
                .push(format!("save-failed:{}", record.device_id()));
            return Err(StoreError::Query(sqlx::Error::PoolClosed));
        }
        self.saved.lock().unwrap().push(record.clone());
        self.events.push(format!("save:{}", record.device_id()));
        Ok(Self::stored(record))
    }

    async fn find_by_device_id(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredTelemetry>, StoreError> {
        let matches: Vec<TelemetryRecord> = self
            .saved
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.device_id() == device_id)
            .cloned()
            .collect();
        let mut stored = Self::sorted_newest_first(matches);
        stored.truncate(limit.max(0) as usize);
        Ok(stored)
    }

    async fn find_by_truck_id(
        &self,
        truck_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredTelemetry>, StoreError> {
        let matches: Vec<TelemetryRecord> = self
            .saved
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.truck_id() == truck_id)
            .cloned()
            .collect();
        let mut stored = Self::sorted_newest_first(matches);
        stored.truncate(limit.max(0) as usize);
        Ok(stored)
    }

    async fn find_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredTelemetry>, StoreError> {
        let matches: Vec<TelemetryRecord> = self
            .saved
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.timestamp() >= start && record.timestamp() <= end)
            .cloned()
            .collect();
        Ok(Self::sorted_newest_first(matches))
    }

    async fn latest_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<StoredTelemetry>, StoreError> {
        Ok(self
            .find_by_device_id(device_id, 1)
            .await?
            .into_iter()
            .next())
    }
}

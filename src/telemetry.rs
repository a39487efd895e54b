use crate::error::ValidationError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Devices with skewed clocks may stamp readings slightly ahead of us.
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 60;

const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);
// Operating envelope of a refrigerated trailer, not general weather.
const TEMPERATURE_RANGE: (f64, f64) = (-40.0, 40.0);
const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);
const SPEED_RANGE: (f64, f64) = (0.0, 200.0);
const ALTITUDE_RANGE: (f64, f64) = (-500.0, 9000.0);

// Safe range for refrigerated goods; outside it the reading is alert-worthy.
const TEMPERATURE_SAFE_RANGE: (f64, f64) = (-20.0, 5.0);
const HUMIDITY_ALERT_THRESHOLD: f64 = 80.0;

/// Raw ingestion input as it arrives at the HTTP boundary. The timestamp is
/// an optional RFC 3339 string; everything else is taken at face value until
/// [`TelemetryRecord::from_raw`] validates it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTelemetry {
    pub device_id: String,
    pub truck_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
}

/// Ingestion input with the timestamp already resolved to a concrete instant.
#[derive(Debug, Clone)]
pub struct TelemetryData {
    pub device_id: String,
    pub truck_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
    pub speed: Option<f64>,
    pub altitude: Option<f64>,
}

/// One validated sensor reading from a device on a truck.
///
/// An instance can only be obtained through [`TelemetryRecord::create`], so
/// every record that exists satisfies all domain bounds. Fields are private
/// and there are no mutators; an update means constructing a new record.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    device_id: String,
    truck_id: String,
    latitude: f64,
    longitude: f64,
    temperature: f64,
    humidity: f64,
    timestamp: DateTime<Utc>,
    speed: Option<f64>,
    altitude: Option<f64>,
}

/// Canonical wire form of a record: snake_case JSON, RFC 3339 timestamp,
/// optional fields omitted when absent. The bus and the store are both handed
/// this exact shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryTransport {
    pub device_id: String,
    pub truck_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl TelemetryRecord {
    /// Validates `data` and constructs a record. Checks run in a fixed order
    /// and the first violation wins; the error names the field and its range.
    pub fn create(data: TelemetryData) -> Result<Self, ValidationError> {
        if data.device_id.trim().is_empty() {
            return Err(ValidationError::DeviceIdRequired);
        }
        if data.truck_id.trim().is_empty() {
            return Err(ValidationError::TruckIdRequired);
        }
        if !in_range(data.latitude, LATITUDE_RANGE) {
            return Err(ValidationError::LatitudeOutOfRange);
        }
        if !in_range(data.longitude, LONGITUDE_RANGE) {
            return Err(ValidationError::LongitudeOutOfRange);
        }
        if !in_range(data.temperature, TEMPERATURE_RANGE) {
            return Err(ValidationError::TemperatureOutOfRange);
        }
        if !in_range(data.humidity, HUMIDITY_RANGE) {
            return Err(ValidationError::HumidityOutOfRange);
        }
        let horizon = Utc::now() + ChronoDuration::seconds(MAX_CLOCK_SKEW_SECONDS);
        if data.timestamp > horizon {
            return Err(ValidationError::TimestampInFuture);
        }
        if let Some(speed) = data.speed {
            if !in_range(speed, SPEED_RANGE) {
                return Err(ValidationError::SpeedOutOfRange);
            }
        }
        if let Some(altitude) = data.altitude {
            if !in_range(altitude, ALTITUDE_RANGE) {
                return Err(ValidationError::AltitudeOutOfRange);
            }
        }

        Ok(Self {
            device_id: data.device_id,
            truck_id: data.truck_id,
            latitude: data.latitude,
            longitude: data.longitude,
            temperature: data.temperature,
            humidity: data.humidity,
            timestamp: data.timestamp,
            speed: data.speed,
            altitude: data.altitude,
        })
    }

    /// Resolves the effective timestamp (supplied value if parseable, current
    /// time if absent) and validates the rest. An unparsable supplied
    /// timestamp is a validation failure, never silently replaced.
    pub fn from_raw(raw: &RawTelemetry) -> Result<Self, ValidationError> {
        let timestamp = match raw.timestamp.as_deref() {
            Some(value) => parse_timestamp(value)?,
            None => Utc::now(),
        };
        Self::create(TelemetryData {
            device_id: raw.device_id.clone(),
            truck_id: raw.truck_id.clone(),
            latitude: raw.latitude,
            longitude: raw.longitude,
            temperature: raw.temperature,
            humidity: raw.humidity,
            timestamp,
            speed: raw.speed,
            altitude: raw.altitude,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn truck_id(&self) -> &str {
        &self.truck_id
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn speed(&self) -> Option<f64> {
        self.speed
    }

    pub fn altitude(&self) -> Option<f64> {
        self.altitude
    }

    pub fn is_temperature_alert(&self) -> bool {
        self.temperature < TEMPERATURE_SAFE_RANGE.0 || self.temperature > TEMPERATURE_SAFE_RANGE.1
    }

    pub fn is_humidity_alert(&self) -> bool {
        self.humidity > HUMIDITY_ALERT_THRESHOLD
    }

    /// Evaluated on demand, never cached; the record is immutable so the
    /// answer cannot change.
    pub fn needs_alert(&self) -> bool {
        self.is_temperature_alert() || self.is_humidity_alert()
    }

    pub fn to_transport(&self) -> TelemetryTransport {
        TelemetryTransport {
            device_id: self.device_id.clone(),
            truck_id: self.truck_id.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            temperature: self.temperature,
            humidity: self.humidity,
            timestamp: self.timestamp.to_rfc3339(),
            speed: self.speed,
            altitude: self.altitude,
        }
    }
}

fn in_range(value: f64, range: (f64, f64)) -> bool {
    value >= range.0 && value <= range.1
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_raw() -> RawTelemetry {
        RawTelemetry {
            device_id: "device-001".to_string(),
            truck_id: "truck-001".to_string(),
            latitude: 13.7563,
            longitude: 100.5018,
            temperature: -5.0,
            humidity: 45.0,
            timestamp: None,
            speed: Some(60.0),
            altitude: Some(50.0),
        }
    }

    #[test]
    fn valid_input_round_trips_every_field() {
        let record = TelemetryRecord::from_raw(&valid_raw()).expect("valid record");
        assert_eq!(record.device_id(), "device-001");
        assert_eq!(record.truck_id(), "truck-001");
        assert_eq!(record.latitude(), 13.7563);
        assert_eq!(record.longitude(), 100.5018);
        assert_eq!(record.temperature(), -5.0);
        assert_eq!(record.humidity(), 45.0);
        assert_eq!(record.speed(), Some(60.0));
        assert_eq!(record.altitude(), Some(50.0));
    }

    #[test]
    fn timestamp_defaults_to_now_when_omitted() {
        let before = Utc::now();
        let record = TelemetryRecord::from_raw(&valid_raw()).expect("valid record");
        let after = Utc::now();
        assert!(record.timestamp() >= before);
        assert!(record.timestamp() <= after);
    }

    #[test]
    fn supplied_rfc3339_timestamp_is_kept() {
        let mut raw = valid_raw();
        raw.timestamp = Some("2025-12-18T10:00:00Z".to_string());
        let record = TelemetryRecord::from_raw(&raw).expect("valid record");
        assert_eq!(record.timestamp().to_rfc3339(), "2025-12-18T10:00:00+00:00");
    }

    #[test]
    fn unparsable_timestamp_is_rejected_not_replaced() {
        let mut raw = valid_raw();
        raw.timestamp = Some("yesterday at noon".to_string());
        assert_eq!(
            TelemetryRecord::from_raw(&raw),
            Err(ValidationError::InvalidTimestamp)
        );
    }

    #[test]
    fn timestamp_two_minutes_ahead_is_rejected() {
        let mut raw = valid_raw();
        raw.timestamp = Some((Utc::now() + ChronoDuration::seconds(120)).to_rfc3339());
        assert_eq!(
            TelemetryRecord::from_raw(&raw),
            Err(ValidationError::TimestampInFuture)
        );
    }

    #[test]
    fn timestamp_within_clock_skew_tolerance_is_accepted() {
        let mut raw = valid_raw();
        raw.timestamp = Some((Utc::now() + ChronoDuration::seconds(30)).to_rfc3339());
        assert!(TelemetryRecord::from_raw(&raw).is_ok());
    }

    #[test]
    fn each_violated_bound_names_its_field() {
        let cases = [
            (
                RawTelemetry {
                    device_id: "  ".to_string(),
                    ..valid_raw()
                },
                ValidationError::DeviceIdRequired,
                "device id",
            ),
            (
                RawTelemetry {
                    truck_id: String::new(),
                    ..valid_raw()
                },
                ValidationError::TruckIdRequired,
                "truck id",
            ),
            (
                RawTelemetry {
                    latitude: 100.0,
                    ..valid_raw()
                },
                ValidationError::LatitudeOutOfRange,
                "latitude",
            ),
            (
                RawTelemetry {
                    longitude: -190.0,
                    ..valid_raw()
                },
                ValidationError::LongitudeOutOfRange,
                "longitude",
            ),
            (
                RawTelemetry {
                    temperature: 50.0,
                    ..valid_raw()
                },
                ValidationError::TemperatureOutOfRange,
                "temperature",
            ),
            (
                RawTelemetry {
                    humidity: 150.0,
                    ..valid_raw()
                },
                ValidationError::HumidityOutOfRange,
                "humidity",
            ),
            (
                RawTelemetry {
                    speed: Some(250.0),
                    ..valid_raw()
                },
                ValidationError::SpeedOutOfRange,
                "speed",
            ),
            (
                RawTelemetry {
                    altitude: Some(10_000.0),
                    ..valid_raw()
                },
                ValidationError::AltitudeOutOfRange,
                "altitude",
            ),
        ];

        for (raw, expected, field) in cases {
            let err = TelemetryRecord::from_raw(&raw).expect_err("must be rejected");
            assert_eq!(err, expected);
            assert!(
                err.to_string().contains(field),
                "{err} does not name {field}"
            );
        }
    }

    #[test]
    fn first_violation_wins_when_several_fields_are_bad() {
        let raw = RawTelemetry {
            device_id: String::new(),
            latitude: 400.0,
            humidity: -3.0,
            ..valid_raw()
        };
        assert_eq!(
            TelemetryRecord::from_raw(&raw),
            Err(ValidationError::DeviceIdRequired)
        );
    }

    #[test]
    fn optional_fields_are_not_validated_when_absent() {
        let mut raw = valid_raw();
        raw.speed = None;
        raw.altitude = None;
        let record = TelemetryRecord::from_raw(&raw).expect("valid record");
        assert_eq!(record.speed(), None);
        assert_eq!(record.altitude(), None);
    }

    #[test]
    fn alert_truth_table() {
        let mut raw = valid_raw();
        raw.temperature = 10.0;
        raw.humidity = 45.0;
        let record = TelemetryRecord::from_raw(&raw).unwrap();
        assert!(record.is_temperature_alert());
        assert!(!record.is_humidity_alert());
        assert!(record.needs_alert());

        let mut raw = valid_raw();
        raw.temperature = -5.0;
        raw.humidity = 85.0;
        let record = TelemetryRecord::from_raw(&raw).unwrap();
        assert!(!record.is_temperature_alert());
        assert!(record.is_humidity_alert());
        assert!(record.needs_alert());

        let mut raw = valid_raw();
        raw.temperature = -5.0;
        raw.humidity = 45.0;
        let record = TelemetryRecord::from_raw(&raw).unwrap();
        assert!(!record.needs_alert());

        // Boundary values sit inside the safe range.
        let mut raw = valid_raw();
        raw.temperature = -20.0;
        raw.humidity = 80.0;
        let record = TelemetryRecord::from_raw(&raw).unwrap();
        assert!(!record.needs_alert());

        let mut raw = valid_raw();
        raw.temperature = 5.0;
        let record = TelemetryRecord::from_raw(&raw).unwrap();
        assert!(!record.is_temperature_alert());
    }

    #[test]
    fn transport_form_omits_absent_optionals() {
        let mut raw = valid_raw();
        raw.speed = None;
        raw.altitude = None;
        raw.timestamp = Some("2025-06-01T08:30:00Z".to_string());
        let record = TelemetryRecord::from_raw(&raw).unwrap();

        let value = serde_json::to_value(record.to_transport()).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("speed"));
        assert!(!object.contains_key("altitude"));
        assert_eq!(object["device_id"], "device-001");
        assert_eq!(object["timestamp"], "2025-06-01T08:30:00+00:00");
    }

    #[test]
    fn transport_form_keeps_present_optionals() {
        let record = TelemetryRecord::from_raw(&valid_raw()).unwrap();
        let value = serde_json::to_value(record.to_transport()).unwrap();
        assert_eq!(value["speed"], 60.0);
        assert_eq!(value["altitude"], 50.0);
    }
}

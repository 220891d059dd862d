use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::message_id::MessageId;

/// Key under which the correlation id is injected into raw payloads.
pub const MESSAGE_ID_KEY: &str = "message_id";

/// An inbound payload exactly as received, plus the injected `message_id`.
///
/// Any `message_id` already present in the payload is overwritten, so the
/// persisted raw object always carries the id it is stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    message_id: MessageId,
    fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new(mut fields: Map<String, Value>, message_id: MessageId) -> Self {
        fields.insert(
            MESSAGE_ID_KEY.to_owned(),
            Value::String(message_id.to_string()),
        );
        Self { message_id, fields }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatteryLevel {
    Low,
    Medium,
    High,
}

/// The normalized, fixed-shape form of a sensor reading. `None` is the
/// absent value: the source field was missing or could not be coerced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub message_id: MessageId,
    pub sensor_id: Option<String>,
    pub device_status: Option<DeviceStatus>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<i64>,
    pub battery: Option<BatteryLevel>,
    pub timestamp: Option<String>,
    pub location: Option<String>,
    pub signal_strength: Option<i64>,
    #[serde(serialize_with = "serialize_processed_at")]
    pub processed_at: OffsetDateTime,
}

/// The fields a record needs before it may reach the analytical sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CriticalField {
    SensorId,
    DeviceStatus,
    Temperature,
    Humidity,
    Pressure,
    Battery,
    Timestamp,
    Location,
    SignalStrength,
}

/// Every critical field, in reporting order.
pub const CRITICAL_FIELDS: [CriticalField; 9] = [
    CriticalField::SensorId,
    CriticalField::DeviceStatus,
    CriticalField::Temperature,
    CriticalField::Humidity,
    CriticalField::Pressure,
    CriticalField::Battery,
    CriticalField::Timestamp,
    CriticalField::Location,
    CriticalField::SignalStrength,
];

impl CriticalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriticalField::SensorId => "sensor_id",
            CriticalField::DeviceStatus => "device_status",
            CriticalField::Temperature => "temperature",
            CriticalField::Humidity => "humidity",
            CriticalField::Pressure => "pressure",
            CriticalField::Battery => "battery",
            CriticalField::Timestamp => "timestamp",
            CriticalField::Location => "location",
            CriticalField::SignalStrength => "signal_strength",
        }
    }

    /// Whether this field holds a value in `record`.
    pub fn is_present_in(&self, record: &CanonicalRecord) -> bool {
        match self {
            CriticalField::SensorId => record.sensor_id.is_some(),
            CriticalField::DeviceStatus => record.device_status.is_some(),
            CriticalField::Temperature => record.temperature.is_some(),
            CriticalField::Humidity => record.humidity.is_some(),
            CriticalField::Pressure => record.pressure.is_some(),
            CriticalField::Battery => record.battery.is_some(),
            CriticalField::Timestamp => record.timestamp.is_some(),
            CriticalField::Location => record.location.is_some(),
            CriticalField::SignalStrength => record.signal_strength.is_some(),
        }
    }
}

impl fmt::Display for CriticalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-width UTC with microseconds, so the text sorts like the instant.
pub fn format_processed_at(at: OffsetDateTime) -> Result<String, time::error::Format> {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
    );
    at.to_offset(time::UtcOffset::UTC).format(&format)
}

fn serialize_processed_at<S: Serializer>(
    at: &OffsetDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let formatted = format_processed_at(*at).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

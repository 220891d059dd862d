//! Field normalization from loosely typed device payloads to `CanonicalRecord`.
//!
//! Normalization is total. Devices drift in how they encode values (numbers
//! as strings, mixed-case enums, nulls), so every coercion below returns
//! `None` for anything it does not recognize and never fails the record.
use serde_json::Value;
use time::OffsetDateTime;

use crate::record::{BatteryLevel, CanonicalRecord, DeviceStatus, RawRecord};

/// Source keys as sent by devices.
pub mod source {
    pub const SENSOR_ID: &str = "sensorId";
    pub const DEVICE_STATUS: &str = "device_status";
    pub const TEMPERATURE: &str = "temp";
    pub const HUMIDITY: &str = "humidity";
    pub const PRESSURE: &str = "pressure";
    pub const BATTERY: &str = "battery";
    pub const TIMESTAMP: &str = "ts";
    pub const LOCATION: &str = "location";
    pub const SIGNAL: &str = "signal";
}

pub fn normalize(raw: &RawRecord, processed_at: OffsetDateTime) -> CanonicalRecord {
    CanonicalRecord {
        message_id: raw.message_id().clone(),
        sensor_id: passthrough(raw.get(source::SENSOR_ID)),
        device_status: normalize_status(raw.get(source::DEVICE_STATUS)),
        temperature: coerce_float(raw.get(source::TEMPERATURE)),
        humidity: coerce_float(raw.get(source::HUMIDITY)),
        pressure: coerce_int(raw.get(source::PRESSURE)),
        battery: normalize_battery(raw.get(source::BATTERY)),
        timestamp: passthrough(raw.get(source::TIMESTAMP)),
        location: passthrough(raw.get(source::LOCATION)),
        signal_strength: coerce_int(raw.get(source::SIGNAL)),
        processed_at,
    }
}

/// JSON numbers, or strings holding a finite decimal float.
pub fn coerce_float(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// JSON integers, JSON floats truncated toward zero, or strings holding a
/// base 10 integer. A string like `"1013.7"` is not an integer and yields
/// `None`.
pub fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Some(int);
            }
            if number.is_u64() {
                // Larger than i64::MAX
                return None;
            }
            let float = number.as_f64()?.trunc();
            if float.is_finite() && float >= i64::MIN as f64 && float < i64::MAX as f64 {
                Some(float as i64)
            } else {
                None
            }
        }
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn normalize_status(value: Option<&Value>) -> Option<DeviceStatus> {
    let status = value?.as_str()?.trim().to_ascii_lowercase();
    match status.as_str() {
        "ok" | "good" | "healthy" | "available" => Some(DeviceStatus::Ok),
        "warning" => Some(DeviceStatus::Warning),
        "error" => Some(DeviceStatus::Error),
        _ => None,
    }
}

pub fn normalize_battery(value: Option<&Value>) -> Option<BatteryLevel> {
    let level = value?.as_str()?.trim().to_ascii_lowercase();
    match level.as_str() {
        "low" => Some(BatteryLevel::Low),
        "med" | "medium" => Some(BatteryLevel::Medium),
        "high" => Some(BatteryLevel::High),
        _ => None,
    }
}

/// Strings are copied verbatim unless empty. Numbers keep their JSON text.
pub fn passthrough(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::message_id::MessageId;

    fn raw(payload: Value) -> RawRecord {
        let fields = payload.as_object().cloned().unwrap();
        RawRecord::new(fields, MessageId::from_words(["amber", "falcon", "river"]))
    }

    #[test]
    fn normalizes_well_formed_payload() {
        let now = datetime!(2024-05-01 12:00:00 UTC);
        let record = normalize(
            &raw(json!({
                "sensorId": "T-001",
                "device_status": "Healthy",
                "temp": "21.50",
                "humidity": 45,
                "pressure": "1013",
                "battery": "MED",
                "ts": "2024/05/01 11:59:58",
                "location": "LDS-01",
                "signal": "-70"
            })),
            now,
        );

        assert_eq!(record.message_id.as_str(), "amber-falcon-river");
        assert_eq!(record.sensor_id.as_deref(), Some("T-001"));
        assert_eq!(record.device_status, Some(DeviceStatus::Ok));
        assert_eq!(record.temperature, Some(21.5));
        assert_eq!(record.humidity, Some(45.0));
        assert_eq!(record.pressure, Some(1013));
        assert_eq!(record.battery, Some(BatteryLevel::Medium));
        assert_eq!(record.timestamp.as_deref(), Some("2024/05/01 11:59:58"));
        assert_eq!(record.location.as_deref(), Some("LDS-01"));
        assert_eq!(record.signal_strength, Some(-70));
        assert_eq!(record.processed_at, now);
    }

    #[test]
    fn empty_payload_is_all_absent() {
        let now = datetime!(2024-05-01 12:00:00 UTC);
        let record = normalize(&raw(json!({})), now);

        assert_eq!(record.sensor_id, None);
        assert_eq!(record.device_status, None);
        assert_eq!(record.temperature, None);
        assert_eq!(record.humidity, None);
        assert_eq!(record.pressure, None);
        assert_eq!(record.battery, None);
        assert_eq!(record.timestamp, None);
        assert_eq!(record.location, None);
        assert_eq!(record.signal_strength, None);
        assert_eq!(record.processed_at, now);
    }

    #[test]
    fn status_synonyms() {
        let cases = [
            (json!("ok"), Some(DeviceStatus::Ok)),
            (json!("Healthy"), Some(DeviceStatus::Ok)),
            (json!("GOOD"), Some(DeviceStatus::Ok)),
            (json!(" available "), Some(DeviceStatus::Ok)),
            (json!("Warning"), Some(DeviceStatus::Warning)),
            (json!("ERROR"), Some(DeviceStatus::Error)),
            (json!("OK!"), None),
            (json!("bad"), None),
            (json!("warn"), None),
            (json!(""), None),
            (json!(1), None),
            (Value::Null, None),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_status(Some(&input)), expected, "input {input}");
        }
        assert_eq!(normalize_status(None), None);
    }

    #[test]
    fn battery_levels() {
        let cases = [
            (json!("Low"), Some(BatteryLevel::Low)),
            (json!("MED"), Some(BatteryLevel::Medium)),
            (json!("medium"), Some(BatteryLevel::Medium)),
            (json!("HIGH"), Some(BatteryLevel::High)),
            (json!("extreme"), None),
            (json!("mid"), None),
            (json!(true), None),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_battery(Some(&input)), expected, "input {input}");
        }
    }

    #[test]
    fn float_coercion() {
        assert_eq!(coerce_float(Some(&json!("12.5"))), Some(12.5));
        assert_eq!(coerce_float(Some(&json!(" 12.5 "))), Some(12.5));
        assert_eq!(coerce_float(Some(&json!(12))), Some(12.0));
        assert_eq!(coerce_float(Some(&json!(-3.25))), Some(-3.25));
        assert_eq!(coerce_float(Some(&Value::Null)), None);
        assert_eq!(coerce_float(None), None);
        assert_eq!(coerce_float(Some(&json!("abc"))), None);
        assert_eq!(coerce_float(Some(&json!("NaN"))), None);
        assert_eq!(coerce_float(Some(&json!("inf"))), None);
        assert_eq!(coerce_float(Some(&json!(false))), None);
        assert_eq!(coerce_float(Some(&json!([1.0]))), None);
    }

    #[test]
    fn int_coercion() {
        assert_eq!(coerce_int(Some(&json!("1013"))), Some(1013));
        assert_eq!(coerce_int(Some(&json!(" -70 "))), Some(-70));
        assert_eq!(coerce_int(Some(&json!(1013))), Some(1013));
        assert_eq!(coerce_int(Some(&json!(1013.7))), Some(1013));
        assert_eq!(coerce_int(Some(&json!(-1013.7))), Some(-1013));
        assert_eq!(coerce_int(Some(&json!("1013.7"))), None);
        assert_eq!(coerce_int(Some(&json!("abc"))), None);
        assert_eq!(coerce_int(Some(&json!(u64::MAX))), None);
        assert_eq!(coerce_int(Some(&json!(1e300))), None);
        assert_eq!(coerce_int(Some(&Value::Null)), None);
        assert_eq!(coerce_int(None), None);
    }

    #[test]
    fn passthrough_fields() {
        assert_eq!(
            passthrough(Some(&json!("2024/05/01 12:00:00"))).as_deref(),
            Some("2024/05/01 12:00:00")
        );
        assert_eq!(passthrough(Some(&json!(" LDS-01"))).as_deref(), Some(" LDS-01"));
        assert_eq!(passthrough(Some(&json!(1714564800))).as_deref(), Some("1714564800"));
        assert_eq!(passthrough(Some(&json!(""))), None);
        assert_eq!(passthrough(Some(&Value::Null)), None);
        assert_eq!(passthrough(Some(&json!({"lat": 1}))), None);
        assert_eq!(passthrough(None), None);
    }

    #[test]
    fn wrong_types_are_absent() {
        let now = datetime!(2024-05-01 12:00:00 UTC);
        let record = normalize(
            &raw(json!({
                "sensorId": ["T-001"],
                "device_status": {"state": "ok"},
                "temp": true,
                "humidity": "humid",
                "pressure": null,
                "battery": 3,
                "ts": false,
                "location": null,
                "signal": "strong"
            })),
            now,
        );

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "message_id": "amber-falcon-river",
                "sensor_id": null,
                "device_status": null,
                "temperature": null,
                "humidity": null,
                "pressure": null,
                "battery": null,
                "timestamp": null,
                "location": null,
                "signal_strength": null,
                "processed_at": "2024-05-01T12:00:00.000000Z"
            })
        );
    }
}

//! Synthetic sensor payloads with the encoding drift seen from real devices:
//! mixed-case and unmatched statuses, numbers sent as strings, missing values.
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use time::macros::format_description;
use time::OffsetDateTime;

const SENSOR_IDS: &[&str] = &[
    "T-001", "T-002", "T-003", "H-009", "H-010", "H-011", "P-221", "P-222",
];

// "OK!" is deliberately outside every synonym set.
const STATUSES: &[&str] = &[
    "OK", "ok", "Ok", "OK!", "Good", "GOOD", "Healthy", "Available", "ERROR", "WARNING",
];

const BATTERIES: &[&str] = &["low", "LOW", "Low", "med", "MED", "medium", "HIGH", "high"];

const LOCATIONS: &[Option<&str>] = &[
    Some("BRAD-1"),
    Some("BRAD-2"),
    Some("BRAD-3"),
    Some("LDS-01"),
    Some("LDS-02"),
    Some("LDS-03"),
    Some("MAN-01"),
    Some("MAN-02"),
    Some("MAN-03"),
    None,
];

fn pick<'a, R: Rng + ?Sized, T>(rng: &mut R, choices: &'a [T]) -> &'a T {
    // Every table above is non-empty.
    &choices[rng.gen_range(0..choices.len())]
}

fn temperature<R: Rng + ?Sized>(rng: &mut R) -> Value {
    let text = match rng.gen_range(0..3) {
        0 => format!("{:.2}", rng.gen_range(5.0..40.0)),
        1 => format!("{:.1}", rng.gen_range(10.0..35.0)),
        _ => format!("{:.1}", rng.gen_range(0.0f64..50.0).round()),
    };
    Value::String(text)
}

fn humidity<R: Rng + ?Sized>(rng: &mut R) -> Value {
    let choices = [
        json!("40"),
        json!("42"),
        json!("44"),
        json!("45"),
        json!("50"),
        json!(44),
        json!(46),
        json!(48),
        Value::Null,
    ];
    choices.choose(rng).cloned().unwrap_or(Value::Null)
}

fn pressure<R: Rng + ?Sized>(rng: &mut R) -> Value {
    if rng.gen_bool(0.5) {
        Value::String(rng.gen_range(850..=1150).to_string())
    } else {
        Value::Null
    }
}

fn signal<R: Rng + ?Sized>(rng: &mut R) -> Value {
    let choices = [
        json!("55"),
        json!("60"),
        json!("65"),
        json!("70"),
        json!("75"),
        json!("80"),
        json!("90"),
        json!(65),
        json!(75),
    ];
    choices.choose(rng).cloned().unwrap_or(Value::Null)
}

/// Device-style timestamp, `YYYY/MM/DD HH:MM:SS`, rather than ISO 8601.
pub fn device_timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year]/[month]/[day] [hour]:[minute]:[second]");
    at.format(&format).unwrap_or_default()
}

/// One raw payload with the nine keys devices send.
pub fn generate_raw_message<R: Rng + ?Sized>(rng: &mut R, now: OffsetDateTime) -> Value {
    json!({
        "sensorId": pick(rng, SENSOR_IDS),
        "device_status": pick(rng, STATUSES),
        "temp": temperature(rng),
        "humidity": humidity(rng),
        "pressure": pressure(rng),
        "battery": pick(rng, BATTERIES),
        "ts": device_timestamp(now),
        "location": pick(rng, LOCATIONS),
        "signal": signal(rng),
    })
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn messages_carry_every_source_key() {
        let mut rng = StdRng::seed_from_u64(7);
        let now = datetime!(2024-05-01 12:00:00 UTC);

        for _ in 0..500 {
            let message = generate_raw_message(&mut rng, now);
            let fields = message.as_object().unwrap();
            for key in [
                "sensorId",
                "device_status",
                "temp",
                "humidity",
                "pressure",
                "battery",
                "ts",
                "location",
                "signal",
            ] {
                assert!(fields.contains_key(key), "{key} missing from {message}");
            }
            assert_eq!(fields["ts"], json!("2024/05/01 12:00:00"));
            assert!(fields["temp"].is_string());
        }
    }

    #[test]
    fn drift_shows_up() {
        let mut rng = StdRng::seed_from_u64(11);
        let now = datetime!(2024-05-01 12:00:00 UTC);
        let messages: Vec<Value> = (0..1000)
            .map(|_| generate_raw_message(&mut rng, now))
            .collect();

        assert!(messages.iter().any(|m| m["location"].is_null()));
        assert!(messages.iter().any(|m| m["pressure"].is_null()));
        assert!(messages.iter().any(|m| m["humidity"].is_number()));
        assert!(messages.iter().any(|m| m["humidity"].is_string()));
        assert!(messages.iter().any(|m| m["device_status"] == json!("OK!")));
    }
}

use crate::record::{CanonicalRecord, CriticalField, CRITICAL_FIELDS};

/// A record may reach the analytical sink only when every critical field holds a value.
pub fn is_complete(record: &CanonicalRecord) -> bool {
    CRITICAL_FIELDS
        .iter()
        .all(|field| field.is_present_in(record))
}

/// The absent critical fields, in `CRITICAL_FIELDS` order. Empty when complete.
pub fn missing_fields(record: &CanonicalRecord) -> Vec<CriticalField> {
    CRITICAL_FIELDS
        .iter()
        .filter(|field| !field.is_present_in(record))
        .copied()
        .collect()
}

//! Persisted usage record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Usage count plus first/last use timestamps for one identity
///
/// Stored as JSON: `{"count":2,"firstUsed":"...","lastUsed":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    #[serde(default)]
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_used: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl UsageRecord {
    /// Decode a stored value, treating anything unparseable as absent
    pub fn decode(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Malformed usage record ({} bytes), treating as absent: {}", raw.len(), e);
                None
            }
        }
    }

    pub fn encode(&self) -> String {
        // Plain struct of integers and timestamps; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Record after one more use at `now`
    pub fn next(prev: Option<&UsageRecord>, now: DateTime<Utc>) -> Self {
        let count = prev.map(|r| r.count).unwrap_or(0).saturating_add(1);
        let first_used = prev.and_then(|r| r.first_used).unwrap_or(now);
        Self {
            count,
            first_used: Some(first_used),
            last_used: Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_camel_case() {
        let raw = r#"{"count":2,"firstUsed":"2024-03-01T01:00:00Z","lastUsed":"2024-03-01T02:00:00.000Z"}"#;
        let record = UsageRecord::decode(raw).unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.first_used, Some(at(1)));
        assert_eq!(record.last_used, Some(at(2)));
    }

    #[test]
    fn test_decode_missing_fields_default() {
        let record = UsageRecord::decode("{}").unwrap();
        assert_eq!(record.count, 0);
        assert!(record.first_used.is_none());
    }

    #[test]
    fn test_decode_malformed_is_absent() {
        assert!(UsageRecord::decode("not json").is_none());
        assert!(UsageRecord::decode(r#"{"count":"three"}"#).is_none());
        assert!(UsageRecord::decode(r#"{"count":-1}"#).is_none());
        assert!(UsageRecord::decode(r#"{"count":1"#).is_none());
    }

    #[test]
    fn test_next_from_nothing() {
        let record = UsageRecord::next(None, at(5));
        assert_eq!(record.count, 1);
        assert_eq!(record.first_used, Some(at(5)));
        assert_eq!(record.last_used, Some(at(5)));
    }

    #[test]
    fn test_next_preserves_first_used() {
        let prev = UsageRecord::next(None, at(1));
        let record = UsageRecord::next(Some(&prev), at(3));
        assert_eq!(record.count, 2);
        assert_eq!(record.first_used, Some(at(1)));
        assert_eq!(record.last_used, Some(at(3)));
    }

    #[test]
    fn test_encode_uses_stored_field_names() {
        let encoded = UsageRecord::next(None, at(1)).encode();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["count"], 1);
        assert!(value["firstUsed"].is_string());
        assert!(value["lastUsed"].is_string());
    }
}

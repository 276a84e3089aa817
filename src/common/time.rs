//! Timestamp wrapper used across API metadata.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Timestamp is a wrapper around `DateTime<Utc>` representing a timestamp in
/// RFC3339 format, e.g. "2024-01-15T10:00:00Z". Kubernetes timestamps are
/// serialized with second precision and a literal `Z` suffix.
#[derive(Clone, Debug, Eq)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// The current time, truncated to second precision.
    pub fn now() -> Self {
        // sub-second precision never survives a serialization round-trip
        let now = Utc::now();
        Self::from_str(&now.to_rfc3339_opts(SecondsFormat::Secs, true)).unwrap_or(Self(now))
    }

    /// Parses an RFC3339 formatted string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, chrono::ParseError> {
        Ok(Self(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc)))
    }

    /// The timestamp as an RFC3339 formatted string with a 'Z' suffix.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.0.timestamp() == other.0.timestamp()
    }
}

impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.timestamp().hash(state);
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = Timestamp::from_str("2024-01-15T10:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-15T10:00:00Z");
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2024-01-15T10:00:00Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_now_is_second_precision() {
        let ts = Timestamp::now();
        let back = Timestamp::from_str(&ts.to_rfc3339()).unwrap();
        assert_eq!(back, ts);
    }
}

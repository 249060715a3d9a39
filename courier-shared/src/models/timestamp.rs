use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Transparent wrapper around a UTC timestamp used by all wire models.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, ToSchema)]
#[serde(transparent)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Current UTC time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serializes_transparently() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap();
        let serialized = serde_json::to_string(&Timestamp(dt)).unwrap();
        assert_eq!(serialized, serde_json::to_string(&dt).unwrap());
    }

    #[test]
    fn orders_chronologically() {
        let earlier = Timestamp(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let later = Timestamp(Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap());
        assert!(earlier < later);
    }
}

//! Ledger and outbox records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Result Cache contents: index text to value text.
pub type ResultMap = BTreeMap<String, String>;

/// Result Cache value meaning "accepted, not yet computed".
pub const PLACEHOLDER: &str = "Nothing yet!";

/// One distinct index ever requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LedgerEntry {
    /// Surrogate key assigned by the ledger.
    pub id: i64,
    pub number: u32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub created_at: Timestamp,
}

/// A job recorded alongside a ledger entry, waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxJob {
    pub id: i64,
    pub number: u32,
    pub created_at: Timestamp,
    pub dispatched_at: Option<Timestamp>,
}

#[cfg(all(test, feature = "openapi"))]
mod tests {
    use super::*;
    use utoipa::PartialSchema;

    #[test]
    fn test_ledger_entry_schema_timestamp_is_datetime_string() {
        let schema = serde_json::to_value(LedgerEntry::schema()).unwrap();
        let created_at = &schema["properties"]["created_at"];
        assert_eq!(created_at["type"], "string");
        assert_eq!(created_at["format"], "date-time");
    }
}

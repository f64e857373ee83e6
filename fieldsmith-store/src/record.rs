//! Per-user records and the record store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// One user's persisted field values.
///
/// Created lazily on first access; fields the user has never submitted are
/// simply absent from `values`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub user_id: String,
    #[serde(default)]
    pub values: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// An empty record for a user with no persisted values yet.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            values: Map::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn get(&self, field_slug: &str) -> Option<&Value> {
        self.values.get(field_slug)
    }
}

/// Persistence contract for user records.
///
/// `write` reports the number of affected rows; zero signals a write the
/// backend acknowledged but did not apply, which voids the submission.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn read(&self, user_id: &str) -> Result<Option<UserRecord>>;
    async fn write(&self, record: &UserRecord) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_json_round_trip() {
        let mut record = UserRecord::new("u1");
        record.values.insert("bio".into(), json!("hello"));
        record.values.insert("phones".into(), json!(["a", "b"]));

        let text = serde_json::to_string_pretty(&record).unwrap();
        let parsed: UserRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(record, parsed);
    }

    #[test]
    fn missing_values_default_to_empty() {
        let parsed: UserRecord = serde_json::from_str(
            r#"{"user_id":"u1","updated_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(parsed.values.is_empty());
        assert!(parsed.get("bio").is_none());
    }
}

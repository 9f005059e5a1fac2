//! Remote backup object metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MIME type of every uploaded backup object.
pub const BACKUP_MIME_TYPE: &str = "application/octet-stream";

/// MIME type providers use to mark folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Identifies one remote backup object.
///
/// Created by a [`crate::CloudStorageClient`] on upload and read-only
/// everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    /// Provider-assigned object id.
    pub id: String,
    /// Object name inside the backup folder.
    pub name: String,
    /// When the provider created the object.
    pub created_time: DateTime<Utc>,
    /// Object size in bytes.
    pub size_bytes: i64,
}

/// Returns the entry with the greatest `created_time`.
///
/// Ties are broken by name so the choice does not depend on listing order.
pub fn select_latest(entries: &[BackupMetadata]) -> Option<&BackupMetadata> {
    entries
        .iter()
        .max_by(|a, b| (a.created_time, &a.name).cmp(&(b.created_time, &b.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn entry(id: &str, secs: i64) -> BackupMetadata {
        BackupMetadata {
            id: id.to_string(),
            name: format!("{id}.db"),
            created_time: Utc.timestamp_opt(secs, 0).unwrap(),
            size_bytes: 10,
        }
    }

    #[test]
    fn select_latest_of_empty_is_none() {
        assert!(select_latest(&[]).is_none());
    }

    #[test]
    fn select_latest_picks_newest() {
        let entries = vec![entry("a", 100), entry("c", 300), entry("b", 200)];
        assert_eq!(select_latest(&entries).unwrap().id, "c");
    }

    #[test]
    fn metadata_serializes_camel_case() {
        let json = serde_json::to_value(entry("x", 0)).unwrap();
        assert!(json.get("createdTime").is_some());
        assert!(json.get("sizeBytes").is_some());
    }

    proptest! {
        #[test]
        fn latest_is_never_dominated(
            stamps in proptest::collection::hash_set(0i64..4_000_000_000, 2..32)
        ) {
            let entries: Vec<_> = stamps
                .iter()
                .enumerate()
                .map(|(i, secs)| entry(&format!("id{i}"), *secs))
                .collect();
            let chosen = select_latest(&entries).unwrap();
            for other in &entries {
                prop_assert!(other.created_time <= chosen.created_time);
            }
        }
    }
}

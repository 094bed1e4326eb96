//! Repository snapshots and their storage encoding.

pub mod codec;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use codec::{AttributeValue, Item, ValidationError, from_item, require_str, to_item};

/// Point-in-time view of a tracked GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RepositorySnapshot {
    /// `owner/repo`, unique across the store
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: u64,
    pub forks: u64,
    pub subscribers_count: u64,
    pub open_issues_count: u64,
    /// RFC 3339 creation time as reported upstream
    pub created_at: String,
    /// RFC 3339 time of the last upstream update; drives change detection
    pub last_updated: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl RepositorySnapshot {
    pub fn to_item(&self) -> Result<Item, ValidationError> {
        to_item(self)
    }

    pub fn from_item(item: &Item) -> Result<Self, ValidationError> {
        from_item(item)
    }

    /// Parsed `last_updated` timestamp.
    pub fn last_updated_at(&self) -> Result<DateTime<FixedOffset>, ValidationError> {
        DateTime::parse_from_rfc3339(&self.last_updated).map_err(|_| {
            ValidationError::InvalidTimestamp {
                field: "last_updated".to_string(),
                value: self.last_updated.clone(),
            }
        })
    }
}

/// Checks that a name has the `owner/repo` form GitHub uses.
pub fn is_valid_full_name(full_name: &str) -> bool {
    let mut parts = full_name.split('/');
    let (Some(owner), Some(repo), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    let valid_segment = |segment: &str| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };

    valid_segment(owner) && valid_segment(repo)
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_round_trips_through_storage_encoding() {
        let snapshot = fixtures::snapshot("acme/widget", "2024-05-01T10:00:00Z");
        let item = snapshot.to_item().unwrap();

        assert_eq!(item.get("stars"), Some(&AttributeValue::N("500".into())));
        assert_eq!(item.get("avatar_url"), Some(&AttributeValue::Null(true)));
        assert_eq!(RepositorySnapshot::from_item(&item).unwrap(), snapshot);
    }

    #[test]
    fn subscribers_count_is_stored_as_a_number() {
        let item = fixtures::snapshot("acme/widget", "2024-05-01T10:00:00Z")
            .to_item()
            .unwrap();
        assert_eq!(
            serde_json::to_value(item.get("subscribers_count")).unwrap(),
            json!({ "N": "20" })
        );
    }

    #[test]
    fn last_updated_must_be_rfc3339() {
        let snapshot = fixtures::snapshot("acme/widget", "yesterday");
        assert!(matches!(
            snapshot.last_updated_at(),
            Err(ValidationError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn full_name_validation() {
        assert!(is_valid_full_name("rust-lang/rust"));
        assert!(is_valid_full_name("a.b/c_d"));
        assert!(!is_valid_full_name("rust-lang"));
        assert!(!is_valid_full_name("rust-lang/rust/extra"));
        assert!(!is_valid_full_name("/rust"));
        assert!(!is_valid_full_name("owner/.."));
        assert!(!is_valid_full_name("owner/re po"));
    }
}

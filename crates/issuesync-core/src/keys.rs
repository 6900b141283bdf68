//! Destination key reservation.
//!
//! Replicated issues must land on the destination under the same key
//! number as their upstream original. The destination assigns keys
//! sequentially, so the gap between the destination's current highest
//! key and the required upstream number is filled with placeholder
//! issues created through the bulk endpoint. Placeholders are later
//! overwritten by the regular update path when their upstream
//! counterpart syncs.

use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::Mutex;
use tracing::{info, warn};

use issuesync_client::TrackerClient;
use issuesync_types::config::Project;
use issuesync_types::rest::{key_number, Fields, Issue, IssueBulk, ProjectRef, SimpleObject};

use crate::error::SyncError;

pub const PLACEHOLDER_SUMMARY: &str = "Sync issue placeholder";
const PLACEHOLDER_DESCRIPTION: &str =
    "This is a placeholder issue. It will be updated at a later point in time. DO NOT EDIT.";

/// Highest destination key not yet observed.
const UNSEEDED: i64 = i64::MIN;
/// Seeding the counter from the destination failed; any required key
/// triggers reservation until a bulk response tells us where we are.
const SEED_FAILED: i64 = -1;

pub struct KeyAllocator {
    project_name: String,
    /// Destination key prefix including the dash, e.g. `WIDGET-`.
    prefix: String,
    destination_project_id: String,
    placeholder: Issue,
    batch_size: usize,
    max_key: AtomicI64,
    /// Serializes seeding and bulk creation so concurrent events for
    /// the same project never over-allocate.
    reserve_lock: Mutex<()>,
}

impl KeyAllocator {
    pub fn new(
        project_name: &str,
        project: &Project,
        default_issue_type: Option<&str>,
        batch_size: usize,
    ) -> Self {
        let placeholder = Issue {
            fields: Fields {
                summary: Some(PLACEHOLDER_SUMMARY.to_string()),
                description: Some(PLACEHOLDER_DESCRIPTION.to_string()),
                project: Some(ProjectRef {
                    id: Some(project.project_id.clone()),
                    key: None,
                }),
                issuetype: default_issue_type.map(SimpleObject::with_id),
                ..Fields::default()
            },
            ..Issue::default()
        };
        Self {
            project_name: project_name.to_string(),
            prefix: format!("{}-", project.project_key),
            destination_project_id: project.project_id.clone(),
            placeholder,
            batch_size: batch_size.max(1),
            max_key: AtomicI64::new(UNSEEDED),
            reserve_lock: Mutex::new(()),
        }
    }

    /// Folds an observed destination key into the counter. Keys of other
    /// projects are ignored.
    pub fn record_key(&self, key: &str) {
        if !key.starts_with(&self.prefix) {
            return;
        }
        if let Some(number) = key_number(key) {
            self.max_key.fetch_max(number, Ordering::SeqCst);
        }
    }

    /// Highest key number known to exist on the destination, if the
    /// counter has been seeded.
    pub fn current(&self) -> Option<i64> {
        match self.max_key.load(Ordering::SeqCst) {
            UNSEEDED | SEED_FAILED => None,
            value => Some(value),
        }
    }

    /// Ensures a destination record exists for `up_to_key`, creating
    /// placeholder batches as needed. Keys with a different project
    /// prefix are a no-op; so are non-positive key numbers.
    pub async fn reserve_through(
        &self,
        destination: &TrackerClient,
        up_to_key: &str,
    ) -> Result<(), SyncError> {
        let Some(required) = up_to_key
            .strip_prefix(&self.prefix)
            .and_then(|suffix| suffix.parse::<i64>().ok())
        else {
            return Ok(());
        };
        if required <= 0 {
            return Ok(());
        }
        if self.satisfied(required) {
            return Ok(());
        }

        let _guard = self.reserve_lock.lock().await;
        self.seed(destination).await;
        while !self.satisfied(required) {
            let bulk = IssueBulk::replicated(self.placeholder.clone(), self.batch_size);
            let response = destination.bulk_create(&bulk).await?;
            let Some(created_max) = response.max_key_number() else {
                // every entry failed; bail out rather than loop forever
                return Err(SyncError::MalformedEvent(format!(
                    "bulk placeholder creation for {} returned no keys",
                    self.project_name
                )));
            };
            self.max_key.fetch_max(created_max, Ordering::SeqCst);
            info!(
                project = %self.project_name,
                current = created_max,
                required,
                "created placeholder batch"
            );
        }
        Ok(())
    }

    fn satisfied(&self, required: i64) -> bool {
        let current = self.max_key.load(Ordering::SeqCst);
        current != UNSEEDED && current != SEED_FAILED && current >= required
    }

    /// Primes the counter from the destination's most recent issue.
    /// Called under the reservation lock.
    async fn seed(&self, destination: &TrackerClient) {
        if self.max_key.load(Ordering::SeqCst) != UNSEEDED {
            return;
        }
        let query = format!(
            "project = {} ORDER BY created DESC",
            self.destination_project_id
        );
        let seeded = match destination.search(&query, 0, 1).await {
            Ok(issues) => issues
                .issues
                .first()
                .and_then(Issue::key_number)
                .unwrap_or(0),
            Err(error) => {
                warn!(project = %self.project_name, %error,
                    "could not determine the latest destination key number");
                SEED_FAILED
            }
        };
        self.max_key.fetch_max(seeded, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project {
            project_id: "12345".to_string(),
            project_key: "WIDGET".to_string(),
            original_project_key: "UPWIDGET".to_string(),
        }
    }

    fn allocator() -> KeyAllocator {
        KeyAllocator::new("WIDGET", &project(), Some("10001"), 25)
    }

    #[test]
    fn records_only_matching_prefix() {
        let keys = allocator();
        keys.record_key("OTHER-500");
        assert_eq!(keys.current(), None);
        keys.record_key("WIDGET-7");
        assert_eq!(keys.current(), Some(7));
        keys.record_key("WIDGET-3");
        assert_eq!(keys.current(), Some(7));
    }

    #[test]
    fn placeholder_template_is_minimal() {
        let keys = allocator();
        let json = serde_json::to_value(&keys.placeholder).unwrap();
        assert_eq!(json["fields"]["summary"], PLACEHOLDER_SUMMARY);
        assert_eq!(json["fields"]["project"]["id"], "12345");
        assert_eq!(json["fields"]["issuetype"]["id"], "10001");
        assert!(json["fields"].get("assignee").is_none());
        assert!(json["fields"].get("reporter").is_none());
        assert!(json["fields"].get("priority").is_none());
    }
}

//! Field value translation between the two instances.
//!
//! Priorities, issue types and link types carry instance-local ids;
//! statuses are keyed by name since the destination only accepts them
//! through transitions. A statically configured mapping always wins;
//! when the config table is empty, both instances are asked to
//! enumerate their values once and entries are matched by name. Either
//! way the resulting table is memoized for the lifetime of the group
//! context, so at most one pair of enumeration calls is made per kind.
//!
//! Users are never enumerated: only the statically mapped subset is
//! translated, everything else falls back to the service account.

use std::collections::HashMap;

use tokio::sync::OnceCell;

use issuesync_client::{RestError, TrackerClient};
use issuesync_types::config::{ProjectGroup, ValueMapping};
use issuesync_types::rest::{EnumerationKind, SimpleObject};

pub struct FieldMappingCache {
    priorities: OnceCell<HashMap<String, String>>,
    issue_types: OnceCell<HashMap<String, String>>,
    statuses: OnceCell<HashMap<String, String>>,
    link_types: OnceCell<HashMap<String, String>>,
    users: HashMap<String, String>,
    users_inverted: HashMap<String, String>,
}

impl FieldMappingCache {
    pub fn new(group: &ProjectGroup) -> Self {
        let users = group.users.mapping.clone();
        let users_inverted = users
            .iter()
            .map(|(upstream, downstream)| (downstream.clone(), upstream.clone()))
            .collect();
        Self {
            priorities: OnceCell::new(),
            issue_types: OnceCell::new(),
            statuses: OnceCell::new(),
            link_types: OnceCell::new(),
            users,
            users_inverted,
        }
    }

    pub async fn priority(
        &self,
        group: &ProjectGroup,
        source: &TrackerClient,
        destination: &TrackerClient,
        source_id: &str,
    ) -> Result<Option<String>, RestError> {
        let table = self
            .priorities
            .get_or_try_init(|| {
                enumerated_table(&group.priorities, source, destination, EnumerationKind::Priority)
            })
            .await?;
        Ok(resolve(table, &group.priorities, source_id))
    }

    pub async fn issue_type(
        &self,
        group: &ProjectGroup,
        source: &TrackerClient,
        destination: &TrackerClient,
        source_id: &str,
    ) -> Result<Option<String>, RestError> {
        let table = self
            .issue_types
            .get_or_try_init(|| {
                enumerated_table(&group.issue_types, source, destination, EnumerationKind::IssueType)
            })
            .await?;
        Ok(resolve(table, &group.issue_types, source_id))
    }

    /// Translates an upstream status, keyed by lowercased name, to the
    /// transition target expected on the destination. The static table
    /// may map to a transition id, a transition name or a target status
    /// name; the enumerated fallback maps to the downstream status name.
    pub async fn status_to_transition(
        &self,
        group: &ProjectGroup,
        source: &TrackerClient,
        destination: &TrackerClient,
        status_key: &str,
    ) -> Result<Option<String>, RestError> {
        let table = self
            .statuses
            .get_or_try_init(|| status_table(&group.statuses, source, destination))
            .await?;
        Ok(resolve(table, &group.statuses, status_key))
    }

    pub async fn link_type(
        &self,
        group: &ProjectGroup,
        source: &TrackerClient,
        destination: &TrackerClient,
        source_id: &str,
    ) -> Result<Option<String>, RestError> {
        let table = self
            .link_types
            .get_or_try_init(|| link_type_table(&group.issue_link_types, source, destination))
            .await?;
        Ok(resolve(table, &group.issue_link_types, source_id))
    }

    /// Mapped downstream id of an upstream user, if any.
    pub fn user(&self, upstream_id: &str) -> Option<&str> {
        self.users.get(upstream_id).map(String::as_str)
    }

    /// Reverse lookup for the mirror direction.
    pub fn upstream_user(&self, downstream_id: &str) -> Option<&str> {
        self.users_inverted.get(downstream_id).map(String::as_str)
    }
}

async fn enumerated_table(
    configured: &ValueMapping,
    source: &TrackerClient,
    destination: &TrackerClient,
    kind: EnumerationKind,
) -> Result<HashMap<String, String>, RestError> {
    if !configured.mapping.is_empty() {
        return Ok(configured.mapping.clone());
    }
    // name matching across instances is best effort, a static mapping is
    // the reliable option
    let upstream = source.list_enumeration(kind).await?;
    let downstream = destination.list_enumeration(kind).await?;
    Ok(match_by_name(&upstream, &downstream))
}

async fn link_type_table(
    configured: &ValueMapping,
    source: &TrackerClient,
    destination: &TrackerClient,
) -> Result<HashMap<String, String>, RestError> {
    if !configured.mapping.is_empty() {
        return Ok(configured.mapping.clone());
    }
    let upstream = source.issue_link_types().await?.issue_link_types;
    let downstream = destination.issue_link_types().await?.issue_link_types;
    Ok(match_by_name(&upstream, &downstream))
}

/// Statuses are looked up by name and resolved to a name: transitions
/// on the destination are matched by their target status name, not by
/// a status id.
async fn status_table(
    configured: &ValueMapping,
    source: &TrackerClient,
    destination: &TrackerClient,
) -> Result<HashMap<String, String>, RestError> {
    if !configured.mapping.is_empty() {
        return Ok(configured.mapping.clone());
    }
    let upstream = source.list_enumeration(EnumerationKind::Status).await?;
    let downstream = destination.list_enumeration(EnumerationKind::Status).await?;
    let mut table = HashMap::new();
    for up in &upstream {
        let Some(up_name) = up.name.as_deref() else { continue };
        let matched = downstream.iter().find(|down| {
            down.name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(up_name))
        });
        if let Some(down_name) = matched.and_then(|down| down.name.clone()) {
            table.insert(up_name.to_lowercase(), down_name);
        }
    }
    Ok(table)
}

fn match_by_name(
    upstream: &[SimpleObject],
    downstream: &[SimpleObject],
) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for up in upstream {
        let (Some(up_id), Some(up_name)) = (&up.id, &up.name) else { continue };
        let matched = downstream.iter().find(|down| {
            down.name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(up_name))
        });
        if let Some(down_id) = matched.and_then(|down| down.id.clone()) {
            table.insert(up_id.clone(), down_id);
        }
    }
    table
}

fn resolve(
    table: &HashMap<String, String>,
    configured: &ValueMapping,
    source_id: &str,
) -> Option<String> {
    table
        .get(source_id)
        .cloned()
        .or_else(|| configured.default_value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objects(pairs: &[(&str, &str)]) -> Vec<SimpleObject> {
        pairs
            .iter()
            .map(|(id, name)| SimpleObject {
                id: Some((*id).to_string()),
                name: Some((*name).to_string()),
            })
            .collect()
    }

    #[test]
    fn names_match_case_insensitively() {
        let upstream = objects(&[("1", "Blocker"), ("2", "Major"), ("3", "Oddball")]);
        let downstream = objects(&[("10", "blocker"), ("20", "Major")]);
        let table = match_by_name(&upstream, &downstream);
        assert_eq!(table.get("1"), Some(&"10".to_string()));
        assert_eq!(table.get("2"), Some(&"20".to_string()));
        assert_eq!(table.get("3"), None);
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let mut table = HashMap::new();
        table.insert("1".to_string(), "10".to_string());
        let configured = ValueMapping {
            default_value: Some("99".to_string()),
            mapping: HashMap::new(),
        };
        assert_eq!(resolve(&table, &configured, "1"), Some("10".to_string()));
        assert_eq!(resolve(&table, &configured, "7"), Some("99".to_string()));
        let no_default = ValueMapping::default();
        assert_eq!(resolve(&table, &no_default, "7"), None);
    }
}

//! Payloads of the tracker REST API.
//!
//! Deserialization is lenient: unknown properties are kept in an `extra`
//! map so custom fields survive a read-modify-write cycle. Serialization
//! skips unset fields so update requests stay minimal.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parses the numeric suffix of an issue key, e.g. `WIDGET-42` → `42`.
pub fn key_number(key: &str) -> Option<i64> {
    key.rsplit('-').next()?.parse().ok()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Issue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_url: Option<String>,
    #[serde(default)]
    pub fields: Fields,
}

impl Issue {
    pub fn key_number(&self) -> Option<i64> {
        self.key.as_deref().and_then(key_number)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<SimpleObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuetype: Option<SimpleObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SimpleObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<SimpleObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    // assignee/reporter use a double Option so that an explicit JSON
    // `null` ("unassign") survives serialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Option<User>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<Option<User>>,
    #[serde(rename = "fixVersions", skip_serializing_if = "Option::is_none")]
    pub fix_versions: Option<Vec<Version>>,
    /// "Affects versions" on the UI side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<Version>>,
    /// Read-only; links are created through a dedicated endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuelinks: Option<Vec<IssueLink>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<Comments>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Issue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<FixedOffset>>,
    /// Custom fields (epic links and the like).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimpleObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SimpleObject {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()), name: None }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self { id: None, name: Some(name.into()) }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "accountId", skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_url: Option<String>,
}

impl User {
    /// A user reference carrying the mapped id under the property the
    /// destination instance expects (`accountId` for cloud, `name` for
    /// server).
    pub fn mapped(property: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match property {
            "name" => Self { name: Some(value), ..Self::default() },
            _ => Self { account_id: Some(value), ..Self::default() },
        }
    }

    /// The identifier part used in "unknown user" placeholders.
    pub fn id_part(&self) -> &str {
        self.account_id.as_deref().or(self.name.as_deref()).unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Comments {
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Comment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
    #[serde(rename = "updateAuthor", skip_serializing_if = "Option::is_none")]
    pub update_author: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<FixedOffset>>,
}

impl Comment {
    pub fn is_updated_same_as_created(&self) -> bool {
        match (&self.created, &self.updated) {
            (Some(created), Some(updated)) => created == updated,
            _ => true,
        }
    }
}

/// Bulk issue creation request; the destination creates records for all
/// entries in a single call and assigns consecutive keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueBulk {
    #[serde(rename = "issueUpdates")]
    pub issue_updates: Vec<Issue>,
}

impl IssueBulk {
    /// Replicates one placeholder template `times` times.
    pub fn replicated(placeholder: Issue, times: usize) -> Self {
        Self { issue_updates: vec![placeholder; times] }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueBulkResponse {
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub errors: Vec<Value>,
}

impl IssueBulkResponse {
    /// Largest key suffix among the created issues.
    pub fn max_key_number(&self) -> Option<i64> {
        self.issues.iter().filter_map(Issue::key_number).max()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Issues {
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Version {
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released: Option<bool>,
    #[serde(rename = "releaseDate", skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(rename = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl Version {
    /// A copy suitable for creating/updating the counterpart version in
    /// the destination project.
    pub fn copy_for_project(&self, project_id: &str, upstream_id_marker: &str) -> Version {
        Version {
            self_url: None,
            id: None,
            name: self.name.clone(),
            description: Some(upstream_id_marker.to_string()),
            released: self.released,
            release_date: self.release_date.clone(),
            project_id: Some(project_id.to_string()),
        }
    }

    pub fn needs_update(&self, downstream: &Version) -> bool {
        self.name != downstream.name
            || self.released != downstream.released
            || self.release_date != downstream.release_date
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueLink {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub link_type: Option<SimpleObject>,
    #[serde(rename = "inwardIssue", skip_serializing_if = "Option::is_none")]
    pub inward_issue: Option<Issue>,
    #[serde(rename = "outwardIssue", skip_serializing_if = "Option::is_none")]
    pub outward_issue: Option<Issue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueLinkTypes {
    #[serde(rename = "issueLinkTypes", default)]
    pub issue_link_types: Vec<SimpleObject>,
}

/// Link pointing back at the source record, keyed by `global_id` so
/// repeated upserts update in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLink {
    #[serde(rename = "globalId", skip_serializing_if = "Option::is_none")]
    pub global_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    pub object: RemoteLinkObject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLinkObject {
    pub url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transition {
    pub transition: SimpleObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<TransitionFields>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<SimpleObject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transitions {
    #[serde(default)]
    pub transitions: Vec<TransitionOption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionOption {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub to: Option<SimpleObject>,
}

/// The enumerations a mapping table can be built from by name matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumerationKind {
    Priority,
    IssueType,
    Status,
}

impl EnumerationKind {
    pub fn path(&self) -> &'static str {
        match self {
            EnumerationKind::Priority => "priority",
            EnumerationKind::IssueType => "issuetype",
            EnumerationKind::Status => "status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_number_parses_suffix() {
        assert_eq!(key_number("WIDGET-42"), Some(42));
        assert_eq!(key_number("A-B-7"), Some(7));
        assert_eq!(key_number("WIDGET"), None);
    }

    #[test]
    fn unassigned_serializes_as_null() {
        let fields = Fields { assignee: Some(None), ..Fields::default() };
        let json = serde_json::to_value(&fields).unwrap();
        assert!(json.get("assignee").unwrap().is_null());

        let fields = Fields::default();
        let json = serde_json::to_value(&fields).unwrap();
        assert!(json.get("assignee").is_none());
    }

    #[test]
    fn custom_fields_survive_roundtrip() {
        let raw = r#"{"summary":"s","customfield_10014":"WIDGET-1"}"#;
        let fields: Fields = serde_json::from_str(raw).unwrap();
        assert_eq!(fields.extra["customfield_10014"], "WIDGET-1");
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json["customfield_10014"], "WIDGET-1");
    }

    #[test]
    fn bulk_response_max_key() {
        let raw = r#"{"issues":[{"key":"W-3"},{"key":"W-11"},{"key":"W-5"}],"errors":[]}"#;
        let response: IssueBulkResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.max_key_number(), Some(11));
    }
}

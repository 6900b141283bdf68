//! Validated inbound notifications.
//!
//! Only minimal identifiers are modeled on purpose: the payloads arrive
//! from an endpoint we cannot fully trust, so handlers take the object id
//! and re-fetch everything else through the REST API.

use serde::Deserialize;

/// An upstream webhook notification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "webhookEvent", default)]
    pub webhook_event: Option<String>,
    #[serde(default)]
    pub issue: Option<WebhookIssue>,
    #[serde(default)]
    pub comment: Option<WebhookObject>,
    #[serde(rename = "issueLink", default)]
    pub issue_link: Option<WebhookIssueLink>,
}

impl WebhookEvent {
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(self.webhook_event.as_deref()?)
    }

    /// A synthetic issue-updated event, used by re-sync triggers.
    pub fn issue_updated(id: i64, key: impl Into<String>) -> Self {
        Self {
            webhook_event: Some(EventKind::IssueUpdated.tag().to_string()),
            issue: Some(WebhookIssue { id: Some(id), key: Some(key.into()) }),
            ..Self::default()
        }
    }

    pub fn comment_updated(issue: WebhookIssue, comment_id: i64) -> Self {
        Self {
            webhook_event: Some(EventKind::CommentUpdated.tag().to_string()),
            issue: Some(issue),
            comment: Some(WebhookObject { id: Some(comment_id) }),
            ..Self::default()
        }
    }

    pub fn issue_link_created(link_id: i64) -> Self {
        Self {
            webhook_event: Some(EventKind::IssueLinkCreated.tag().to_string()),
            issue_link: Some(WebhookIssueLink { id: Some(link_id), ..WebhookIssueLink::default() }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookIssue {
    pub id: Option<i64>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookObject {
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookIssueLink {
    pub id: Option<i64>,
    #[serde(rename = "sourceIssueId", default)]
    pub source_issue_id: Option<i64>,
    #[serde(rename = "destinationIssueId", default)]
    pub destination_issue_id: Option<i64>,
    #[serde(rename = "issueLinkType", default)]
    pub link_type: Option<WebhookObject>,
}

/// Upstream event kinds we replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    IssueCreated,
    IssueUpdated,
    IssueDeleted,
    IssueLinkCreated,
    IssueLinkDeleted,
    CommentCreated,
    CommentUpdated,
    CommentDeleted,
}

impl EventKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "jira:issue_created" => Some(Self::IssueCreated),
            "jira:issue_updated" => Some(Self::IssueUpdated),
            "jira:issue_deleted" => Some(Self::IssueDeleted),
            "issuelink_created" => Some(Self::IssueLinkCreated),
            "issuelink_deleted" => Some(Self::IssueLinkDeleted),
            "comment_created" => Some(Self::CommentCreated),
            "comment_updated" => Some(Self::CommentUpdated),
            "comment_deleted" => Some(Self::CommentDeleted),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::IssueCreated => "jira:issue_created",
            Self::IssueUpdated => "jira:issue_updated",
            Self::IssueDeleted => "jira:issue_deleted",
            Self::IssueLinkCreated => "issuelink_created",
            Self::IssueLinkDeleted => "issuelink_deleted",
            Self::CommentCreated => "comment_created",
            Self::CommentUpdated => "comment_updated",
            Self::CommentDeleted => "comment_deleted",
        }
    }
}

/// A downstream mirror notification: a subset of edits made on the
/// destination side that is reflected back upstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "triggeredByUser", default)]
    pub triggered_by_user: Option<String>,
}

impl ActionEvent {
    pub fn kind(&self) -> Option<ActionKind> {
        ActionKind::parse(self.event.as_deref()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    IssueAssigned,
    IssueTransitioned,
    FixVersionChanged,
    AffectsVersionChanged,
}

impl ActionKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "jira:issue_update_assignee" => Some(Self::IssueAssigned),
            "jira:issue_update_status" => Some(Self::IssueTransitioned),
            "jira:issue_update_fixversions" => Some(Self::FixVersionChanged),
            "jira:issue_update_versions" => Some(Self::AffectsVersionChanged),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_parsing_is_case_insensitive() {
        assert_eq!(EventKind::parse("JIRA:ISSUE_CREATED"), Some(EventKind::IssueCreated));
        assert_eq!(EventKind::parse("comment_deleted"), Some(EventKind::CommentDeleted));
        assert_eq!(EventKind::parse("jira:worklog_updated"), None);
    }

    #[test]
    fn webhook_event_deserializes() {
        let raw = r#"{
            "webhookEvent": "comment_updated",
            "issue": { "id": 101, "key": "UPWIDGET-7" },
            "comment": { "id": 555 }
        }"#;
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind(), Some(EventKind::CommentUpdated));
        assert_eq!(event.issue.unwrap().id, Some(101));
        assert_eq!(event.comment.unwrap().id, Some(555));
    }

    #[test]
    fn action_event_kind() {
        let event = ActionEvent {
            event: Some("jira:issue_update_status".to_string()),
            ..ActionEvent::default()
        };
        assert_eq!(event.kind(), Some(ActionKind::IssueTransitioned));
    }
}

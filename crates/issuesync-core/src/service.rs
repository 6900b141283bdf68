//! Ingress and orchestration.
//!
//! The service owns one [`GroupContext`] per configured project group.
//! Webhook endpoints hand validated events to `acknowledge` (upstream)
//! or `downstream_acknowledge` (mirror); both only classify, filter and
//! enqueue, so the hook sender gets its response before any remote call
//! is made. Everything deeper runs detached on the group's dispatcher.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use issuesync_types::config::SyncConfig;
use issuesync_types::hook::{ActionEvent, ActionKind, EventKind, WebhookEvent};
use issuesync_types::rest::Issue;

use crate::context::GroupContext;
use crate::dispatch::WorkItem;
use crate::error::SyncError;
use crate::handlers::{action, comment, issue, link};
use crate::reporting::FailureCollector;

/// Reserved identity attached to replication-generated events. Distinct
/// from any real account id so echoes of our own writes can be told
/// apart at ingress and dropped.
pub const SYSTEM_ACTOR: &str = "c9PZQYgHz2C0licJcLSRsOYqAcPXq1xkR5y0Gd1Ming=";

const SEARCH_PAGE_SIZE: i64 = 100;
const COMMENT_FETCH_LIMIT: i64 = 500;

/// How much of a matched issue to replicate on a query-driven re-sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Issue body, comments and links.
    Full,
    /// Status only.
    TransitionOnly,
}

pub struct SyncService {
    contexts: HashMap<String, Arc<GroupContext>>,
}

impl SyncService {
    pub fn new(config: &SyncConfig, collector: Arc<dyn FailureCollector>) -> Result<Self, SyncError> {
        let mut contexts = HashMap::new();
        for (name, group) in &config.project_group {
            let context = GroupContext::new(name, group.clone(), Arc::clone(&collector))?;
            contexts.insert(name.clone(), Arc::new(context));
        }
        Ok(Self { contexts })
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.contexts.keys().map(String::as_str)
    }

    pub fn context(&self, group: &str) -> Result<&Arc<GroupContext>, SyncError> {
        self.contexts
            .get(group)
            .ok_or_else(|| SyncError::UnknownProjectGroup(group.to_string()))
    }

    /// Events accepted but not yet executed, across all groups.
    pub fn pending_events(&self) -> usize {
        self.contexts.values().map(|context| context.pending_events()).sum()
    }

    /// Accepts an upstream webhook notification. Validation, the
    /// anti-echo filter and the unknown-group rejection all happen
    /// synchronously; the actual processing is enqueued.
    pub async fn acknowledge(
        &self,
        group: &str,
        event: WebhookEvent,
        triggered_by: Option<&str>,
    ) -> Result<(), SyncError> {
        let context = match self.context(group) {
            Ok(context) => context,
            Err(error) => {
                // surfaced to the hook sender, nothing is enqueued
                warn!(group, "rejecting event for an unconfigured project group");
                return Err(error);
            }
        };
        let Some(kind) = event.kind() else {
            info!(group, event = ?event.webhook_event, "unsupported event kind, skipping");
            return Ok(());
        };
        if let Some(actor) = triggered_by {
            if actor == SYSTEM_ACTOR || context.group().users.is_upstream_ignored(actor) {
                info!(group, actor, "event triggered by an ignored actor, dropping");
                return Ok(());
            }
        }
        self.enqueue(context, kind, &event).await
    }

    /// Accepts a downstream mirror notification.
    pub async fn downstream_acknowledge(
        &self,
        group: &str,
        event: ActionEvent,
    ) -> Result<(), SyncError> {
        let context = match self.context(group) {
            Ok(context) => context,
            Err(error) => {
                warn!(group, "rejecting mirror event for an unconfigured project group");
                return Err(error);
            }
        };
        let Some(kind) = event.kind() else {
            info!(group, event = ?event.event, "unsupported mirror event kind, skipping");
            return Ok(());
        };
        if let Some(actor) = event.triggered_by_user.as_deref() {
            if actor == SYSTEM_ACTOR || context.group().users.is_downstream_ignored(actor) {
                info!(group, actor, "mirror event triggered by an ignored actor, dropping");
                return Ok(());
            }
        }
        let key = event
            .key
            .clone()
            .ok_or_else(|| SyncError::MalformedEvent("mirror event without an issue key".to_string()))?;

        let work = match kind {
            ActionKind::IssueAssigned => {
                work(context, "mirror assignee", action::assignee(Arc::clone(context), key))
            }
            ActionKind::IssueTransitioned => {
                work(context, "mirror transition", action::transition(Arc::clone(context), key))
            }
            ActionKind::FixVersionChanged => work(
                context,
                "mirror fix versions",
                action::versions(Arc::clone(context), key, action::VersionList::Fix),
            ),
            ActionKind::AffectsVersionChanged => work(
                context,
                "mirror affects versions",
                action::versions(Arc::clone(context), key, action::VersionList::Affects),
            ),
        };
        context.submit_downstream(work).await
    }

    /// Re-syncs one issue by its source key, as if an update webhook
    /// had just arrived for it.
    pub async fn resync_issue(&self, group: &str, key: &str) -> Result<(), SyncError> {
        let context = self.context(group)?;
        let source_issue = context.source().get_issue(key).await?;
        self.trigger_sync(context, &source_issue).await
    }

    /// Enqueues sync events for every issue matching a source-side
    /// search query, page by page.
    pub async fn sync_by_query(
        &self,
        group: &str,
        query: &str,
        mode: QueryMode,
    ) -> Result<(), SyncError> {
        let context = self.context(group)?;
        let mut start = 0;
        loop {
            let page = context.source().search(query, start, SEARCH_PAGE_SIZE).await?;
            if page.issues.is_empty() {
                break;
            }
            info!(group, query, matched = page.total, start, "queueing query-driven sync");
            for source_issue in page.issues {
                match mode {
                    QueryMode::Full => self.trigger_sync(context, &source_issue).await?,
                    QueryMode::TransitionOnly => {
                        let item = work(
                            context,
                            "transition-only sync",
                            issue::transition_only(Arc::clone(context), source_issue),
                        );
                        context.submit_upstream(item).await?;
                    }
                }
            }
            start += SEARCH_PAGE_SIZE;
        }
        Ok(())
    }

    /// The scheduled reconciliation pass: every project of the group is
    /// re-synced over the configured lookback window.
    pub async fn sync_last_updated(&self, group: &str) -> Result<(), SyncError> {
        let context = self.context(group)?;
        let Some(scheduled) = &context.group().scheduled else {
            return Ok(());
        };
        info!(group, "starting scheduled sync");
        for project in context.projects() {
            let query = format!(
                "project={} and updated >= {} ORDER BY key",
                project.project.original_project_key, scheduled.time_filter
            );
            if let Err(error) = self.sync_by_query(group, &query, QueryMode::Full).await {
                context
                    .collector()
                    .warning(format!("scheduled sync query '{query}' failed: {error}"));
                break;
            }
        }
        info!(group, "finished scheduled sync");
        Ok(())
    }

    /// Rebuilds one project's fix version cache from both instances.
    pub async fn refresh_fix_versions(&self, group: &str, project: &str) -> Result<(), SyncError> {
        let context = self.context(group)?;
        let project = context
            .projects()
            .find(|candidate| candidate.name == project)
            .ok_or_else(|| SyncError::UnknownProject(project.to_string()))?
            .clone();
        let refresh_context = Arc::clone(context);
        let item: WorkItem = Box::pin(async move {
            refresh_context.refresh_fix_versions(&project).await;
        });
        context.submit_upstream(item).await
    }

    /// Drains and closes every group context.
    pub async fn shutdown(&self) {
        for context in self.contexts.values() {
            context.close().await;
        }
    }

    /// Classifies an upstream event and enqueues its handlers. Shared
    /// by ingress and the synthetic re-sync triggers.
    async fn enqueue(
        &self,
        context: &Arc<GroupContext>,
        kind: EventKind,
        event: &WebhookEvent,
    ) -> Result<(), SyncError> {
        let item = match kind {
            EventKind::IssueCreated | EventKind::IssueUpdated => {
                let id = issue_id(event)?;
                work(context, "issue upsert", issue::upsert(Arc::clone(context), id))
            }
            EventKind::IssueDeleted => {
                let key = event
                    .issue
                    .as_ref()
                    .and_then(|issue| issue.key.clone())
                    .ok_or_else(|| missing("issue key"))?;
                work(context, "issue delete", issue::deleted(Arc::clone(context), key))
            }
            EventKind::CommentCreated | EventKind::CommentUpdated => {
                let issue = issue_id(event)?;
                let comment = comment_id(event)?;
                work(context, "comment upsert", comment::upsert(Arc::clone(context), issue, comment))
            }
            EventKind::CommentDeleted => {
                let issue = issue_id(event)?;
                let comment = comment_id(event)?;
                work(context, "comment delete", comment::deleted(Arc::clone(context), issue, comment))
            }
            EventKind::IssueLinkCreated => {
                let id = link_id(event)?;
                work(context, "issue link upsert", link::upsert(Arc::clone(context), id))
            }
            EventKind::IssueLinkDeleted => {
                let hook_link = event.issue_link.as_ref().ok_or_else(|| missing("issue link"))?;
                let first = hook_link.source_issue_id.ok_or_else(|| missing("link source issue id"))?;
                let second =
                    hook_link.destination_issue_id.ok_or_else(|| missing("link destination issue id"))?;
                let link_type = hook_link
                    .link_type
                    .as_ref()
                    .and_then(|t| t.id)
                    .ok_or_else(|| missing("link type id"))?;
                work(
                    context,
                    "issue link delete",
                    link::deleted(Arc::clone(context), first, second, link_type.to_string()),
                )
            }
        };
        context.submit_upstream(item).await
    }

    /// Generates the synthetic events that fully re-sync one issue:
    /// the issue body, its comments, and its links. Synthetic events
    /// skip the ingress filter; they are already attributed to
    /// [`SYSTEM_ACTOR`] when they reach the remote instances.
    async fn trigger_sync(
        &self,
        context: &Arc<GroupContext>,
        source_issue: &Issue,
    ) -> Result<(), SyncError> {
        let id = source_issue
            .id
            .as_deref()
            .and_then(|id| id.parse::<i64>().ok())
            .ok_or_else(|| missing("issue id"))?;
        let key = source_issue.key.clone().ok_or_else(|| missing("issue key"))?;
        info!(
            group = context.name(),
            issue = %key,
            pending = context.pending_events(),
            "queueing full issue sync"
        );
        let event = WebhookEvent::issue_updated(id, key.clone());
        self.enqueue(context, EventKind::IssueUpdated, &event).await?;

        // comments do not always ride along on the search payload
        let comments = match &source_issue.fields.comment {
            Some(comments) => comments.comments.clone(),
            None => {
                context
                    .source()
                    .get_comments(&key, 0, COMMENT_FETCH_LIMIT)
                    .await?
                    .comments
            }
        };
        for comment in comments {
            let Some(comment_id) = comment.id.as_deref().and_then(|id| id.parse::<i64>().ok())
            else {
                continue;
            };
            let event = WebhookEvent::comment_updated(
                issuesync_types::hook::WebhookIssue { id: Some(id), key: Some(key.clone()) },
                comment_id,
            );
            self.enqueue(context, EventKind::CommentUpdated, &event).await?;
        }

        for link in source_issue.fields.issuelinks.as_deref().unwrap_or_default() {
            let Some(link_id) = link.id.as_deref().and_then(|id| id.parse::<i64>().ok()) else {
                continue;
            };
            let event = WebhookEvent::issue_link_created(link_id);
            self.enqueue(context, EventKind::IssueLinkCreated, &event).await?;
        }
        Ok(())
    }
}

fn missing(what: &str) -> SyncError {
    SyncError::MalformedEvent(format!("event carries no {what}"))
}

fn issue_id(event: &WebhookEvent) -> Result<i64, SyncError> {
    event
        .issue
        .as_ref()
        .and_then(|issue| issue.id)
        .ok_or_else(|| missing("issue id"))
}

fn comment_id(event: &WebhookEvent) -> Result<i64, SyncError> {
    event
        .comment
        .as_ref()
        .and_then(|comment| comment.id)
        .ok_or_else(|| missing("comment id"))
}

fn link_id(event: &WebhookEvent) -> Result<i64, SyncError> {
    event
        .issue_link
        .as_ref()
        .and_then(|link| link.id)
        .ok_or_else(|| missing("issue link id"))
}

/// Wraps a handler future into a dispatcher work item: failures are
/// reported through the group's collector and never escape the worker.
fn work<F>(context: &Arc<GroupContext>, label: &'static str, future: F) -> WorkItem
where
    F: Future<Output = Result<(), SyncError>> + Send + 'static,
{
    let context = Arc::clone(context);
    Box::pin(async move {
        if let Err(error) = future.await {
            context.collector().critical(format!("{label} failed: {error}"));
        }
        info!(
            group = context.name(),
            task = label,
            pending = context.pending_events(),
            "finished processing"
        );
    })
}

//! Issue replication handlers.

use std::sync::Arc;

use issuesync_client::RestError;
use issuesync_types::rest::{Fields, Issue, ProjectRef, RemoteLink, RemoteLinkObject, SimpleObject, User};

use crate::context::{GroupContext, ProjectContext};
use crate::error::SyncError;
use crate::handlers::{apply_transition, browse_url, describe_user, truncate_content};
use crate::reporting::FailureCollector;

/// Replicates one upstream issue onto its destination counterpart,
/// creating placeholders first so the destination key exists.
pub async fn upsert(context: Arc<GroupContext>, issue_id: i64) -> Result<(), SyncError> {
    let source_issue = match context.source().get_issue_by_id(issue_id).await {
        Ok(issue) => issue,
        Err(error @ RestError::NotFound { .. }) => {
            context
                .collector()
                .critical(format!("source issue {issue_id} was not found: {error}"));
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };
    let source_key = source_issue
        .key
        .clone()
        .ok_or_else(|| SyncError::MalformedEvent(format!("issue {issue_id} carries no key")))?;
    let project = context
        .project_for_source_key(&source_key)
        .ok_or_else(|| SyncError::UnknownProject(source_key.clone()))?;
    let destination_key = context
        .destination_key(&source_key)
        .ok_or_else(|| SyncError::UnknownProject(source_key.clone()))?;

    project.keys.reserve_through(context.destination(), &destination_key).await?;

    let destination_issue = context.destination().get_issue(&destination_key).await?;
    let fields = replicated_fields(&context, project, &source_issue).await?;
    update_with_assignee_fallback(&context, &destination_key, fields).await?;

    if let Some(link) = remote_self_link(&source_issue) {
        context.destination().upsert_remote_link(&destination_key, &link).await?;
    }
    apply_transition(&context, &source_issue, &destination_issue, &destination_key).await?;
    Ok(())
}

/// Applies only the status of an already fetched source issue, used by
/// the transition-only management re-sync.
pub async fn transition_only(context: Arc<GroupContext>, source_issue: Issue) -> Result<(), SyncError> {
    let source_key = source_issue
        .key
        .clone()
        .ok_or_else(|| SyncError::MalformedEvent("issue without a key".to_string()))?;
    let project = context
        .project_for_source_key(&source_key)
        .ok_or_else(|| SyncError::UnknownProject(source_key.clone()))?;
    let destination_key = context
        .destination_key(&source_key)
        .ok_or_else(|| SyncError::UnknownProject(source_key.clone()))?;

    project.keys.reserve_through(context.destination(), &destination_key).await?;
    let destination_issue = context.destination().get_issue(&destination_key).await?;
    apply_transition(&context, &source_issue, &destination_issue, &destination_key).await
}

/// Marks the destination counterpart of a deleted (or moved) upstream
/// issue. Records are never deleted downstream; the summary and labels
/// make the state visible instead.
pub async fn deleted(context: Arc<GroupContext>, source_key: String) -> Result<(), SyncError> {
    // confirm the deletion first: the hook may be stale
    let marker = match context.source().get_issue(&source_key).await {
        Err(RestError::NotFound { .. }) => "DELETED".to_string(),
        Ok(issue) if issue.key.as_deref() != Some(source_key.as_str()) => {
            format!("MOVED (to {})", issue.key.as_deref().unwrap_or("unknown"))
        }
        Ok(_) => {
            context.collector().critical(format!(
                "was asked to delete issue {source_key} which still exists upstream"
            ));
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    let destination_key = context
        .destination_key(&source_key)
        .ok_or_else(|| SyncError::UnknownProject(source_key.clone()))?;
    let destination_issue = context.destination().get_issue(&destination_key).await?;

    let mut labels = destination_issue.fields.labels.unwrap_or_default();
    if !labels.iter().any(|label| label == "deleted_upstream") {
        labels.push("deleted_upstream".to_string());
    }
    let update = Issue {
        fields: Fields {
            summary: Some(format!(
                "{marker} upstream: {}",
                destination_issue.fields.summary.as_deref().unwrap_or("")
            )),
            labels: Some(labels),
            ..Fields::default()
        },
        ..Issue::default()
    };
    context.destination().update_issue(&destination_key, &update).await?;
    Ok(())
}

/// The destination rendition of the source issue's fields.
async fn replicated_fields(
    context: &GroupContext,
    project: &Arc<ProjectContext>,
    source_issue: &Issue,
) -> Result<Fields, SyncError> {
    let group = context.group();
    let mut fields = Fields {
        summary: source_issue.fields.summary.clone(),
        project: Some(ProjectRef { id: Some(project.project.project_id.clone()), key: None }),
        ..Fields::default()
    };

    let quote = description_quote(context, source_issue);
    fields.description = Some(truncate_content(format!(
        "{quote}{}",
        source_issue.fields.description.as_deref().unwrap_or("")
    )));

    // an unmappable priority stays blank and the destination applies
    // its own default
    if let Some(priority) = &source_issue.fields.priority {
        if let Some(id) = priority.id.as_deref() {
            fields.priority = context
                .mappings()
                .priority(group, context.source(), context.destination(), id)
                .await?
                .map(SimpleObject::with_id);
        }
    }
    if let Some(issuetype) = &source_issue.fields.issuetype {
        if let Some(id) = issuetype.id.as_deref() {
            fields.issuetype = context
                .mappings()
                .issue_type(group, context.source(), context.destination(), id)
                .await?
                .map(SimpleObject::with_id);
        }
    }

    let property = group.users.mapped_property_name.as_str();
    if group.can_set_reporter {
        fields.reporter = source_issue
            .fields
            .reporter
            .as_ref()
            .and_then(|reporter| reporter.as_ref())
            .and_then(|reporter| context.mappings().user(reporter.id_part()))
            .map(|mapped| Some(User::mapped(property, mapped)));
    }
    match source_issue.fields.assignee.as_ref().and_then(|assignee| assignee.as_ref()) {
        Some(assignee) => {
            let mapped = context
                .mappings()
                .user(assignee.id_part())
                .map(|mapped| mapped.to_string())
                .or_else(|| group.users.not_mapped_assignee.clone());
            fields.assignee = Some(mapped.map(|mapped| User::mapped(property, mapped)));
        }
        // an absent assignee must become an explicit null, otherwise
        // the destination keeps the previous one
        None => fields.assignee = Some(None),
    }

    if let Some(versions) = &source_issue.fields.fix_versions {
        let mut replicated = Vec::with_capacity(versions.len());
        for version in versions {
            if let Some(downstream) = context.fix_version(project, version).await {
                replicated.push(downstream);
            }
        }
        fields.fix_versions = Some(replicated);
    }
    if let Some(versions) = &source_issue.fields.versions {
        let mut replicated = Vec::with_capacity(versions.len());
        for version in versions {
            if let Some(downstream) = context.fix_version(project, version).await {
                replicated.push(downstream);
            }
        }
        fields.versions = Some(replicated);
    }

    Ok(fields)
}

/// Issue update with one fallback: when the destination rejects the
/// mapped assignee, retry once with the configured not-mapped assignee
/// instead of failing the whole sync.
async fn update_with_assignee_fallback(
    context: &GroupContext,
    destination_key: &str,
    mut fields: Fields,
) -> Result<(), SyncError> {
    let update = Issue { fields: fields.clone(), ..Issue::default() };
    match context.destination().update_issue(destination_key, &update).await {
        Ok(()) => Ok(()),
        Err(error) => {
            let had_assignee = matches!(fields.assignee, Some(Some(_)));
            if !had_assignee || !error.mentions_field("assignee") {
                return Err(error.into());
            }
            let group = context.group();
            let fallback = group
                .users
                .not_mapped_assignee
                .as_deref()
                .map(|fallback| User::mapped(&group.users.mapped_property_name, fallback));
            context.collector().warning(format!(
                "destination rejected the assignee on {destination_key}, retrying with the fallback"
            ));
            fields.assignee = Some(fallback);
            let retry = Issue { fields, ..Issue::default() };
            context.destination().update_issue(destination_key, &retry).await?;
            Ok(())
        }
    }
}

/// Web link on the destination issue pointing back at the source
/// record; keyed by global id so repeated syncs update in place.
fn remote_self_link(source_issue: &Issue) -> Option<RemoteLink> {
    let key = source_issue.key.as_deref()?;
    let url = browse_url(source_issue.self_url.as_deref()?, key)?;
    Some(RemoteLink {
        global_id: Some(url.clone()),
        relationship: Some("Upstream issue".to_string()),
        object: RemoteLinkObject {
            url,
            title: key.to_string(),
            summary: Some("Link to the upstream issue this one was cloned from.".to_string()),
        },
    })
}

/// Quote block prepended to the replicated description, attributing the
/// original author and pointing back at the source record.
fn description_quote(context: &GroupContext, source_issue: &Issue) -> String {
    let key = source_issue.key.as_deref().unwrap_or("unknown");
    let link = source_issue
        .self_url
        .as_deref()
        .and_then(|self_url| browse_url(self_url, key))
        .unwrap_or_else(|| key.to_string());
    let assignee = describe_user(
        context,
        source_issue.fields.assignee.as_ref().and_then(|user| user.as_ref()),
    );
    let reporter = describe_user(
        context,
        source_issue.fields.reporter.as_ref().and_then(|user| user.as_ref()),
    );
    let status = source_issue
        .fields
        .status
        .as_ref()
        .and_then(|status| status.name.as_deref())
        .unwrap_or("unknown");
    let created = source_issue
        .fields
        .created
        .map(|at| at.format("%d/%b/%y %l:%M %p").to_string())
        .unwrap_or_default();
    let updated = source_issue
        .fields
        .updated
        .map(|at| at.format("%d/%b/%y %l:%M %p").to_string())
        .unwrap_or_default();
    format!(
        "{{quote}}This issue is created as a copy of [{key}|{link}].\n\n\
         Assigned to: {assignee}.\n\n\
         Reported by: {reporter}.\n\n\
         Upstream status: {status}.\n\n\
         Created: {created}.\n\n\
         Last updated: {updated}.{{quote}}\n\n\n"
    )
}

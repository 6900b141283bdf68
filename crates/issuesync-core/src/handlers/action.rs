//! Mirror handlers for the downstream direction.
//!
//! Only a small set of destination edits flows back upstream: assignee,
//! status, and the two version lists. User and status translation go
//! through the inverted mapping tables.

use std::sync::Arc;

use issuesync_types::rest::{Fields, Issue, SimpleObject, Transition, User, Version};

use crate::context::GroupContext;
use crate::error::SyncError;
use crate::handlers::find_transition_id;
use crate::reporting::FailureCollector;

/// Mirrors a destination assignee change onto the source issue. An
/// unmapped assignee leaves the source untouched; clearing the assignee
/// clears it upstream too.
pub async fn assignee(context: Arc<GroupContext>, destination_key: String) -> Result<(), SyncError> {
    let issue = context.destination().get_issue(&destination_key).await?;
    let source_key = context
        .source_key(&destination_key)
        .ok_or_else(|| SyncError::UnknownProject(destination_key.clone()))?;

    let assignee = match issue.fields.assignee.as_ref().and_then(|user| user.as_ref()) {
        Some(user) => match context.mappings().upstream_user(user.id_part()) {
            Some(upstream) => {
                let property = context.group().users.mapped_property_name.as_str();
                Some(User::mapped(property, upstream))
            }
            None => {
                context.collector().warning(format!(
                    "assignee of {destination_key} has no upstream mapping, not mirrored"
                ));
                return Ok(());
            }
        },
        None => None,
    };
    let update = Issue {
        fields: Fields { assignee: Some(assignee), ..Fields::default() },
        ..Issue::default()
    };
    context.source().update_issue(&source_key, &update).await?;
    Ok(())
}

/// Mirrors a destination status change by transitioning the source
/// issue towards the inverted status mapping.
pub async fn transition(context: Arc<GroupContext>, destination_key: String) -> Result<(), SyncError> {
    let issue = context.destination().get_issue(&destination_key).await?;
    let source_key = context
        .source_key(&destination_key)
        .ok_or_else(|| SyncError::UnknownProject(destination_key.clone()))?;
    let source_issue = context.source().get_issue(&source_key).await?;

    let Some(current) = issue.fields.status.as_ref().and_then(|status| status.name.as_deref())
    else {
        return Ok(());
    };
    let group = context.group();
    // inverted static mapping: the downstream value names the upstream
    // status we should transition towards
    let Some(target) = group
        .statuses
        .mapping
        .iter()
        .find(|(_, downstream)| downstream.eq_ignore_ascii_case(current))
        .map(|(upstream, _)| upstream.clone())
    else {
        context.collector().warning(format!(
            "status '{current}' of {destination_key} has no upstream mapping, not mirrored"
        ));
        return Ok(());
    };

    let already = source_issue
        .fields
        .status
        .as_ref()
        .and_then(|status| status.name.as_deref())
        .is_some_and(|name| name.eq_ignore_ascii_case(&target));
    if already {
        return Ok(());
    }

    let Some(transition_id) = find_transition_id(context.source(), &source_key, &target).await?
    else {
        context.collector().warning(format!(
            "no transition towards '{target}' is available on {source_key}"
        ));
        return Ok(());
    };
    let transition = Transition {
        transition: SimpleObject::with_id(transition_id),
        fields: None,
    };
    context.source().transition(&source_key, &transition).await?;
    Ok(())
}

/// Which of the two version lists a mirror event refers to.
#[derive(Debug, Clone, Copy)]
pub enum VersionList {
    Fix,
    Affects,
}

/// Mirrors a fix/affects version change: the source issue's list is
/// replaced with name-only references matching the destination list.
pub async fn versions(
    context: Arc<GroupContext>,
    destination_key: String,
    list: VersionList,
) -> Result<(), SyncError> {
    let issue = context.destination().get_issue(&destination_key).await?;
    let source_key = context
        .source_key(&destination_key)
        .ok_or_else(|| SyncError::UnknownProject(destination_key.clone()))?;

    let current = match list {
        VersionList::Fix => &issue.fields.fix_versions,
        VersionList::Affects => &issue.fields.versions,
    };
    let mirrored: Vec<Version> = current
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|version| version.name.clone())
        .map(|name| Version { name: Some(name), ..Version::default() })
        .collect();

    let fields = match list {
        VersionList::Fix => Fields { fix_versions: Some(mirrored), ..Fields::default() },
        VersionList::Affects => Fields { versions: Some(mirrored), ..Fields::default() },
    };
    let update = Issue { fields, ..Issue::default() };
    context.source().update_issue(&source_key, &update).await?;
    Ok(())
}

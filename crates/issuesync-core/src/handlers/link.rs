//! Issue link replication handlers.
//!
//! Links between two replicated projects become regular issue links on
//! the destination. When only one end of the link is replicated, the
//! other end lives outside the group, so a web link pointing at the
//! upstream record is attached instead.

use std::sync::Arc;

use issuesync_client::RestError;
use issuesync_types::rest::{
    Issue, IssueLink, RemoteLink, RemoteLinkObject, SimpleObject,
};

use crate::context::GroupContext;
use crate::error::SyncError;
use crate::handlers::browse_url;
use crate::reporting::FailureCollector;

pub async fn upsert(context: Arc<GroupContext>, link_id: i64) -> Result<(), SyncError> {
    let source_link = match context.source().get_issue_link(link_id).await {
        Ok(link) => link,
        Err(error @ RestError::NotFound { .. }) => {
            context
                .collector()
                .critical(format!("source issue link {link_id} was not found: {error}"));
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    let outward_key = issue_key(source_link.outward_issue.as_ref())?;
    let inward_key = issue_key(source_link.inward_issue.as_ref())?;
    let outward = context.destination_key(&outward_key);
    let inward = context.destination_key(&inward_key);

    match (inward, outward) {
        (Some(inward), Some(outward)) => {
            replicate_between_projects(&context, &source_link, inward, outward).await
        }
        // one end lives outside the group; attach a web link to the
        // replicated end, pointing at the upstream record
        (Some(inward), None) => {
            let target = source_link.outward_issue.as_ref();
            remote_link(&context, &source_link, target, &inward).await
        }
        (None, Some(outward)) => {
            let target = source_link.inward_issue.as_ref();
            remote_link(&context, &source_link, target, &outward).await
        }
        (None, None) => {
            context.collector().warning(format!(
                "neither end of link {link_id} ({inward_key} <-> {outward_key}) is replicated"
            ));
            Ok(())
        }
    }
}

pub async fn deleted(
    context: Arc<GroupContext>,
    first_issue_id: i64,
    second_issue_id: i64,
    link_type_id: String,
) -> Result<(), SyncError> {
    let first = context.source().get_issue_by_id(first_issue_id).await?;
    let second = context.source().get_issue_by_id(second_issue_id).await?;
    let first_key = issue_key(Some(&first))?;
    let second_key = issue_key(Some(&second))?;

    // the hook may be stale: if a link of this type still exists
    // between the two source issues, nothing is deleted
    if let Some(links) = &first.fields.issuelinks {
        let still_linked = links.iter().any(|link| {
            let other = link
                .outward_issue
                .as_ref()
                .and_then(|issue| issue.key.as_deref())
                .or_else(|| link.inward_issue.as_ref().and_then(|issue| issue.key.as_deref()));
            other == Some(second_key.as_str())
                && link.link_type.as_ref().and_then(|t| t.id.as_deref()) == Some(link_type_id.as_str())
        });
        if still_linked {
            return Ok(());
        }
    }

    let first_destination = context
        .destination_key(&first_key)
        .ok_or_else(|| SyncError::UnknownProject(first_key.clone()))?;
    let second_destination = context
        .destination_key(&second_key)
        .ok_or_else(|| SyncError::UnknownProject(second_key.clone()))?;

    let group = context.group();
    let mapped_type = context
        .mappings()
        .link_type(group, context.source(), context.destination(), &link_type_id)
        .await?;

    let issue = context.destination().get_issue(&first_destination).await?;
    let Some(links) = &issue.fields.issuelinks else { return Ok(()) };
    for link in links {
        let other = link
            .outward_issue
            .as_ref()
            .and_then(|issue| issue.key.as_deref())
            .or_else(|| link.inward_issue.as_ref().and_then(|issue| issue.key.as_deref()));
        let type_matches = match (&mapped_type, link.link_type.as_ref().and_then(|t| t.id.as_deref())) {
            (Some(mapped), Some(id)) => mapped == id,
            // without a mapping we cannot narrow by type, delete by
            // endpoint match alone
            (None, _) => true,
            (Some(_), None) => false,
        };
        if other == Some(second_destination.as_str()) && type_matches {
            if let Some(id) = link.id.as_deref() {
                context.destination().delete_issue_link(id).await?;
            }
        }
    }
    Ok(())
}

async fn replicate_between_projects(
    context: &GroupContext,
    source_link: &IssueLink,
    inward: String,
    outward: String,
) -> Result<(), SyncError> {
    // both ends must exist downstream before a link can reference them
    if let Some(project) = context.project_for_destination_key(&inward) {
        project.keys.reserve_through(context.destination(), &inward).await?;
    }
    if let Some(project) = context.project_for_destination_key(&outward) {
        project.keys.reserve_through(context.destination(), &outward).await?;
    }

    let type_name = source_link.link_type.as_ref().and_then(|t| t.name.as_deref());
    let issue = context.destination().get_issue(&inward).await?;
    if let Some(links) = &issue.fields.issuelinks {
        let already_there = links.iter().any(|link| {
            let endpoint_matches = link
                .outward_issue
                .as_ref()
                .and_then(|issue| issue.key.as_deref())
                == Some(outward.as_str())
                || link.inward_issue.as_ref().and_then(|issue| issue.key.as_deref())
                    == Some(inward.as_str());
            endpoint_matches
                && link.link_type.as_ref().and_then(|t| t.name.as_deref()) == type_name
        });
        if already_there {
            return Ok(());
        }
    }

    let group = context.group();
    let mapped_type = match source_link.link_type.as_ref().and_then(|t| t.id.as_deref()) {
        Some(id) => {
            context
                .mappings()
                .link_type(group, context.source(), context.destination(), id)
                .await?
        }
        None => None,
    };
    let to_create = IssueLink {
        id: None,
        link_type: mapped_type.map(SimpleObject::with_id),
        inward_issue: Some(Issue { key: Some(inward), ..Issue::default() }),
        outward_issue: Some(Issue { key: Some(outward), ..Issue::default() }),
    };
    context.destination().create_issue_link(&to_create).await?;
    Ok(())
}

async fn remote_link(
    context: &GroupContext,
    source_link: &IssueLink,
    linked_issue: Option<&Issue>,
    replicated_key: &str,
) -> Result<(), SyncError> {
    let linked_key = issue_key(linked_issue)?;
    let url = linked_issue
        .and_then(|issue| issue.self_url.as_deref())
        .and_then(|self_url| browse_url(self_url, &linked_key))
        .unwrap_or_else(|| linked_key.clone());
    let link = RemoteLink {
        global_id: Some(url.clone()),
        relationship: source_link
            .link_type
            .as_ref()
            .and_then(|t| t.name.clone()),
        object: RemoteLinkObject { url, title: linked_key, summary: None },
    };
    context.destination().upsert_remote_link(replicated_key, &link).await?;
    Ok(())
}

fn issue_key(issue: Option<&Issue>) -> Result<String, SyncError> {
    issue
        .and_then(|issue| issue.key.clone())
        .ok_or_else(|| SyncError::MalformedEvent("issue link without issue keys".to_string()))
}

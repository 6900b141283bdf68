//! Comment replication handlers.
//!
//! Destination comments carry a quote header linking back to the source
//! comment. That link doubles as the correlation marker: the source
//! comment id is embedded in its query string, so upserts and deletes
//! find the destination counterpart by scanning comment bodies for it.

use std::sync::Arc;

use issuesync_client::RestError;
use issuesync_types::rest::{Comment, Comments, Issue};

use crate::context::GroupContext;
use crate::error::SyncError;
use crate::handlers::{comment_url, describe_user, truncate_content};
use crate::reporting::FailureCollector;

/// Comments fetched per destination lookup. One page is plenty: synced
/// issues rarely carry more, and a miss only means a duplicate comment.
const MAX_COMMENT_RESULTS: i64 = 5_000;

pub async fn upsert(
    context: Arc<GroupContext>,
    issue_id: i64,
    comment_id: i64,
) -> Result<(), SyncError> {
    let issue = context.source().get_issue_by_id(issue_id).await?;
    let comment = context.source().get_comment(issue_id, comment_id).await?;
    let source_key = issue
        .key
        .clone()
        .ok_or_else(|| SyncError::MalformedEvent(format!("issue {issue_id} carries no key")))?;
    let destination_key = context
        .destination_key(&source_key)
        .ok_or_else(|| SyncError::UnknownProject(source_key.clone()))?;

    // the issue itself is assumed to be synced already; if it is not,
    // there is nothing to attach the comment to
    let destination_comments = match context
        .destination()
        .get_comments(&destination_key, 0, MAX_COMMENT_RESULTS)
        .await
    {
        Ok(comments) => comments,
        Err(error @ RestError::NotFound { .. }) => {
            context.collector().critical(format!(
                "issue {destination_key} is missing downstream, cannot sync its comments: {error}"
            ));
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    let replicated = replicated_comment(&context, &issue, &comment);
    let marker = marker(comment_id);
    match find_marked(&destination_comments, &marker) {
        Some(existing) => {
            let id = existing.id.clone().unwrap_or_default();
            context.destination().update_comment(&destination_key, &id, &replicated).await?;
        }
        None => {
            context.destination().create_comment(&destination_key, &replicated).await?;
        }
    }
    Ok(())
}

pub async fn deleted(
    context: Arc<GroupContext>,
    issue_id: i64,
    comment_id: i64,
) -> Result<(), SyncError> {
    let issue = context.source().get_issue_by_id(issue_id).await?;
    let source_key = issue
        .key
        .clone()
        .ok_or_else(|| SyncError::MalformedEvent(format!("issue {issue_id} carries no key")))?;
    let destination_key = context
        .destination_key(&source_key)
        .ok_or_else(|| SyncError::UnknownProject(source_key.clone()))?;

    // the hook may be stale; only mirror the delete once the source
    // really answers 404 for the comment
    match context.source().get_comment(issue_id, comment_id).await {
        Err(RestError::NotFound { .. }) => {}
        Ok(_) => return Ok(()),
        Err(error) => return Err(error.into()),
    }

    let destination_comments = context
        .destination()
        .get_comments(&destination_key, 0, MAX_COMMENT_RESULTS)
        .await?;
    if let Some(found) = find_marked(&destination_comments, &marker(comment_id)) {
        let id = found.id.clone().unwrap_or_default();
        context.destination().delete_comment(&destination_key, &id).await?;
    }
    Ok(())
}

fn marker(comment_id: i64) -> String {
    format!("focusedCommentId={comment_id}")
}

fn find_marked<'a>(comments: &'a Comments, marker: &str) -> Option<&'a Comment> {
    comments
        .comments
        .iter()
        .find(|comment| comment.body.as_deref().is_some_and(|body| body.contains(marker)))
}

/// Quote header plus the original body, truncated to the remote cap.
fn replicated_comment(context: &GroupContext, issue: &Issue, source: &Comment) -> Comment {
    let issue_key = issue.key.as_deref().unwrap_or("unknown");
    let comment_id = source.id.as_deref().unwrap_or("unknown");
    let link = issue
        .self_url
        .as_deref()
        .and_then(|self_url| comment_url(self_url, issue_key, comment_id))
        .unwrap_or_else(|| format!("{issue_key}?focusedCommentId={comment_id}"));
    let author = describe_user(context, source.author.as_ref());
    let posted = source
        .created
        .map(|at| at.format("%d/%b/%y %l:%M %p").to_string())
        .unwrap_or_default();

    let edited = if source.is_updated_same_as_created() {
        String::new()
    } else {
        let editor = describe_user(context, source.update_author.as_ref());
        let at = source
            .updated
            .map(|at| at.format("%d/%b/%y %l:%M %p").to_string())
            .unwrap_or_default();
        format!("\n\n{editor} edited the comment on {at}.\n")
    };

    let body = format!(
        "{{quote}}This [comment|{link}] was posted by {author} on {posted}.{edited}{{quote}}\n\n\n{}",
        source.body.as_deref().unwrap_or("")
    );
    Comment { body: Some(truncate_content(body)), ..Comment::default() }
}

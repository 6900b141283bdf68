//! Event handlers.
//!
//! Every handler is an async function taking the group context plus the
//! minimal identifiers from the notification. Handlers never trust the
//! payload beyond those identifiers: the current remote state is always
//! re-fetched before mutating, because events for the same record may
//! interleave arbitrarily across directions.

pub mod action;
pub mod comment;
pub mod issue;
pub mod link;

use url::Url;

use issuesync_client::{RestError, TrackerClient};
use issuesync_types::rest::{Issue, SimpleObject, Transition, TransitionFields, User};

use crate::context::GroupContext;
use crate::error::SyncError;
use crate::reporting::FailureCollector;

/// Remote descriptions and comment bodies are capped by the tracker.
pub(crate) const MAX_CONTENT_SIZE: usize = 65_535;

/// The original is still reachable through the quote link, so the tail
/// is simply cut off.
pub(crate) fn truncate_content(mut content: String) -> String {
    if content.len() > MAX_CONTENT_SIZE {
        let mut cut = MAX_CONTENT_SIZE;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
    }
    content
}

/// `https://tracker.example.com/browse/KEY` derived from a record's
/// API self link.
pub(crate) fn browse_url(self_url: &str, key: &str) -> Option<String> {
    let mut url = Url::parse(self_url).ok()?;
    url.set_path(&format!("browse/{key}"));
    url.set_query(None);
    Some(url.to_string())
}

pub(crate) fn comment_url(self_url: &str, issue_key: &str, comment_id: &str) -> Option<String> {
    let mut url = Url::parse(self_url).ok()?;
    url.set_path(&format!("browse/{issue_key}"));
    url.set_query(Some(&format!("focusedCommentId={comment_id}")));
    Some(url.to_string())
}

/// Wiki-markup reference to a user: mapped users link to their
/// destination profile, everyone else is named without a link.
pub(crate) fn describe_user(context: &GroupContext, user: Option<&User>) -> String {
    let Some(user) = user else {
        return "unknown".to_string();
    };
    let id = user.id_part();
    if let Some(mapped) = context.mappings().user(id) {
        if let Some(template) = &context.group().users.profile_url {
            let url = template.replace("{id}", mapped);
            return format!("[{mapped}|{url}]");
        }
        return mapped.to_string();
    }
    format!("user {}", user.display_name.as_deref().unwrap_or(id))
}

/// Finds the transition leading to `target` among those currently
/// available on the issue. `target` may be a transition id, a transition
/// name, or the name of the target status.
pub(crate) async fn find_transition_id(
    client: &TrackerClient,
    key: &str,
    target: &str,
) -> Result<Option<String>, RestError> {
    let transitions = client.available_transitions(key).await?;
    Ok(transitions
        .transitions
        .into_iter()
        .find(|transition| {
            transition.id == target
                || transition
                    .name
                    .as_deref()
                    .is_some_and(|name| name.eq_ignore_ascii_case(target))
                || transition
                    .to
                    .as_ref()
                    .and_then(|to| to.name.as_deref())
                    .is_some_and(|name| name.eq_ignore_ascii_case(target))
        })
        .map(|transition| transition.id))
}

/// Applies the source issue's status to the destination issue. Statuses
/// are only writable through transitions, so the mapped target is
/// matched against the transitions currently available on the
/// destination record.
pub(crate) async fn apply_transition(
    context: &GroupContext,
    source_issue: &Issue,
    destination_issue: &Issue,
    destination_key: &str,
) -> Result<(), SyncError> {
    let Some(status) = &source_issue.fields.status else {
        return Ok(());
    };
    let Some(status_key) = status.name.as_deref().map(str::to_lowercase).or_else(|| status.id.clone())
    else {
        return Ok(());
    };
    let group = context.group();
    let target = context
        .mappings()
        .status_to_transition(group, context.source(), context.destination(), &status_key)
        .await?;
    let Some(target) = target else {
        return Ok(());
    };

    // already there, skip the write and the echo it would produce
    let current = destination_issue
        .fields
        .status
        .as_ref()
        .and_then(|current| current.name.as_deref());
    if current.is_some_and(|name| name.eq_ignore_ascii_case(&target)) {
        return Ok(());
    }

    let Some(transition_id) = find_transition_id(context.destination(), destination_key, &target).await?
    else {
        context.collector().warning(format!(
            "no transition towards '{target}' is available on {destination_key}"
        ));
        return Ok(());
    };

    let resolution = source_issue
        .fields
        .resolution
        .as_ref()
        .and_then(|resolution| resolution.name.as_deref())
        .and_then(|name| group.resolutions.mapping.get(&name.to_lowercase()))
        .map(|mapped| SimpleObject::with_name(mapped.clone()));

    let transition = Transition {
        transition: SimpleObject::with_id(transition_id),
        fields: resolution.map(|resolution| TransitionFields { resolution: Some(resolution) }),
    };
    context.destination().transition(destination_key, &transition).await?;
    Ok(())
}

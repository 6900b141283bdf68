//! Configuration surface of the daemon.
//!
//! A *project group* is one replication unit: a set of projects living in
//! one source tracker instance that is mirrored into a single destination
//! instance. Everything tunable (credentials, mappings, rate limits,
//! queue sizes, schedules) hangs off the group.

use std::collections::{HashMap, HashSet};

use base64::Engine;
use serde::Deserialize;

/// Root configuration, one entry per project group.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub project_group: HashMap<String, ProjectGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectGroup {
    /// The source (upstream) tracker instance.
    pub source: Instance,
    /// The destination (downstream) tracker instance.
    pub destination: Instance,

    /// Upstream-to-downstream user mapping. Unmapped users fall back to
    /// the service account (reporter) or `not_mapped_assignee`.
    pub users: UserMapping,
    /// Upstream-to-downstream priority id mapping.
    #[serde(default)]
    pub priorities: ValueMapping,
    /// Upstream-to-downstream issue link type mapping.
    #[serde(default)]
    pub issue_link_types: ValueMapping,
    /// Upstream status to downstream *transition* id mapping.
    #[serde(default)]
    pub statuses: ValueMapping,
    /// Upstream-to-downstream resolution name mapping.
    #[serde(default)]
    pub resolutions: ValueMapping,
    /// Upstream-to-downstream issue type mapping. The default value is
    /// also used for placeholder issues.
    pub issue_types: ValueMapping,

    /// Whether the destination permission scheme lets the service
    /// account set the reporter field. When `false` the reporter stays
    /// the service account.
    #[serde(default)]
    pub can_set_reporter: bool,

    /// Projects replicated within this group, keyed by a short name.
    pub projects: HashMap<String, Project>,

    /// Periodic reconciliation of recently updated issues.
    pub scheduled: Option<Scheduled>,

    /// Admission control and queue sizing for event processing.
    #[serde(default)]
    pub processing: EventProcessing,
}

/// Bidirectional association between one source project and one
/// destination project.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    /// Destination project id (numeric, not the key).
    pub project_id: String,
    /// Destination project key, i.e. the prefix of issue keys.
    pub project_key: String,
    /// Source project key.
    pub original_project_key: String,
}

/// Admission control knobs.
///
/// The remote instances enforce their own request limits (see the
/// `x-ratelimit-*` response headers), so the number of events processed
/// per timeframe is capped; an event past the cap blocks waiting for the
/// next timeframe. Each direction gets its own budget.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventProcessing {
    /// Events admitted per timeframe, per direction.
    pub events_per_timeframe: u32,
    /// Duration of one timeframe in seconds.
    pub timeframe_seconds: u64,
    /// Events that can sit on the pending queue before a submitter
    /// blocks waiting for space.
    pub queue_size: usize,
    /// Worker count per direction. More workers rarely help: throughput
    /// is usually bounded by `events_per_timeframe`.
    pub threads: usize,
    /// Placeholder issues created per bulk request when reserving keys.
    pub placeholder_batch_size: usize,
}

impl Default for EventProcessing {
    fn default() -> Self {
        Self {
            events_per_timeframe: 5,
            timeframe_seconds: 2,
            queue_size: 10_000,
            threads: 2,
            placeholder_batch_size: 25,
        }
    }
}

/// Reconciliation schedule for a project group.
#[derive(Debug, Clone, Deserialize)]
pub struct Scheduled {
    /// Cron expression (seconds granularity) for the re-sync job.
    pub cron: String,
    /// JQL-style relative time filter for the lookback window.
    #[serde(default = "default_time_filter")]
    pub time_filter: String,
}

fn default_time_filter() -> String {
    "-1d".to_string()
}

/// Connection details of one tracker instance.
#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    /// Base URI up to and including the API version, e.g.
    /// `https://tracker.example.com/rest/api/2`.
    pub api_uri: String,
    #[serde(default)]
    pub login_kind: LoginKind,
    pub api_user: ApiUser,
    /// Log request/response bodies of REST calls made to this instance.
    #[serde(default)]
    pub log_requests: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    /// Service account email/username.
    pub email: String,
    /// Personal access token or API token for the service account.
    pub token: String,
}

/// Some instances allow PAT logins while others only accept basic
/// authentication with a username and token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginKind {
    /// `username:token`, base64-encoded, in the auth header.
    #[default]
    Basic,
    /// A tracker-generated token passed as-is in the auth header.
    BearerToken,
}

impl LoginKind {
    /// The `Authorization` header value for the given credentials.
    pub fn authorization(&self, username: &str, token: &str) -> String {
        match self {
            LoginKind::Basic => {
                let raw = format!("{username}:{token}");
                format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
            }
            LoginKind::BearerToken => format!("Bearer {token}"),
        }
    }
}

/// Static id-to-id mapping with a fallback used when a value has no
/// counterpart on the destination side.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValueMapping {
    pub default_value: Option<String>,
    #[serde(default)]
    pub mapping: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserMapping {
    #[serde(default)]
    pub mapping: HashMap<String, String>,
    /// Assignee applied downstream when the upstream assignee has no
    /// mapping. Unset means "leave unassigned".
    pub not_mapped_assignee: Option<String>,
    /// Name of the user property carrying the mapped value: tracker
    /// servers expect `name`, cloud instances expect `accountId`.
    #[serde(default = "default_mapped_property")]
    pub mapped_property_name: String,
    /// Upstream actors whose events are dropped before enqueueing.
    #[serde(default)]
    pub ignored_upstream_users: HashSet<String>,
    /// Downstream actors whose mirror events are dropped, typically the
    /// replication service account itself.
    #[serde(default)]
    pub ignored_downstream_users: HashSet<String>,
    /// Template for profile links in quoted content; `{id}` is replaced
    /// with the mapped user id.
    pub profile_url: Option<String>,
}

fn default_mapped_property() -> String {
    "accountId".to_string()
}

impl UserMapping {
    pub fn is_upstream_ignored(&self, user: &str) -> bool {
        self.ignored_upstream_users.contains(user)
    }

    pub fn is_downstream_ignored(&self, user: &str) -> bool {
        self.ignored_downstream_users.contains(user)
    }
}

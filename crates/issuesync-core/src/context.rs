//! Per-group runtime state.
//!
//! A [`GroupContext`] owns everything one project group needs at
//! runtime: the two REST clients, one rate limiter and dispatcher per
//! direction, the field mapping cache, and per-project key allocators
//! and fix version caches. Contexts are built once at startup and live
//! until shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use issuesync_client::{RestError, TrackerClient};
use issuesync_types::config::{Project, ProjectGroup};
use issuesync_types::rest::{key_number, Version};

use crate::dispatch::{Dispatcher, WorkItem, DRAIN_TIMEOUT};
use crate::error::SyncError;
use crate::keys::KeyAllocator;
use crate::mapping::FieldMappingCache;
use crate::rate_limit::RateLimiter;
use crate::reporting::FailureCollector;

/// State of one replicated project within a group.
pub struct ProjectContext {
    pub name: String,
    pub project: Project,
    pub keys: KeyAllocator,
    /// Upstream version name to its downstream counterpart. Seeded on
    /// first use from both instances.
    fix_versions: tokio::sync::Mutex<Option<HashMap<String, Version>>>,
}

impl ProjectContext {
    fn new(name: &str, project: &Project, default_issue_type: Option<&str>, batch: usize) -> Self {
        Self {
            name: name.to_string(),
            project: project.clone(),
            keys: KeyAllocator::new(name, project, default_issue_type, batch),
            fix_versions: tokio::sync::Mutex::new(None),
        }
    }

    fn matches_source_key(&self, key: &str) -> bool {
        key.strip_prefix(&self.project.original_project_key)
            .is_some_and(|rest| rest.starts_with('-'))
    }

    fn matches_destination_key(&self, key: &str) -> bool {
        key.strip_prefix(&self.project.project_key)
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

struct Direction {
    limiter: Arc<RateLimiter>,
    dispatcher: Dispatcher,
}

pub struct GroupContext {
    name: String,
    group: ProjectGroup,
    source: TrackerClient,
    destination: TrackerClient,
    upstream: Direction,
    downstream: Direction,
    mappings: FieldMappingCache,
    projects: HashMap<String, Arc<ProjectContext>>,
    collector: Arc<dyn FailureCollector>,
}

impl GroupContext {
    pub fn new(
        name: &str,
        group: ProjectGroup,
        collector: Arc<dyn FailureCollector>,
    ) -> Result<Self, SyncError> {
        let source = TrackerClient::new(&group.source)?;
        let destination = TrackerClient::new(&group.destination)?;

        let processing = &group.processing;
        let window = Duration::from_secs(processing.timeframe_seconds);
        let direction = |label: &str| {
            let limiter = RateLimiter::start(
                format!("{name}-{label}"),
                processing.events_per_timeframe,
                window,
            );
            Direction {
                dispatcher: Dispatcher::start(
                    format!("{name}-{label}"),
                    processing.queue_size,
                    processing.threads,
                    Arc::clone(&limiter),
                ),
                limiter,
            }
        };
        let upstream = direction("sync");
        let downstream = direction("mirror");

        let mappings = FieldMappingCache::new(&group);
        let default_issue_type = group.issue_types.default_value.clone();
        let projects = group
            .projects
            .iter()
            .map(|(project_name, project)| {
                let context = ProjectContext::new(
                    project_name,
                    project,
                    default_issue_type.as_deref(),
                    processing.placeholder_batch_size,
                );
                (project_name.clone(), Arc::new(context))
            })
            .collect();

        info!(group = name, projects = group.projects.len(), "project group context ready");
        Ok(Self {
            name: name.to_string(),
            group,
            source,
            destination,
            upstream,
            downstream,
            mappings,
            projects,
            collector,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &ProjectGroup {
        &self.group
    }

    pub fn source(&self) -> &TrackerClient {
        &self.source
    }

    pub fn destination(&self) -> &TrackerClient {
        &self.destination
    }

    pub fn mappings(&self) -> &FieldMappingCache {
        &self.mappings
    }

    pub fn collector(&self) -> &Arc<dyn FailureCollector> {
        &self.collector
    }

    pub fn projects(&self) -> impl Iterator<Item = &Arc<ProjectContext>> {
        self.projects.values()
    }

    /// Project owning an upstream key like `UPWIDGET-42`.
    pub fn project_for_source_key(&self, key: &str) -> Option<&Arc<ProjectContext>> {
        self.projects.values().find(|project| project.matches_source_key(key))
    }

    /// Project owning a destination key like `WIDGET-42`.
    pub fn project_for_destination_key(&self, key: &str) -> Option<&Arc<ProjectContext>> {
        self.projects.values().find(|project| project.matches_destination_key(key))
    }

    /// Translates an upstream issue key to its destination counterpart.
    /// The key number is preserved, only the prefix changes.
    pub fn destination_key(&self, source_key: &str) -> Option<String> {
        let project = self.project_for_source_key(source_key)?;
        let number = key_number(source_key)?;
        Some(format!("{}-{number}", project.project.project_key))
    }

    /// The reverse translation, used by the mirror direction.
    pub fn source_key(&self, destination_key: &str) -> Option<String> {
        let project = self.project_for_destination_key(destination_key)?;
        let number = key_number(destination_key)?;
        Some(format!("{}-{number}", project.project.original_project_key))
    }

    pub async fn submit_upstream(&self, work: WorkItem) -> Result<(), SyncError> {
        self.upstream.dispatcher.submit(work).await
    }

    pub async fn submit_downstream(&self, work: WorkItem) -> Result<(), SyncError> {
        self.downstream.dispatcher.submit(work).await
    }

    /// Events accepted but not yet executed, across both directions.
    pub fn pending_events(&self) -> usize {
        self.upstream.dispatcher.pending() + self.downstream.dispatcher.pending()
    }

    /// Downstream counterpart of an upstream fix version, creating or
    /// updating it on the destination when needed. Returns `None` when
    /// the version cannot be replicated; the issue still syncs, just
    /// without it.
    pub async fn fix_version(&self, project: &ProjectContext, version: &Version) -> Option<Version> {
        self.fix_version_inner(project, version, false).await
    }

    /// Forced variant re-upserting even on a cache hit, used when a
    /// version itself changed upstream.
    pub async fn refresh_fix_version(
        &self,
        project: &ProjectContext,
        version: &Version,
    ) -> Option<Version> {
        self.fix_version_inner(project, version, true).await
    }

    async fn fix_version_inner(
        &self,
        project: &ProjectContext,
        version: &Version,
        force: bool,
    ) -> Option<Version> {
        let name = version.name.clone()?;
        let mut cache = project.fix_versions.lock().await;
        let map = match cache.as_mut() {
            Some(map) => map,
            None => {
                let seeded = self.seed_fix_versions(project).await;
                cache.insert(seeded)
            }
        };
        if !force {
            if let Some(known) = map.get(&name) {
                return Some(known.clone());
            }
        }
        let downstream = self.destination.versions(&project.project.project_key).await.ok()?;
        match self.upsert_version(project, version, &downstream).await {
            Ok(created) => {
                map.insert(name, created.clone());
                Some(created)
            }
            Err(error) => {
                error!(project = %project.name, version = %name, %error,
                    "could not replicate fix version");
                None
            }
        }
    }

    /// Rebuilds the version cache from both instances, creating missing
    /// destination versions along the way.
    pub async fn refresh_fix_versions(&self, project: &ProjectContext) {
        let seeded = self.seed_fix_versions(project).await;
        *project.fix_versions.lock().await = Some(seeded);
    }

    async fn seed_fix_versions(&self, project: &ProjectContext) -> HashMap<String, Version> {
        let mut map = HashMap::new();
        let upstream = match self.source.versions(&project.project.original_project_key).await {
            Ok(versions) => versions,
            Err(error) => {
                error!(project = %project.name, %error, "could not list upstream versions");
                return map;
            }
        };
        let downstream = match self.destination.versions(&project.project.project_key).await {
            Ok(versions) => versions,
            Err(error) => {
                error!(project = %project.name, %error, "could not list destination versions");
                return map;
            }
        };
        for version in upstream {
            let Some(name) = version.name.clone() else { continue };
            match self.upsert_version(project, &version, &downstream).await {
                Ok(replicated) => {
                    map.insert(name, replicated);
                }
                Err(error) => {
                    error!(project = %project.name, version = %name, %error,
                        "could not replicate fix version");
                }
            }
        }
        map
    }

    async fn upsert_version(
        &self,
        project: &ProjectContext,
        upstream: &Version,
        downstream: &[Version],
    ) -> Result<Version, RestError> {
        let marker = upstream_version_marker(upstream);
        let existing = downstream
            .iter()
            .find(|candidate| candidate.description.as_deref() == Some(marker.as_str()));
        let copy = upstream.copy_for_project(&project.project.project_id, &marker);
        match existing {
            None => {
                info!(project = %project.name, version = ?upstream.name, "creating fix version");
                self.destination.create_version(&copy).await
            }
            Some(found) if upstream.needs_update(found) => {
                let id = found.id.clone().unwrap_or_default();
                info!(project = %project.name, version = ?upstream.name, "updating fix version");
                self.destination.update_version(&id, &copy).await
            }
            Some(found) => Ok(found.clone()),
        }
    }

    /// Stops the reset timers first, then drains both queues: the drain
    /// runs on whatever permits are left in the current window, and
    /// items still blocked at the deadline are abandoned.
    pub async fn close(&self) {
        self.upstream.limiter.shutdown();
        self.downstream.limiter.shutdown();
        self.upstream.dispatcher.shutdown(DRAIN_TIMEOUT).await;
        self.downstream.dispatcher.shutdown(DRAIN_TIMEOUT).await;
        info!(group = %self.name, "project group context closed");
    }
}

/// Version descriptions on the destination carry the upstream id so
/// repeated syncs find their counterpart without name matching.
fn upstream_version_marker(upstream: &Version) -> String {
    format!(
        "Upstream version id: {}",
        upstream.id.as_deref().unwrap_or("unknown")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project(name: &str, destination: &str, original: &str) -> (String, Project) {
        (
            name.to_string(),
            Project {
                project_id: "1".to_string(),
                project_key: destination.to_string(),
                original_project_key: original.to_string(),
            },
        )
    }

    fn context_with_projects() -> GroupContext {
        let raw = serde_json::json!({
            "source": {
                "api_uri": "https://up.example.com/rest/api/2",
                "api_user": { "email": "bot@example.com", "token": "t" }
            },
            "destination": {
                "api_uri": "https://down.example.com/rest/api/2",
                "api_user": { "email": "bot@example.com", "token": "t" }
            },
            "users": {},
            "issue_types": { "default_value": "3" },
            "projects": {}
        });
        let mut group: ProjectGroup = serde_json::from_value(raw).unwrap();
        group.projects.extend([
            sample_project("WIDGET", "WIDGET", "UPWIDGET"),
            sample_project("WID", "WID", "UPWID"),
        ]);
        GroupContext::new("test", group, Arc::new(crate::reporting::LogCollector)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn close_does_not_refill_during_the_drain() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let raw = serde_json::json!({
            "source": {
                "api_uri": "https://up.example.com/rest/api/2",
                "api_user": { "email": "bot@example.com", "token": "t" }
            },
            "destination": {
                "api_uri": "https://down.example.com/rest/api/2",
                "api_user": { "email": "bot@example.com", "token": "t" }
            },
            "users": {},
            "issue_types": {},
            "projects": {},
            "processing": { "events_per_timeframe": 1, "timeframe_seconds": 2 }
        });
        let group: ProjectGroup = serde_json::from_value(raw).unwrap();
        let context =
            GroupContext::new("test", group, Arc::new(crate::reporting::LogCollector)).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let ran = Arc::clone(&ran);
            context
                .submit_upstream(Box::pin(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                }))
                .await
                .unwrap();
        }
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        // one permit in the window, so only the first item ran
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        // the reset timers stop before the drain; were they still
        // running, the 2s window would refill well within the drain
        // deadline and let the second item through
        context.close().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn key_translation_preserves_the_number() {
        let context = context_with_projects();
        assert_eq!(context.destination_key("UPWIDGET-42"), Some("WIDGET-42".to_string()));
        assert_eq!(context.source_key("WIDGET-42"), Some("UPWIDGET-42".to_string()));
        assert_eq!(context.destination_key("ELSEWHERE-1"), None);
        context.close().await;
    }

    #[tokio::test]
    async fn prefix_match_requires_the_dash() {
        // UPWID must not swallow UPWIDGET keys
        let context = context_with_projects();
        let owner = context.project_for_source_key("UPWID-7").unwrap();
        assert_eq!(owner.name, "WID");
        let owner = context.project_for_source_key("UPWIDGET-7").unwrap();
        assert_eq!(owner.name, "WIDGET");
        context.close().await;
    }
}

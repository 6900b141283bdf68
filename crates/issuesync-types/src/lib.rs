//! # issuesync-types
//!
//! Shared types for the issuesync replication daemon:
//! - [`config`]: the per-tenant configuration surface (instances,
//!   project mappings, rate limits, schedules).
//! - [`rest`]: payloads exchanged with the tracker REST API.
//! - [`hook`]: validated inbound notifications (webhook and mirror
//!   events) and their event-kind tags.

pub mod config;
pub mod hook;
pub mod rest;

pub use config::{Instance, LoginKind, Project, ProjectGroup, SyncConfig};
pub use hook::{ActionEvent, ActionKind, EventKind, WebhookEvent};

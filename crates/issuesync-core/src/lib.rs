//! Replication engine.
//!
//! Turns validated webhook notifications into remote writes: admission
//! control ([`rate_limit`]), bounded dispatch ([`dispatch`]), issue key
//! reservation ([`keys`]), field mapping ([`mapping`]) and the event
//! handlers themselves ([`handlers`]). [`service::SyncService`] is the
//! entry point the HTTP layer talks to.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod mapping;
pub mod rate_limit;
pub mod reporting;
pub mod scheduler;
pub mod service;

pub use context::{GroupContext, ProjectContext};
pub use error::SyncError;
pub use reporting::{Failure, FailureCollector, LogCollector, Severity};
pub use scheduler::SyncScheduler;
pub use service::{QueryMode, SyncService, SYSTEM_ACTOR};

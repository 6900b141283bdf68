//! # issuesync-client
//!
//! REST client for tracker instances with bounded retry and explicit
//! error classification. All outbound calls of the replication engine go
//! through [`TrackerClient`]; retry policy lives here so handlers never
//! have to reason about transient remote failures.

mod client;
mod error;

pub use client::TrackerClient;
pub use error::{classify, RestError, RetryClass, RETRY_DELAY};

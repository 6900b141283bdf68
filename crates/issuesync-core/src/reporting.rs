//! Failure reporting.
//!
//! Handlers run detached from the webhook request that spawned them, so
//! problems found while applying an event cannot surface as an HTTP
//! error. They go to a collector instead. The default sink logs;
//! tests plug in a channel sink to assert on what was reported.

use std::sync::Arc;

use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The event was applied, possibly with degraded fidelity.
    Warning,
    /// The event could not be applied.
    Critical,
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub severity: Severity,
    pub details: String,
}

pub trait FailureCollector: Send + Sync {
    fn report(&self, failure: Failure);

    fn warning(&self, details: impl Into<String>)
    where
        Self: Sized,
    {
        self.report(Failure { severity: Severity::Warning, details: details.into() });
    }

    fn critical(&self, details: impl Into<String>)
    where
        Self: Sized,
    {
        self.report(Failure { severity: Severity::Critical, details: details.into() });
    }
}

impl FailureCollector for Arc<dyn FailureCollector> {
    fn report(&self, failure: Failure) {
        self.as_ref().report(failure);
    }
}

/// Writes every failure to the log, keyed by severity.
pub struct LogCollector;

impl FailureCollector for LogCollector {
    fn report(&self, failure: Failure) {
        match failure.severity {
            Severity::Warning => warn!(details = %failure.details, "sync warning"),
            Severity::Critical => error!(details = %failure.details, "sync failure"),
        }
    }
}

/// Forwards failures to an unbounded channel. Test-oriented, but also
/// usable to feed an external reporter.
pub struct ChannelCollector {
    sender: tokio::sync::mpsc::UnboundedSender<Failure>,
}

impl ChannelCollector {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Failure>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl FailureCollector for ChannelCollector {
    fn report(&self, failure: Failure) {
        // a dropped receiver means nobody cares anymore
        let _ = self.sender.send(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_collector_preserves_order_and_severity() {
        let (collector, mut received) = ChannelCollector::new();
        collector.warning("field mapping fell back to default");
        collector.critical("issue could not be updated");

        let first = received.try_recv().unwrap();
        assert_eq!(first.severity, Severity::Warning);
        let second = received.try_recv().unwrap();
        assert_eq!(second.severity, Severity::Critical);
        assert!(second.details.contains("could not be updated"));
        assert!(received.try_recv().is_err());
    }
}

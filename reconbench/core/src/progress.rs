//! Progress reporting from engine adapters to whoever owns the job.
//!
//! An adapter receives a [`ProgressReporter`] and calls [`ProgressReporter::report`]
//! at every stage boundary. Updates travel over an mpsc channel so the adapter
//! never touches job state directly. Reports are filtered to be strictly
//! increasing and capped at 100 before they are sent.

use reconbench_schemas::ToolName;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// A single progress update for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub tool: ToolName,
    pub percent: u8,
}

/// Sending half handed to a running adapter.
#[derive(Debug)]
pub struct ProgressReporter {
    tool: ToolName,
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    last: AtomicU8,
}

impl ProgressReporter {
    /// Reporter wired to a fresh channel.
    pub fn channel(tool: ToolName) -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = Self {
            tool,
            tx: Some(tx),
            last: AtomicU8::new(0),
        };
        (reporter, rx)
    }

    /// Reporter that only tracks the last value.
    pub fn detached(tool: ToolName) -> Self {
        Self {
            tool,
            tx: None,
            last: AtomicU8::new(0),
        }
    }

    pub fn tool(&self) -> ToolName {
        self.tool
    }

    /// Highest percentage reported so far.
    pub fn last(&self) -> u8 {
        self.last.load(Ordering::Acquire)
    }

    /// Report `percent` completion. Values not above the last report are dropped.
    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let previous = self.last.fetch_max(percent, Ordering::AcqRel);
        if percent <= previous {
            return;
        }

        debug!(tool = %self.tool, percent, "Progress");
        if let Some(tx) = &self.tx {
            // receiver gone means nobody is listening any more
            let _ = tx.send(ProgressUpdate {
                tool: self.tool,
                percent,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_are_strictly_increasing() {
        let (reporter, mut rx) = ProgressReporter::channel(ToolName::Colmap);

        for percent in [10, 30, 30, 20, 50, 150, 90] {
            reporter.report(percent);
        }
        drop(reporter);

        let mut received = Vec::new();
        while let Some(update) = rx.recv().await {
            assert_eq!(update.tool, ToolName::Colmap);
            received.push(update.percent);
        }
        assert_eq!(received, vec![10, 30, 50, 100]);
    }

    #[test]
    fn detached_reporter_tracks_last_value() {
        let reporter = ProgressReporter::detached(ToolName::OpenSfm);
        reporter.report(45);
        reporter.report(25);
        assert_eq!(reporter.last(), 45);
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (reporter, rx) = ProgressReporter::channel(ToolName::Pmvs2);
        drop(rx);
        reporter.report(70);
        assert_eq!(reporter.last(), 70);
    }
}

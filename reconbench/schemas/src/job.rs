//! Job and per-tool progress records.
//!
//! A [`Job`] fans one image set out to several engines. Each engine's progress is
//! tracked by a [`ToolStatus`] whose transitions are only reachable through the
//! methods below, so the state machine cannot be bypassed:
//!
//! ```text
//! waiting ──start──▶ running ──complete──▶ completed
//!                       │
//!                       └────fail────────▶ failed
//! ```
//!
//! A tool that never started can also be failed directly (for instance when the
//! job is cancelled before it was dispatched).

use crate::{metrics::Metrics, tools::ToolName};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = Uuid;

/// Aggregate state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Running,
    Completed,
    Partial,
    Failed,
}

impl JobStatus {
    /// Terminal status derived from the final state of every tool.
    ///
    /// All completed yields `Completed`, all failed yields `Failed`, any mix yields `Partial`.
    pub fn aggregate<'a>(states: impl IntoIterator<Item = &'a ToolState>) -> JobStatus {
        let (mut completed, mut failed) = (0usize, 0usize);
        for state in states {
            match state {
                ToolState::Completed => completed += 1,
                ToolState::Failed => failed += 1,
                ToolState::Waiting | ToolState::Running => return JobStatus::Running,
            }
        }

        match (completed, failed) {
            (_, 0) => JobStatus::Completed,
            (0, _) => JobStatus::Failed,
            _ => JobStatus::Partial,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed
        )
    }
}

/// State of a single tool inside a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum ToolState {
    Waiting,
    Running,
    Completed,
    Failed,
}

/// Progress record of one tool in a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct ToolStatus {
    status: ToolState,
    progress: u8,
    output: Option<String>,
    metrics: Option<Metrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Default for ToolStatus {
    fn default() -> Self {
        Self {
            status: ToolState::Waiting,
            progress: 0,
            output: None,
            metrics: None,
            error: None,
        }
    }
}

impl ToolStatus {
    pub fn state(&self) -> ToolState {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// `waiting → running`. Returns false if the tool was not waiting.
    pub fn start(&mut self) -> bool {
        if self.status != ToolState::Waiting {
            return false;
        }
        self.status = ToolState::Running;
        self.progress = 0;
        true
    }

    /// Record an intermediate progress value while running.
    ///
    /// Values are capped at 100 and must be strictly greater than the current
    /// progress; anything else is ignored.
    pub fn advance(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.status != ToolState::Running || percent <= self.progress {
            return false;
        }
        self.progress = percent;
        true
    }

    /// `running → completed`, progress pinned at 100.
    pub fn complete(&mut self, output: Option<String>, metrics: Metrics) -> bool {
        if self.status != ToolState::Running {
            return false;
        }
        self.status = ToolState::Completed;
        self.progress = 100;
        self.output = output;
        self.metrics = Some(metrics);
        self.error = None;
        true
    }

    /// `waiting|running → failed`, progress reset to 0.
    pub fn fail(&mut self, error: impl Into<String>, metrics: Option<Metrics>) -> bool {
        if matches!(self.status, ToolState::Completed | ToolState::Failed) {
            return false;
        }
        self.status = ToolState::Failed;
        self.progress = 0;
        self.output = None;
        self.metrics = metrics;
        self.error = Some(error.into());
        true
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ToolState::Completed | ToolState::Failed)
    }
}

/// Per-tool records of a job, kept in request order and serialized as a JSON object
/// keyed by tool name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolStatuses(Vec<(ToolName, ToolStatus)>);

impl ToolStatuses {
    /// One waiting record per tool; repeated tools keep their first position.
    pub fn waiting(tools: impl IntoIterator<Item = ToolName>) -> Self {
        let mut entries: Vec<(ToolName, ToolStatus)> = Vec::new();
        for tool in tools {
            if !entries.iter().any(|(name, _)| *name == tool) {
                entries.push((tool, ToolStatus::default()));
            }
        }
        Self(entries)
    }

    pub fn get(&self, tool: ToolName) -> Option<&ToolStatus> {
        self.0
            .iter()
            .find(|(name, _)| *name == tool)
            .map(|(_, status)| status)
    }

    pub fn get_mut(&mut self, tool: ToolName) -> Option<&mut ToolStatus> {
        self.0
            .iter_mut()
            .find(|(name, _)| *name == tool)
            .map(|(_, status)| status)
    }

    pub fn names(&self) -> Vec<ToolName> {
        self.0.iter().map(|(name, _)| *name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ToolName, &ToolStatus)> {
        self.0.iter().map(|(name, status)| (*name, status))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn from_entries(entries: Vec<(ToolName, ToolStatus)>) -> Self {
        Self(entries)
    }
}

/// A multi-tool reconstruction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: JobId,
    pub status: JobStatus,
    #[cfg_attr(
        feature = "schema_gen",
        schemars(with = "std::collections::BTreeMap<ToolName, ToolStatus>")
    )]
    pub tools: ToolStatuses,
}

impl Job {
    pub fn new(job_id: JobId, tools: impl IntoIterator<Item = ToolName>) -> Self {
        Self {
            job_id,
            status: JobStatus::Starting,
            tools: ToolStatuses::waiting(tools),
        }
    }

    /// Recompute the aggregate status once every tool reached a terminal state.
    ///
    /// Returns the new status, or `None` while at least one tool is still pending.
    pub fn settle(&mut self) -> Option<JobStatus> {
        if !self.tools.iter().all(|(_, status)| status.is_terminal()) {
            return None;
        }
        self.status = JobStatus::aggregate(self.tools.0.iter().map(|(_, s)| &s.status));
        Some(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    fn metrics() -> Metrics {
        Metrics::new(Duration::from_millis(1500), 0, 10, true)
    }

    #[test]
    fn tool_lifecycle_success() {
        let mut status = ToolStatus::default();
        assert_eq!(status.state(), ToolState::Waiting);

        assert!(status.start());
        assert!(status.advance(30));
        assert!(!status.advance(30));
        assert!(!status.advance(10));
        assert_eq!(status.progress(), 30);

        assert!(status.complete(Some("/out/fused.ply".into()), metrics()));
        assert_eq!(status.state(), ToolState::Completed);
        assert_eq!(status.progress(), 100);
        assert_eq!(status.output(), Some("/out/fused.ply"));

        assert!(!status.advance(50));
        assert!(!status.fail("late", None));
    }

    #[test]
    fn failure_resets_progress_and_freezes() {
        let mut status = ToolStatus::default();
        status.start();
        status.advance(70);

        assert!(status.fail("stereo crashed", None));
        assert_eq!(status.progress(), 0);
        assert_eq!(status.error(), Some("stereo crashed"));

        assert!(!status.advance(90));
        assert_eq!(status.progress(), 0);
    }

    #[test]
    fn advance_caps_at_one_hundred() {
        let mut status = ToolStatus::default();
        status.start();
        assert!(status.advance(250));
        assert_eq!(status.progress(), 100);
    }

    #[test]
    fn waiting_tool_can_be_failed_directly() {
        let mut status = ToolStatus::default();
        assert!(status.fail("cancelled before dispatch", None));
        assert!(!status.start());
    }

    #[rstest]
    #[case(vec![ToolState::Completed, ToolState::Completed], JobStatus::Completed)]
    #[case(vec![ToolState::Failed, ToolState::Failed], JobStatus::Failed)]
    #[case(vec![ToolState::Completed, ToolState::Failed], JobStatus::Partial)]
    #[case(vec![ToolState::Completed, ToolState::Running], JobStatus::Running)]
    fn aggregate_status(#[case] states: Vec<ToolState>, #[case] expected: JobStatus) {
        assert_eq!(JobStatus::aggregate(&states), expected);
    }

    #[test]
    fn duplicate_tools_are_collapsed() {
        let job = Job::new(
            Uuid::new_v4(),
            [ToolName::OpenMvs, ToolName::Colmap, ToolName::OpenMvs],
        );
        assert_eq!(job.tools.names(), vec![ToolName::OpenMvs, ToolName::Colmap]);
    }

    #[test]
    fn settle_waits_for_every_tool() {
        let mut job = Job::new(Uuid::new_v4(), [ToolName::Colmap, ToolName::Pmvs2]);
        job.status = JobStatus::Running;

        let colmap = job.tools.get_mut(ToolName::Colmap).unwrap();
        colmap.start();
        colmap.complete(None, metrics());
        assert_eq!(job.settle(), None);
        assert_eq!(job.status, JobStatus::Running);

        job.tools
            .get_mut(ToolName::Pmvs2)
            .unwrap()
            .fail("missing binary", None);
        assert_eq!(job.settle(), Some(JobStatus::Partial));
    }

    #[test]
    fn job_serializes_tools_as_ordered_object() {
        let job = Job::new(Uuid::nil(), [ToolName::OpenSfm, ToolName::Colmap]);
        let json = serde_json::to_string(&job).unwrap();

        let opensfm = json.find("\"OpenSfM\"").unwrap();
        let colmap = json.find("\"COLMAP\"").unwrap();
        assert!(opensfm < colmap);
        assert!(json.contains("\"jobId\":\"00000000-0000-0000-0000-000000000000\""));
        assert!(json.contains("\"status\":\"starting\""));

        let decoded: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, job);
    }
}

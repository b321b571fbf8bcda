use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ClientError;

pub type JobId = u64;

/// Processing state of an uploaded file, as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Processing => 1,
            JobState::Completed | JobState::Failed => 2,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Wire shape of one status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub process_status: JobState,
    #[serde(default)]
    pub process_progress: u8,
}

/// Client-side view of a processing job. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: JobId,
    pub state: JobState,
    pub progress: u8,
}

impl JobRecord {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: JobState::Pending,
            progress: 0,
        }
    }

    /// Applies a status report. Returns `false` (leaving the record untouched)
    /// when the report would move the job backwards or out of a terminal state.
    pub fn advance(&mut self, status: &JobStatus) -> bool {
        let next = status.process_status;
        if self.state.is_terminal() && next != self.state {
            return false;
        }
        if next.rank() < self.state.rank() {
            return false;
        }
        self.state = next;
        self.progress = self.progress.max(status.process_progress.min(100));
        if next == JobState::Completed {
            self.progress = 100;
        }
        true
    }
}

/// How a watch on a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    /// The backend confirmed the job failed.
    Failed,
    /// A status check failed; the job's real state is unknown.
    Unknown(ClientError),
    /// The poller gave up after its maximum duration.
    TimedOut,
    Cancelled,
}

impl PollOutcome {
    pub fn from_terminal(state: JobState) -> Option<Self> {
        match state {
            JobState::Completed => Some(PollOutcome::Completed),
            JobState::Failed => Some(PollOutcome::Failed),
            JobState::Pending | JobState::Processing => None,
        }
    }
}

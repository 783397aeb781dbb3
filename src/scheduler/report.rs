use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::errors::HashError;
use crate::hasher::{HashState, StepHasher};

/// Sequence number of an admitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash {}", self.0)
    }
}

/// How much work each round of [`super::StepScheduler::run`] may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Bytes(u64),
    Time(Duration),
}

/// Scheduler-level view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobState {
    Waiting,
    Running,
    Done,
    Aborted,
    Timeout,
    Error(String),
}

impl JobState {
    pub(crate) fn of(hasher: &StepHasher) -> Self {
        let timed_out = matches!(
            hasher.outcome().and_then(|o| o.error.as_ref()),
            Some(HashError::Timeout)
        );
        match hasher.state() {
            HashState::Idle => JobState::Waiting,
            HashState::Running => JobState::Running,
            HashState::Finished => JobState::Done,
            HashState::Aborted if timed_out => JobState::Timeout,
            HashState::Aborted => JobState::Aborted,
            HashState::Failed(reason) => JobState::Error(reason.clone()),
        }
    }
}

/// Snapshot of a job for status displays and the completed history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub id: JobId,
    pub label: String,
    pub type_string: String,
    pub state: JobState,
    pub bytes_hashed: u64,
    pub units_hashed: usize,
    pub time_used: Duration,
    pub estimated: Duration,
}

impl JobReport {
    pub(crate) fn new(
        id: JobId,
        hasher: &StepHasher,
        time_used: Duration,
    ) -> Self {
        Self {
            id,
            label: hasher.label().to_owned(),
            type_string: hasher.type_string(),
            state: JobState::of(hasher),
            bytes_hashed: hasher.bytes_hashed(),
            units_hashed: hasher.units_hashed(),
            time_used,
            estimated: hasher.estimated_duration(),
        }
    }
}

/// What one call to `run` achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rounds: u64,
    pub bytes_hashed: u64,
    /// Jobs that left the active set during this run
    pub completed: Vec<JobId>,
    /// The deadline passed while jobs were still active
    pub suspended: bool,
    /// A whole round went by without any job reading a byte or finishing
    pub stalled: bool,
}

use serde::{Deserialize, Serialize};

/// Scheduler-assigned id of a submitted job or DAG.
pub type ClusterId = u64;

/// Attributes requested on every status query.
pub const STATUS_FIELDS: &[&str] = &[
    "ClusterId",
    "JobStatus",
    "HoldReasonCode",
    "HoldReason",
    "LastRejMatchReason",
    "RequestMemory",
];

/// Queue state of a job, from the scheduler's integer `JobStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Running,
    Removed,
    Completed,
    Held,
    TransferringOutput,
    Suspended,
    Unknown(i32),
}

impl From<i32> for JobState {
    fn from(code: i32) -> Self {
        match code {
            1 => JobState::Idle,
            2 => JobState::Running,
            3 => JobState::Removed,
            4 => JobState::Completed,
            5 => JobState::Held,
            6 => JobState::TransferringOutput,
            7 => JobState::Suspended,
            other => JobState::Unknown(other),
        }
    }
}

impl From<JobState> for i32 {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Idle => 1,
            JobState::Running => 2,
            JobState::Removed => 3,
            JobState::Completed => 4,
            JobState::Held => 5,
            JobState::TransferringOutput => 6,
            JobState::Suspended => 7,
            JobState::Unknown(code) => code,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Running => write!(f, "running"),
            JobState::Removed => write!(f, "removed"),
            JobState::Completed => write!(f, "completed"),
            JobState::Held => write!(f, "held"),
            JobState::TransferringOutput => write!(f, "transferring output"),
            JobState::Suspended => write!(f, "suspended"),
            JobState::Unknown(code) => write!(f, "unknown ({})", code),
        }
    }
}

/// Why the scheduler put a job on hold, from `HoldReasonCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    MemoryExceeded,
    InvalidImage,
    JobDurationExceeded,
    ExecuteTimeExceeded,
    Other(i32),
}

impl From<i32> for HoldReason {
    fn from(code: i32) -> Self {
        match code {
            34 => HoldReason::MemoryExceeded,
            35 => HoldReason::InvalidImage,
            46 => HoldReason::JobDurationExceeded,
            47 => HoldReason::ExecuteTimeExceeded,
            other => HoldReason::Other(other),
        }
    }
}

/// One row of a status query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StatusRow {
    pub cluster_id: ClusterId,
    pub job_status: i32,
    pub hold_reason_code: Option<i32>,
    pub hold_reason: Option<String>,
    pub last_rej_match_reason: Option<String>,
    pub request_memory: Option<u64>,
}

impl StatusRow {
    pub fn new(cluster_id: ClusterId, state: JobState) -> Self {
        Self {
            cluster_id,
            job_status: state.into(),
            ..Default::default()
        }
    }

    pub fn held(cluster_id: ClusterId, code: i32, reason: impl Into<String>) -> Self {
        Self {
            hold_reason_code: Some(code),
            hold_reason: Some(reason.into()),
            ..Self::new(cluster_id, JobState::Held)
        }
    }

    pub fn state(&self) -> JobState {
        JobState::from(self.job_status)
    }

    pub fn hold_reason(&self) -> Option<HoldReason> {
        if self.state() != JobState::Held {
            return None;
        }
        self.hold_reason_code.map(HoldReason::from)
    }
}

/// One row of the scheduler's history for a finished cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HistoryRow {
    pub cluster_id: ClusterId,
    pub exit_code: Option<i32>,
}

/// Entry of a user event log; only the cluster is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub cluster: ClusterId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobAction {
    Remove,
    Release,
    Hold,
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobAction::Remove => write!(f, "remove"),
            JobAction::Release => write!(f, "release"),
            JobAction::Hold => write!(f, "hold"),
        }
    }
}

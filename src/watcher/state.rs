use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ResubmitBudget;
use crate::graph::{DagPaths, Job};
use crate::scheduler::ClusterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatcherPhase {
    Created,
    Submitted,
    Polling,
    FinishedOk,
    FinishedError,
    /// A sub-job is on hold waiting for a human.
    Held,
}

impl WatcherPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WatcherPhase::FinishedOk | WatcherPhase::FinishedError | WatcherPhase::Held
        )
    }
}

impl std::fmt::Display for WatcherPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatcherPhase::Created => write!(f, "created"),
            WatcherPhase::Submitted => write!(f, "submitted"),
            WatcherPhase::Polling => write!(f, "polling"),
            WatcherPhase::FinishedOk => write!(f, "finished"),
            WatcherPhase::FinishedError => write!(f, "failed"),
            WatcherPhase::Held => write!(f, "held"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResubmitCause {
    /// DAG wall time exceeded the watcher timeout.
    Timeout,
    /// A sub-job was held for exceeding its duration or execute time.
    ExecutionTime,
    /// GPU out-of-memory found in a job log.
    OutOfMemory,
    /// A sub-job was held for exceeding its memory request.
    MemoryLimit,
}

impl std::fmt::Display for ResubmitCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResubmitCause::Timeout => write!(f, "timeout"),
            ResubmitCause::ExecutionTime => write!(f, "execution time exceeded"),
            ResubmitCause::OutOfMemory => write!(f, "out of GPU memory"),
            ResubmitCause::MemoryLimit => write!(f, "memory limit exceeded"),
        }
    }
}

/// Combined and per-cause resubmission counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResubmitCounter {
    pub total: u32,
    pub per_cause: BTreeMap<ResubmitCause, u32>,
}

impl ResubmitCounter {
    pub fn count(&self, cause: ResubmitCause) -> u32 {
        self.per_cause.get(&cause).copied().unwrap_or(0)
    }

    /// Record one resubmission if the budget allows it.
    pub fn try_consume(&mut self, cause: ResubmitCause, limit: u32, budget: ResubmitBudget) -> bool {
        let used = match budget {
            ResubmitBudget::Shared => self.total,
            ResubmitBudget::PerCause => self.count(cause),
        };
        if used >= limit {
            return false;
        }
        self.total += 1;
        *self.per_cause.entry(cause).or_default() += 1;
        true
    }
}

/// Fixed-size log of timestamped error notes; the oldest entry is dropped first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLog {
    capacity: usize,
    entries: VecDeque<String>,
    dropped: u64,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, message: impl AsRef<str>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(format!(
            "[{}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            message.as_ref()
        ));
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted because the log was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Everything a watcher knows about one DAG. Serializable so a fleet can be
/// restored after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagWatcherState {
    pub id: Uuid,
    pub task_file: Option<PathBuf>,
    pub paths: DagPaths,
    pub jobs: Vec<Job>,
    pub cluster_id: Option<ClusterId>,
    pub start_time: Option<DateTime<Utc>>,
    pub timeout_secs: Option<u64>,
    pub resubmits: ResubmitCounter,
    /// Next index into the CPU memory tiers; never decreases.
    pub request_memory_index: usize,
    pub error_status: BTreeMap<String, String>,
    pub error_log: ErrorLog,
    pub sub_job_ids: BTreeSet<ClusterId>,
    pub phase: WatcherPhase,
    /// When all finish markers were first seen while the DAG was still live.
    pub finished_seen_at: Option<DateTime<Utc>>,
    pub global_error_file: Option<PathBuf>,
    pub oom_rotations: u32,
}

impl DagWatcherState {
    pub fn new(paths: DagPaths, jobs: Vec<Job>, error_log_capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_file: None,
            paths,
            jobs,
            cluster_id: None,
            start_time: None,
            timeout_secs: None,
            resubmits: ResubmitCounter::default(),
            request_memory_index: 0,
            error_status: BTreeMap::new(),
            error_log: ErrorLog::new(error_log_capacity),
            sub_job_ids: BTreeSet::new(),
            phase: WatcherPhase::Created,
            finished_seen_at: None,
            global_error_file: None,
            oom_rotations: 0,
        }
    }

    pub fn dag_file(&self) -> &PathBuf {
        &self.paths.dag_file
    }

    pub fn done_file(&self) -> &PathBuf {
        &self.paths.done_file
    }

    pub fn error_file(&self) -> &PathBuf {
        &self.paths.error_file
    }

    pub fn times_resubmitted(&self) -> u32 {
        self.resubmits.total
    }
}

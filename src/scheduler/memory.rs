use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{DagError, Result};
use crate::scheduler::client::SchedulerClient;
use crate::scheduler::status::{
    ClusterId, HistoryRow, JobAction, JobEvent, JobState, StatusRow,
};

/// Scripted scheduler kept entirely in memory.
///
/// Submissions enter the queue as running. Tests and dry runs move clusters
/// through their lifecycle with [`complete`](Self::complete),
/// [`set_row`](Self::set_row) and friends, and inspect what the watchers did
/// through [`submissions`](Self::submissions), [`actions`](Self::actions) and
/// [`edits`](Self::edits).
#[derive(Debug)]
pub struct InMemoryScheduler {
    next_cluster: ClusterId,
    queue: HashMap<ClusterId, StatusRow>,
    history: HashMap<ClusterId, Vec<HistoryRow>>,
    events: HashMap<PathBuf, Vec<JobEvent>>,
    submissions: Vec<(ClusterId, PathBuf)>,
    actions: Vec<(ClusterId, JobAction)>,
    edits: Vec<(ClusterId, String, String)>,
    fail_next: Option<String>,
    fail_next_edit: Option<String>,
}

impl Default for InMemoryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self {
            next_cluster: 1,
            queue: HashMap::new(),
            history: HashMap::new(),
            events: HashMap::new(),
            submissions: Vec::new(),
            actions: Vec::new(),
            edits: Vec::new(),
            fail_next: None,
            fail_next_edit: None,
        }
    }

    /// Make the next client call fail with `message`.
    pub fn fail_next(&mut self, message: impl Into<String>) {
        self.fail_next = Some(message.into());
    }

    /// Make the next [`edit`](SchedulerClient::edit) fail with `message`,
    /// leaving other calls alone.
    pub fn fail_next_edit(&mut self, message: impl Into<String>) {
        self.fail_next_edit = Some(message.into());
    }

    /// Take a cluster out of the queue with the given exit code.
    pub fn complete(&mut self, cluster_id: ClusterId, exit_code: i32) {
        self.queue.remove(&cluster_id);
        self.history.entry(cluster_id).or_default().push(HistoryRow {
            cluster_id,
            exit_code: Some(exit_code),
        });
    }

    /// Take a cluster out of the queue without leaving history behind.
    pub fn vanish(&mut self, cluster_id: ClusterId) {
        self.queue.remove(&cluster_id);
    }

    /// Insert or replace the queue row of a cluster.
    pub fn set_row(&mut self, row: StatusRow) {
        self.queue.insert(row.cluster_id, row);
    }

    /// Add a sub-job that shows up in `nodes_log` and in the queue.
    pub fn spawn_sub_job(&mut self, nodes_log: &Path, row: StatusRow) -> ClusterId {
        let cluster = if row.cluster_id == 0 {
            self.allocate()
        } else {
            row.cluster_id
        };
        self.events
            .entry(nodes_log.to_path_buf())
            .or_default()
            .push(JobEvent { cluster });
        self.queue.insert(cluster, StatusRow { cluster_id: cluster, ..row });
        cluster
    }

    pub fn row(&self, cluster_id: ClusterId) -> Option<&StatusRow> {
        self.queue.get(&cluster_id)
    }

    pub fn is_queued(&self, cluster_id: ClusterId) -> bool {
        self.queue.contains_key(&cluster_id)
    }

    pub fn submissions(&self) -> &[(ClusterId, PathBuf)] {
        &self.submissions
    }

    pub fn actions(&self) -> &[(ClusterId, JobAction)] {
        &self.actions
    }

    pub fn edits(&self) -> &[(ClusterId, String, String)] {
        &self.edits
    }

    fn allocate(&mut self) -> ClusterId {
        let id = self.next_cluster;
        self.next_cluster += 1;
        id
    }

    fn check_failure(&mut self) -> Result<()> {
        match self.fail_next.take() {
            Some(message) => Err(DagError::Scheduler(message)),
            None => Ok(()),
        }
    }
}

impl SchedulerClient for InMemoryScheduler {
    fn submit_dag(&mut self, dag_file: &Path) -> Result<ClusterId> {
        self.check_failure()?;
        let cluster = self.allocate();
        self.queue
            .insert(cluster, StatusRow::new(cluster, JobState::Running));
        self.submissions.push((cluster, dag_file.to_path_buf()));
        Ok(cluster)
    }

    fn query(&mut self, cluster_id: ClusterId, _fields: &[&str]) -> Result<Vec<StatusRow>> {
        self.check_failure()?;
        Ok(self.queue.get(&cluster_id).cloned().into_iter().collect())
    }

    fn history(&mut self, cluster_id: ClusterId) -> Result<Vec<HistoryRow>> {
        self.check_failure()?;
        Ok(self.history.get(&cluster_id).cloned().unwrap_or_default())
    }

    fn act(&mut self, cluster_id: ClusterId, action: JobAction) -> Result<()> {
        self.check_failure()?;
        self.actions.push((cluster_id, action));
        match action {
            JobAction::Remove => {
                self.queue.remove(&cluster_id);
            }
            JobAction::Release => {
                if let Some(row) = self.queue.get_mut(&cluster_id) {
                    row.job_status = JobState::Idle.into();
                    row.hold_reason_code = None;
                    row.hold_reason = None;
                }
            }
            JobAction::Hold => {
                if let Some(row) = self.queue.get_mut(&cluster_id) {
                    row.job_status = JobState::Held.into();
                    row.hold_reason_code = Some(1);
                    row.hold_reason = Some("held by watcher".to_string());
                }
            }
        }
        Ok(())
    }

    fn edit(&mut self, cluster_id: ClusterId, field: &str, value: &str) -> Result<()> {
        self.check_failure()?;
        if let Some(message) = self.fail_next_edit.take() {
            return Err(DagError::Scheduler(message));
        }
        let row = self
            .queue
            .get_mut(&cluster_id)
            .ok_or_else(|| DagError::Scheduler(format!("cluster {} not in queue", cluster_id)))?;
        if field.eq_ignore_ascii_case("RequestMemory") {
            row.request_memory = value.parse().ok();
        }
        self.edits
            .push((cluster_id, field.to_string(), value.to_string()));
        Ok(())
    }

    fn event_log(&mut self, path: &Path) -> Result<Vec<JobEvent>> {
        self.check_failure()?;
        Ok(self.events.get(path).cloned().unwrap_or_default())
    }
}

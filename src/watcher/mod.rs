//! Polling state machine for one submitted DAG.
//!
//! A [`JobWatcher`] submits a DAG, then on every poll asks the scheduler for
//! its status and reacts:
//!
//! - **Left the queue**: exit code 0 is success (subject to the OOM check);
//!   anything else is examined job by job.
//! - **Timeout**: wall time since the last submission exceeds the limit, the
//!   DAG is removed and resubmitted.
//! - **OOM**: a job log ends with the out-of-memory marker, the GPU memory
//!   requirement is raised and the DAG resubmitted.
//! - **Stuck**: every finish marker exists but the DAG is still live, it is
//!   removed as a zombie.
//! - **Sub-job holds**: classified by hold code, see [`hold::classify`].
//!
//! Failures are recorded in the watcher state, never returned as errors.
//! [`JobWatcher::finish`] writes them out once the watcher is terminal.
//!
//! ```text
//! Created -> Submitted -> Polling -> FinishedOk
//!                            |  ^ -> FinishedError
//!                            +--+ -> Held
//! ```

pub mod checks;
pub mod escalation;
pub mod hold;
pub mod metrics;
pub mod state;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub use checks::log_has_oom;
pub use escalation::{escalate_gpu_memory, next_cpu_tier, next_gpu_threshold};
pub use hold::{classify, SubJobCondition};
pub use metrics::DagMetrics;
pub use state::{DagWatcherState, ErrorLog, ResubmitCause, ResubmitCounter, WatcherPhase};

use crate::config::WatcherConfig;
use crate::error::{DagError, Result};
use crate::graph::{with_suffix, DagPaths, Job, JobGraph};
use crate::scheduler::{ClusterId, JobAction, SchedulerClient, StatusRow, STATUS_FIELDS};

/// Lines of a failed job's log copied into its error entry.
const ERROR_EXCERPT_LINES: usize = 20;

pub struct JobWatcher {
    state: DagWatcherState,
    config: Arc<WatcherConfig>,
}

impl JobWatcher {
    pub fn new(paths: DagPaths, jobs: Vec<Job>, config: Arc<WatcherConfig>) -> Self {
        let mut state = DagWatcherState::new(paths, jobs, config.error_log_capacity);
        state.timeout_secs = config.timeout_secs;
        Self { state, config }
    }

    pub fn from_graph(graph: JobGraph, config: Arc<WatcherConfig>) -> Self {
        Self::new(graph.paths, graph.jobs, config)
    }

    /// Rebuild a watcher from persisted state.
    pub fn from_state(state: DagWatcherState, config: Arc<WatcherConfig>) -> Self {
        Self { state, config }
    }

    /// Override the configured timeout; `None` keeps the configured one.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout {
            self.state.timeout_secs = Some(timeout.as_secs());
        }
        self
    }

    pub fn with_task_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state.task_file = Some(path.into());
        self
    }

    pub fn with_global_error_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state.global_error_file = Some(path.into());
        self
    }

    pub fn state(&self) -> &DagWatcherState {
        &self.state
    }

    pub fn phase(&self) -> WatcherPhase {
        self.state.phase
    }

    pub fn is_running(&self) -> bool {
        !self.state.phase.is_terminal()
    }

    pub fn done_file(&self) -> &Path {
        &self.state.paths.done_file
    }

    pub fn cluster_id(&self) -> Option<ClusterId> {
        self.state.cluster_id
    }

    pub fn submit(&mut self, client: &mut dyn SchedulerClient) -> Result<bool> {
        self.submit_at(client, Utc::now())
    }

    /// Submit the DAG. Returns false without contacting the scheduler if the
    /// done file already exists.
    pub fn submit_at(
        &mut self,
        client: &mut dyn SchedulerClient,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.state.paths.done_file.exists() {
            tracing::info!(
                done_file = %self.state.paths.done_file.display(),
                "DAG already done, not submitting"
            );
            return Ok(false);
        }
        if self.state.phase != WatcherPhase::Created {
            return Err(DagError::AlreadySubmitted);
        }

        let cluster_id = client.submit_dag(&self.state.paths.dag_file)?;
        self.state.cluster_id = Some(cluster_id);
        self.state.start_time = Some(now);
        self.state.finished_seen_at = None;
        self.state.phase = WatcherPhase::Submitted;
        tracing::info!(
            cluster_id,
            dag = %self.state.paths.dag_file.display(),
            jobs = self.state.jobs.len(),
            "DAG submitted"
        );
        Ok(true)
    }

    pub fn poll(&mut self, client: &mut dyn SchedulerClient) -> bool {
        self.poll_at(client, Utc::now())
    }

    /// Run one poll cycle. Returns true while the DAG still needs watching.
    pub fn poll_at(&mut self, client: &mut dyn SchedulerClient, now: DateTime<Utc>) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(cluster_id) = self.state.cluster_id else {
            tracing::warn!(dag = %self.state.paths.dag_file.display(), "Polled before submission");
            return false;
        };
        self.state.phase = WatcherPhase::Polling;

        let rows = match client.query(cluster_id, STATUS_FIELDS) {
            Ok(rows) => rows,
            Err(e) => {
                self.note(format!("status query for cluster {} failed: {}", cluster_id, e));
                return true;
            }
        };

        if rows.is_empty() {
            self.handle_left_queue(client, cluster_id, now);
        } else {
            self.handle_live(client, cluster_id, now);
        }

        if self.is_running() {
            self.refresh_sub_jobs(client);
            self.scan_sub_jobs(client);
        }
        self.is_running()
    }

    /// Write the outcome to disk. Returns true if the DAG ended in error.
    pub fn finish(&mut self) -> Result<bool> {
        if self.is_running() {
            return Err(DagError::Internal(format!(
                "finish called while {} is {}",
                self.state.paths.dag_file.display(),
                self.state.phase
            )));
        }

        if self.state.phase != WatcherPhase::Held {
            match DagMetrics::load(&self.state.paths.metrics_file) {
                Ok(Some(metrics)) if metrics.is_clean() => {}
                Ok(Some(metrics)) => self.record(
                    "dag",
                    format!(
                        "DAG ended with exitcode {} and DagStatus {}",
                        metrics.exit_code, metrics.dag_status
                    ),
                ),
                Ok(None) => self.record(
                    "dag",
                    format!(
                        "no DAG metrics at {}",
                        self.state.paths.metrics_file.display()
                    ),
                ),
                Err(e) => self.record("dag", format!("unreadable DAG metrics: {}", e)),
            }
        }

        if self.state.error_status.is_empty() {
            fs::write(
                &self.state.paths.done_file,
                format!(
                    "finished {} cluster {} resubmits {}\n",
                    Utc::now().to_rfc3339(),
                    self.state
                        .cluster_id
                        .map_or_else(|| "-".to_string(), |id| id.to_string()),
                    self.state.times_resubmitted()
                ),
            )?;
            self.state.phase = WatcherPhase::FinishedOk;
            tracing::info!(done_file = %self.state.paths.done_file.display(), "DAG done");
            return Ok(false);
        }

        if self.state.phase != WatcherPhase::Held {
            self.state.phase = WatcherPhase::FinishedError;
        }
        self.write_error_files()?;
        tracing::warn!(
            error_file = %self.state.paths.error_file.display(),
            errors = self.state.error_status.len(),
            phase = %self.state.phase,
            "DAG finished with errors"
        );
        Ok(true)
    }

    fn handle_left_queue(
        &mut self,
        client: &mut dyn SchedulerClient,
        cluster_id: ClusterId,
        now: DateTime<Utc>,
    ) {
        let exit_code = match client.history(cluster_id) {
            Ok(rows) => rows.into_iter().find_map(|row| row.exit_code),
            Err(e) => {
                self.note(format!("history for cluster {} failed: {}", cluster_id, e));
                None
            }
        };

        match exit_code {
            Some(0) => {
                self.state.phase = WatcherPhase::FinishedOk;
                self.check_oom(client, now);
            }
            Some(code) => self.handle_failed_jobs(client, code, now),
            None => {
                // finish() decides from the metrics file
                tracing::warn!(cluster_id, "DAG left the queue without history");
                self.state.phase = WatcherPhase::FinishedOk;
            }
        }
    }

    fn handle_live(
        &mut self,
        client: &mut dyn SchedulerClient,
        cluster_id: ClusterId,
        now: DateTime<Utc>,
    ) {
        if let (Some(timeout), Some(started)) = (self.timeout(), self.state.start_time) {
            let elapsed = now.signed_duration_since(started);
            if elapsed.to_std().map_or(false, |elapsed| elapsed > timeout) {
                self.note(format!(
                    "cluster {} exceeded timeout of {}s",
                    cluster_id,
                    timeout.as_secs()
                ));
                self.resubmit(client, ResubmitCause::Timeout, now);
                return;
            }
        }

        if self.check_oom(client, now) {
            return;
        }
        self.check_stuck(client, cluster_id, now);
    }

    /// Per-job error collection after the DAG exited non-zero.
    fn handle_failed_jobs(
        &mut self,
        client: &mut dyn SchedulerClient,
        dag_exit_code: i32,
        now: DateTime<Utc>,
    ) {
        if self.check_oom(client, now) {
            return;
        }

        let mut failures = Vec::new();
        for job in self.state.jobs.iter().filter(|job| !job.is_finished()) {
            let tail = match checks::read_tail(&job.log_path, self.config.log_tail_lines) {
                Ok(tail) => tail,
                // never started, downstream of the failure
                Err(_) => continue,
            };
            let exit = checks::parse_exit_code(&tail).ok().flatten();
            let excerpt = tail
                .iter()
                .skip(tail.len().saturating_sub(ERROR_EXCERPT_LINES))
                .cloned()
                .collect::<Vec<_>>()
                .join("\n");
            let summary = match exit {
                Some(code) => format!("exit code {}", code),
                None => "no exit code recorded".to_string(),
            };
            failures.push((format!("job {}", job.job_id), format!("{}\n{}", summary, excerpt)));
        }

        if failures.is_empty() {
            self.record("dag", format!("DAG exited with code {}", dag_exit_code));
        }
        for (key, message) in failures {
            self.record(key, message);
        }
        self.state.phase = WatcherPhase::FinishedError;
    }

    /// Returns true if an OOM was found, whatever the outcome.
    fn check_oom(&mut self, client: &mut dyn SchedulerClient, now: DateTime<Utc>) -> bool {
        let oom_jobs: Vec<Job> = self
            .state
            .jobs
            .iter()
            .filter(|job| {
                log_has_oom(
                    &job.log_path,
                    &self.config.oom_marker,
                    self.config.log_tail_lines,
                )
            })
            .cloned()
            .collect();
        if oom_jobs.is_empty() {
            return false;
        }

        let ids: Vec<String> = oom_jobs.iter().map(Job::name).collect();
        self.note(format!("out of GPU memory in jobs {}", ids.join(", ")));

        let submit_files: Vec<&Path> = oom_jobs
            .iter()
            .map(|job| job.condor_file_path.as_path())
            .collect();
        match escalate_gpu_memory(&submit_files, &self.config.gpu_memory_thresholds) {
            Ok(true) => {
                self.rotate_logs(&oom_jobs);
                self.resubmit(client, ResubmitCause::OutOfMemory, now);
            }
            Ok(false) => self.fail(
                client,
                "gpu_memory",
                format!(
                    "out of GPU memory at the highest tier in jobs {}",
                    ids.join(", ")
                ),
            ),
            Err(e) => self.fail(
                client,
                "gpu_memory",
                format!("could not raise GPU memory: {}", e),
            ),
        }
        true
    }

    /// Move OOM logs aside so the marker is not found again before the rerun.
    fn rotate_logs(&mut self, jobs: &[Job]) {
        self.state.oom_rotations += 1;
        for job in jobs {
            let rotated = job
                .log_path
                .with_extension(format!("oom-{}.log", self.state.oom_rotations));
            if let Err(e) = fs::rename(&job.log_path, &rotated) {
                self.note(format!(
                    "could not rotate {}: {}",
                    job.log_path.display(),
                    e
                ));
            }
        }
    }

    fn check_stuck(
        &mut self,
        client: &mut dyn SchedulerClient,
        cluster_id: ClusterId,
        now: DateTime<Utc>,
    ) {
        let all_finished =
            !self.state.jobs.is_empty() && self.state.jobs.iter().all(Job::is_finished);
        if !all_finished {
            self.state.finished_seen_at = None;
            return;
        }

        let first_seen = *self.state.finished_seen_at.get_or_insert(now);
        let waited = now.signed_duration_since(first_seen).to_std().unwrap_or_default();
        if waited >= self.config.stuck_grace() {
            self.fail(
                client,
                "stuck",
                format!(
                    "all jobs wrote finish markers but cluster {} is still in the queue",
                    cluster_id
                ),
            );
        }
    }

    fn refresh_sub_jobs(&mut self, client: &mut dyn SchedulerClient) {
        let Some(dag_cluster) = self.state.cluster_id else {
            return;
        };
        match client.event_log(&self.state.paths.nodes_log) {
            Ok(events) => {
                self.state.sub_job_ids.extend(
                    events
                        .into_iter()
                        .map(|event| event.cluster)
                        .filter(|&cluster| cluster != dag_cluster),
                );
            }
            Err(e) => tracing::debug!(
                nodes_log = %self.state.paths.nodes_log.display(),
                error = %e,
                "Nodes log not readable yet"
            ),
        }
    }

    fn scan_sub_jobs(&mut self, client: &mut dyn SchedulerClient) {
        let sub_jobs: Vec<ClusterId> = self.state.sub_job_ids.iter().copied().collect();
        for sub in sub_jobs {
            if !self.is_running() {
                break;
            }
            match client.query(sub, STATUS_FIELDS) {
                Ok(rows) => {
                    for row in rows {
                        self.handle_sub_job(client, sub, &row);
                    }
                }
                Err(e) => self.note(format!("status query for sub-job {} failed: {}", sub, e)),
            }
        }
    }

    fn handle_sub_job(
        &mut self,
        client: &mut dyn SchedulerClient,
        sub: ClusterId,
        row: &StatusRow,
    ) {
        match classify(row) {
            SubJobCondition::Healthy => {}
            SubJobCondition::InvalidImage(reason) => self.fail(
                client,
                "image",
                format!("sub-job {} has an invalid container image: {}", sub, reason),
            ),
            SubJobCondition::ExecutionTimeExceeded(reason) => {
                self.note(format!("sub-job {} exceeded its run time: {}", sub, reason));
                if self.consume_resubmit(client, ResubmitCause::ExecutionTime) {
                    self.act(client, sub, JobAction::Release);
                }
            }
            SubJobCondition::MemoryExceeded(reason) => {
                self.note(format!("sub-job {} exceeded its memory: {}", sub, reason));
                self.escalate_cpu_memory(client, sub, row.request_memory);
            }
            SubJobCondition::NoMatch(reason) => {
                self.act(client, sub, JobAction::Hold);
                self.record(
                    "no_match",
                    format!(
                        "sub-job {} matches no machine ({}), held for manual intervention",
                        sub, reason
                    ),
                );
                self.state.phase = WatcherPhase::Held;
            }
            SubJobCondition::UnhandledHold { code, reason } => {
                tracing::warn!(
                    sub_job = sub,
                    code,
                    reason = %reason,
                    "Sub-job held for an unhandled reason"
                );
            }
        }
    }

    fn escalate_cpu_memory(
        &mut self,
        client: &mut dyn SchedulerClient,
        sub: ClusterId,
        current_request: Option<u64>,
    ) {
        let Some((index, mb)) = next_cpu_tier(
            self.state.request_memory_index,
            current_request,
            &self.config.cpu_memory_thresholds,
        ) else {
            self.fail(
                client,
                "cpu_memory",
                format!("sub-job {} exceeded the highest memory tier", sub),
            );
            return;
        };

        // The budget is only spent once the scheduler took the new request.
        if let Err(e) = client.edit(sub, "RequestMemory", &mb.to_string()) {
            self.note(format!("could not raise memory of sub-job {}: {}", sub, e));
            return;
        }
        if !self.consume_resubmit(client, ResubmitCause::MemoryLimit) {
            return;
        }
        self.state.request_memory_index = index + 1;
        tracing::info!(sub_job = sub, request_memory = mb, "Memory request raised");
        self.act(client, sub, JobAction::Release);
    }

    /// Count one resubmission; a spent budget fails the watcher.
    fn consume_resubmit(&mut self, client: &mut dyn SchedulerClient, cause: ResubmitCause) -> bool {
        let allowed = self.state.resubmits.try_consume(
            cause,
            self.config.resubmit_limit,
            self.config.resubmit_budget,
        );
        if !allowed {
            self.fail(
                client,
                "resubmit",
                format!(
                    "resubmit limit of {} reached ({}), {} resubmissions so far",
                    self.config.resubmit_limit,
                    cause,
                    self.state.times_resubmitted()
                ),
            );
        }
        allowed
    }

    /// Remove the DAG and submit it again.
    fn resubmit(
        &mut self,
        client: &mut dyn SchedulerClient,
        cause: ResubmitCause,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.consume_resubmit(client, cause) {
            return false;
        }

        if let Some(old) = self.state.cluster_id {
            self.act(client, old, JobAction::Remove);
        }

        match client.submit_dag(&self.state.paths.dag_file) {
            Ok(cluster_id) => {
                tracing::info!(
                    cluster_id,
                    cause = %cause,
                    times_resubmitted = self.state.times_resubmitted(),
                    "DAG resubmitted"
                );
                self.state.cluster_id = Some(cluster_id);
                self.state.start_time = Some(now);
                self.state.sub_job_ids.clear();
                self.state.finished_seen_at = None;
                self.state.phase = WatcherPhase::Submitted;
                true
            }
            Err(e) => {
                self.state.cluster_id = None;
                self.record("submit", format!("resubmission after {} failed: {}", cause, e));
                self.state.phase = WatcherPhase::FinishedError;
                false
            }
        }
    }

    /// Record a fatal error, remove the DAG and stop watching.
    fn fail(&mut self, client: &mut dyn SchedulerClient, key: &str, message: String) {
        tracing::error!(
            dag = %self.state.paths.dag_file.display(),
            key,
            message = %message,
            "DAG failed"
        );
        self.record(key, message);
        if let Some(cluster_id) = self.state.cluster_id {
            self.act(client, cluster_id, JobAction::Remove);
        }
        self.state.phase = WatcherPhase::FinishedError;
    }

    fn act(&mut self, client: &mut dyn SchedulerClient, cluster_id: ClusterId, action: JobAction) {
        if let Err(e) = client.act(cluster_id, action) {
            self.note(format!("{} of cluster {} failed: {}", action, cluster_id, e));
        }
    }

    fn record(&mut self, key: impl Into<String>, message: impl Into<String>) {
        let key = key.into();
        let message = message.into();
        self.state
            .error_log
            .push(format!("{}: {}", key, first_line(&message)));
        self.state.error_status.insert(key, message);
    }

    fn note(&mut self, message: String) {
        tracing::warn!(dag = %self.state.paths.dag_file.display(), "{}", message);
        self.state.error_log.push(message);
    }

    fn timeout(&self) -> Option<Duration> {
        self.state.timeout_secs.map(Duration::from_secs)
    }

    fn write_error_files(&self) -> Result<()> {
        let mut report = String::new();
        for (key, message) in &self.state.error_status {
            report.push_str(&format!("{}: {}\n", key, message));
        }
        if !self.state.error_log.is_empty() {
            report.push_str("--- log ---\n");
            for entry in self.state.error_log.entries() {
                report.push_str(entry);
                report.push('\n');
            }
        }
        fs::write(&self.state.paths.error_file, report)?;

        if let Some(global) = &self.state.global_error_file {
            if let Some(parent) = global.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(global)?;
            let stamp = Utc::now().to_rfc3339();
            for (key, message) in &self.state.error_status {
                writeln!(
                    file,
                    "[{}] {} {}: {}",
                    stamp,
                    self.state.paths.dag_file.display(),
                    key,
                    first_line(message)
                )?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for JobWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWatcher")
            .field("dag", &self.state.paths.dag_file)
            .field("cluster_id", &self.state.cluster_id)
            .field("phase", &self.state.phase)
            .finish()
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}

/// Global error log path for a fleet id.
pub fn global_error_file(dir: &Path, fleet_id: &str) -> PathBuf {
    with_suffix(&dir.join(fleet_id), ".err")
}

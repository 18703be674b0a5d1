use std::path::Path;

use crate::error::Result;
use crate::scheduler::status::{ClusterId, HistoryRow, JobAction, JobEvent, StatusRow};

/// Narrow view of the cluster scheduler used by the watchers.
///
/// All calls are blocking. Implementations own any connection or debug setup;
/// nothing is configured globally.
pub trait SchedulerClient {
    /// Submit a DAG description and return its cluster id.
    fn submit_dag(&mut self, dag_file: &Path) -> Result<ClusterId>;

    /// Current queue rows for a cluster. An empty result means it left the queue.
    fn query(&mut self, cluster_id: ClusterId, fields: &[&str]) -> Result<Vec<StatusRow>>;

    /// History rows for a cluster that left the queue.
    fn history(&mut self, cluster_id: ClusterId) -> Result<Vec<HistoryRow>>;

    fn act(&mut self, cluster_id: ClusterId, action: JobAction) -> Result<()>;

    /// Change one attribute of a queued job.
    fn edit(&mut self, cluster_id: ClusterId, field: &str, value: &str) -> Result<()>;

    /// Events recorded in a user log, e.g. the DAG's nodes log.
    fn event_log(&mut self, path: &Path) -> Result<Vec<JobEvent>>;
}

impl<T: SchedulerClient + ?Sized> SchedulerClient for &mut T {
    fn submit_dag(&mut self, dag_file: &Path) -> Result<ClusterId> {
        (**self).submit_dag(dag_file)
    }

    fn query(&mut self, cluster_id: ClusterId, fields: &[&str]) -> Result<Vec<StatusRow>> {
        (**self).query(cluster_id, fields)
    }

    fn history(&mut self, cluster_id: ClusterId) -> Result<Vec<HistoryRow>> {
        (**self).history(cluster_id)
    }

    fn act(&mut self, cluster_id: ClusterId, action: JobAction) -> Result<()> {
        (**self).act(cluster_id, action)
    }

    fn edit(&mut self, cluster_id: ClusterId, field: &str, value: &str) -> Result<()> {
        (**self).edit(cluster_id, field, value)
    }

    fn event_log(&mut self, path: &Path) -> Result<Vec<JobEvent>> {
        (**self).event_log(path)
    }
}

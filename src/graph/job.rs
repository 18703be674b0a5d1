use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Deepest tier in a job graph; every job past the first few lands here.
pub const MAX_HIERARCHY_DEPTH: usize = 3;

/// One line of a task file, materialised as files under the exec directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: usize,
    pub command: String,
    pub script_path: PathBuf,
    pub condor_file_path: PathBuf,
    pub log_path: PathBuf,
    pub finish_marker_path: PathBuf,
    pub hierarchy_depth: usize,
}

impl Job {
    pub fn new(job_id: usize, command: impl Into<String>, exec_dir: &Path) -> Self {
        Self {
            job_id,
            command: command.into(),
            script_path: exec_dir.join(format!("{}.sh", job_id)),
            condor_file_path: exec_dir.join(format!("{}.condor", job_id)),
            log_path: exec_dir.join(format!("{}.log", job_id)),
            finish_marker_path: exec_dir.join(format!("{}_finish.log", job_id)),
            hierarchy_depth: job_id.min(MAX_HIERARCHY_DEPTH),
        }
    }

    /// Node name used in the DAG description.
    pub fn name(&self) -> String {
        self.job_id.to_string()
    }

    pub fn is_finished(&self) -> bool {
        self.finish_marker_path.exists()
    }

    pub fn output_path(&self) -> PathBuf {
        self.script_path.with_extension("out")
    }

    pub fn error_path(&self) -> PathBuf {
        self.script_path.with_extension("err")
    }
}

/// Files that belong to one DAG as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagPaths {
    pub exec_dir: PathBuf,
    pub dag_file: PathBuf,
    pub metrics_file: PathBuf,
    pub nodes_log: PathBuf,
    pub done_file: PathBuf,
    pub error_file: PathBuf,
}

impl DagPaths {
    pub fn new(exec_dir: &Path, dag_file_name: &str) -> Self {
        let dag_file = exec_dir.join(dag_file_name);
        Self {
            exec_dir: exec_dir.to_path_buf(),
            metrics_file: with_suffix(&dag_file, ".metrics"),
            nodes_log: with_suffix(&dag_file, ".nodes.log"),
            done_file: with_suffix(exec_dir, ".done"),
            error_file: with_suffix(exec_dir, ".err"),
            dag_file,
        }
    }
}

/// Append `suffix` to the final path component without touching any extension.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

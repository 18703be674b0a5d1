use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// Subset of the metrics file DAGMan writes next to the DAG when it exits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DagMetrics {
    #[serde(rename = "exitcode")]
    pub exit_code: i32,
    #[serde(rename = "DagStatus")]
    pub dag_status: i32,
    #[serde(default)]
    pub jobs_failed: Option<u32>,
    #[serde(default)]
    pub jobs_succeeded: Option<u32>,
}

impl DagMetrics {
    /// `Ok(None)` if the file does not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.exit_code == 0 && self.dag_status == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_dagman_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dag.submit.metrics");
        fs::write(
            &path,
            r#"{"client": "condor_dagman", "exitcode": 0, "DagStatus": 0, "jobs_failed": 0, "jobs_succeeded": 5}"#,
        )
        .unwrap();

        let metrics = DagMetrics::load(&path).unwrap().unwrap();
        assert!(metrics.is_clean());
        assert_eq!(metrics.jobs_succeeded, Some(5));
    }

    #[test]
    fn abnormal_status() {
        let metrics: DagMetrics =
            serde_json::from_str(r#"{"exitcode": 1, "DagStatus": 2}"#).unwrap();
        assert!(!metrics.is_clean());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DagMetrics::load(&dir.path().join("nope")).unwrap().is_none());
    }
}

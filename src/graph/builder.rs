use std::fs;
use std::path::Path;

use crate::config::{GraphConfig, ResourceParams};
use crate::descriptor::JobDescriptor;
use crate::error::Result;
use crate::graph::dag::{DagFormatter, DagmanFormatter};
use crate::graph::job::{DagPaths, Job};
use crate::graph::wrapper::wrapper_script;

/// Jobs of one task file plus the DAG-level paths.
#[derive(Debug, Clone)]
pub struct JobGraph {
    pub paths: DagPaths,
    pub jobs: Vec<Job>,
}

/// Writes wrappers, submit files and DAG descriptions.
#[derive(Debug, Clone, Default)]
pub struct JobGraphBuilder {
    config: GraphConfig,
}

impl JobGraphBuilder {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Materialise one job per task line under `exec_dir`.
    pub fn build(
        &self,
        task_lines: &[String],
        exec_dir: &Path,
        params: &ResourceParams,
    ) -> Result<Vec<Job>> {
        fs::create_dir_all(exec_dir)?;
        let paths = DagPaths::new(exec_dir, &self.config.dag_file_name);
        // Outputs of an earlier attempt in the same directory would be read
        // as this run's results.
        clear_stale(&paths.metrics_file);
        clear_stale(&paths.nodes_log);

        let mut jobs = Vec::with_capacity(task_lines.len());
        for (index, line) in task_lines.iter().enumerate() {
            let job = Job::new(index, line.as_str(), exec_dir);
            clear_stale(&job.log_path);
            clear_stale(&job.finish_marker_path);
            clear_stale(&job.output_path());
            clear_stale(&job.error_path());

            fs::write(
                &job.script_path,
                wrapper_script(&job, self.config.path_export.as_deref()),
            )?;
            make_executable(&job.script_path)?;

            let mut descriptor = self.descriptor_for(&job, &paths, params)?;
            descriptor.write(&job.condor_file_path)?;
            descriptor.freeze()?;

            tracing::debug!(
                job_id = job.job_id,
                depth = job.hierarchy_depth,
                "Job prepared"
            );
            jobs.push(job);
        }

        tracing::info!(
            exec_dir = %exec_dir.display(),
            jobs = jobs.len(),
            "Job graph built"
        );
        Ok(jobs)
    }

    /// Submit file for one job with resource parameters applied.
    pub fn descriptor_for(
        &self,
        job: &Job,
        paths: &DagPaths,
        params: &ResourceParams,
    ) -> Result<JobDescriptor> {
        let mut d = JobDescriptor::new();
        d.set("executable", job.script_path.to_string_lossy().into_owned())?;
        d.set("output", job.output_path().to_string_lossy().into_owned())?;
        d.set("error", job.error_path().to_string_lossy().into_owned())?;
        d.set("log", paths.nodes_log.to_string_lossy().into_owned())?;
        d.set("universe", self.config.universe.as_str())?;
        if let Some(image) = &self.config.docker_image {
            d.set("docker_image", image)?;
        }
        if !self.config.requirements.is_empty() {
            d.set("requirements", self.config.requirements.clone())?;
        }
        self.apply_resources(&mut d, params)?;
        Ok(d)
    }

    fn apply_resources(&self, d: &mut JobDescriptor, params: &ResourceParams) -> Result<()> {
        if let Some(gpus) = params.request_gpus {
            d.set("request_gpus", gpus.to_string())?;
        }
        if let Some(mb) = params.condor_memory_filter {
            d.append("requirements", &format!("GPUMEM >= {}", mb))?;
            d.set("priority", self.config.raised_priority.to_string())?;
        }
        if let Some(mb) = params.cpu_memory_filter {
            d.set("request_memory", mb.to_string())?;
        }
        for (key, value) in &params.extra {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            d.set(key, value)?;
        }
        Ok(())
    }

    /// Write the DAG description for `jobs` and return the DAG paths.
    pub fn write_dag(
        &self,
        jobs: &[Job],
        exec_dir: &Path,
        formatter: &dyn DagFormatter,
    ) -> Result<DagPaths> {
        let paths = DagPaths::new(exec_dir, &self.config.dag_file_name);
        fs::write(&paths.dag_file, formatter.render(jobs))?;
        Ok(paths)
    }

    /// [`build`](Self::build) followed by [`write_dag`](Self::write_dag) in DAGMan syntax.
    pub fn build_graph(
        &self,
        task_lines: &[String],
        exec_dir: &Path,
        params: &ResourceParams,
    ) -> Result<JobGraph> {
        let jobs = self.build(task_lines, exec_dir, params)?;
        let paths = self.write_dag(&jobs, exec_dir, &DagmanFormatter)?;
        Ok(JobGraph { paths, jobs })
    }
}

/// Read a task file: one command per line, blank lines and `#` comments skipped.
pub fn read_task_lines(path: &Path) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn clear_stale(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed stale artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to remove stale artifact"
        ),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

//! Directory-driven fleet of DAG watchers.
//!
//! A task file `foo.tasks` in the watch directory becomes a DAG executed in
//! `foo/`, finishing with `foo.done` or `foo.err`. Resources come from
//! `foo.resources.json` if present, else from the configured default file.
//!
//! The host process calls [`FleetWatcher::tick`] on its own cadence; nothing
//! here blocks or spawns.

pub mod registry;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

pub use registry::FleetRegistry;

use crate::config::{FleetConfig, ResourceParams, WatcherConfig};
use crate::error::Result;
use crate::graph::{read_task_lines, with_suffix, JobGraphBuilder};
use crate::scheduler::SchedulerClient;
use crate::watcher::{global_error_file, JobWatcher};

/// Errors of one DAG that ended badly during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagFailure {
    pub done_file: PathBuf,
    pub errors: BTreeMap<String, String>,
}

pub struct FleetWatcher<C: SchedulerClient> {
    id: Uuid,
    config: FleetConfig,
    watcher_config: Arc<WatcherConfig>,
    builder: JobGraphBuilder,
    client: C,
    registry: FleetRegistry,
}

impl<C: SchedulerClient> FleetWatcher<C> {
    /// Create a fleet, restoring the persisted registry when one is configured.
    pub fn new(config: FleetConfig, client: C) -> Result<Self> {
        let watcher_config = config.watcher_config();
        let registry = match &config.registry_file {
            Some(path) => FleetRegistry::load(path, Arc::clone(&watcher_config))?,
            None => FleetRegistry::new(None),
        };
        let id = Uuid::new_v4();
        tracing::info!(
            fleet_id = %id,
            watch_dir = %config.watch_dir.display(),
            restored = registry.len(),
            "Fleet watcher started"
        );
        Ok(Self {
            id,
            builder: JobGraphBuilder::new(config.graph.clone()),
            watcher_config,
            config,
            client,
            registry,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Task files in `watch_dir` that are neither seen nor done.
    ///
    /// Returned files are marked seen, so a second call without new files
    /// returns nothing.
    pub fn discover(&mut self, watch_dir: &Path) -> Result<Vec<PathBuf>> {
        let pattern = watch_dir.join(&self.config.task_glob);
        let mut found: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
            .filter_map(std::result::Result::ok)
            .filter(|path| path.is_file())
            .collect();
        found.sort();

        let mut fresh = Vec::new();
        for task_file in found {
            if self.registry.is_seen(&task_file) {
                continue;
            }
            if done_file_for(&task_file).exists() {
                tracing::debug!(task_file = %task_file.display(), "Already done, skipping");
                continue;
            }
            self.registry.mark_seen(&task_file);
            fresh.push(task_file);
        }

        if !fresh.is_empty() {
            tracing::info!(count = fresh.len(), "Discovered new task files");
            self.registry.save()?;
        }
        Ok(fresh)
    }

    /// Build and submit the DAG for one task file. Returns false if it was
    /// already done and nothing was submitted.
    pub fn submit(&mut self, job_file: &Path, resource_file: Option<&Path>) -> Result<bool> {
        let params = match resource_file {
            Some(path) => ResourceParams::load(path)?,
            None => ResourceParams::default(),
        };
        let task_lines = read_task_lines(job_file)?;
        let graph = self
            .builder
            .build_graph(&task_lines, &exec_dir_for(job_file), &params)?;

        let mut watcher = JobWatcher::from_graph(graph, Arc::clone(&self.watcher_config))
            .with_timeout(params.timeout())
            .with_task_file(job_file);
        if let Some(dir) = &self.watcher_config.global_error_dir {
            watcher = watcher.with_global_error_file(global_error_file(dir, &self.id.to_string()));
        }

        if !watcher.submit(&mut self.client)? {
            return Ok(false);
        }
        self.registry.insert(watcher);
        self.registry.save()?;
        Ok(true)
    }

    /// Companion resource file of a task file, falling back to the default.
    pub fn resource_file_for(&self, job_file: &Path) -> Option<PathBuf> {
        let companion = with_suffix(&exec_dir_for(job_file), ".resources.json");
        if companion.is_file() {
            return Some(companion);
        }
        self.config.default_resource_file.clone()
    }

    /// One round: pick up new task files, poll every watcher, finish the
    /// terminal ones. Returns the failures observed in this round.
    pub fn tick(&mut self) -> Result<Vec<DagFailure>> {
        let mut failures = Vec::new();

        let watch_dir = self.config.watch_dir.clone();
        for job_file in self.discover(&watch_dir)? {
            let resource_file = self.resource_file_for(&job_file);
            if let Err(e) = self.submit(&job_file, resource_file.as_deref()) {
                tracing::error!(task_file = %job_file.display(), error = %e, "Submission failed");
                let mut errors = BTreeMap::new();
                errors.insert("submit".to_string(), e.to_string());
                failures.push(DagFailure {
                    done_file: done_file_for(&job_file),
                    errors,
                });
            }
        }

        let mut terminal = Vec::new();
        for watcher in self.registry.watchers_mut() {
            if !watcher.poll(&mut self.client) {
                terminal.push(watcher.done_file().to_path_buf());
            }
        }

        for done_file in terminal {
            let Some(mut watcher) = self.registry.remove(&done_file) else {
                continue;
            };
            match watcher.finish() {
                Ok(false) => {}
                Ok(true) => failures.push(DagFailure {
                    done_file,
                    errors: watcher.state().error_status.clone(),
                }),
                Err(e) => {
                    tracing::error!(done_file = %done_file.display(), error = %e, "Finish failed");
                    let mut errors = watcher.state().error_status.clone();
                    errors.insert("finish".to_string(), e.to_string());
                    failures.push(DagFailure { done_file, errors });
                }
            }
        }

        self.registry.save()?;
        tracing::debug!(
            live = self.registry.len(),
            failures = failures.len(),
            "Fleet tick complete"
        );
        Ok(failures)
    }
}

/// `foo.tasks` executes in `foo/`.
pub fn exec_dir_for(task_file: &Path) -> PathBuf {
    task_file.with_extension("")
}

pub fn done_file_for(task_file: &Path) -> PathBuf {
    with_suffix(&exec_dir_for(task_file), ".done")
}

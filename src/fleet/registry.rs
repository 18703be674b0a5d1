use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::WatcherConfig;
use crate::error::Result;
use crate::graph::with_suffix;
use crate::watcher::{DagWatcherState, JobWatcher};

/// On-disk form of the registry.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    seen: BTreeSet<PathBuf>,
    watchers: Vec<DagWatcherState>,
}

/// Live watchers keyed by done file, plus every task file already picked up.
#[derive(Debug, Default)]
pub struct FleetRegistry {
    watchers: BTreeMap<PathBuf, JobWatcher>,
    seen: BTreeSet<PathBuf>,
    path: Option<PathBuf>,
}

impl FleetRegistry {
    /// Empty registry persisted to `path`, or kept in memory when `None`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    /// Restore a registry saved by [`save`](Self::save). A missing file gives
    /// an empty registry.
    pub fn load(path: &Path, config: Arc<WatcherConfig>) -> Result<Self> {
        let mut registry = Self::new(Some(path.to_path_buf()));
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(registry),
            Err(e) => return Err(e.into()),
        };

        let file: RegistryFile = serde_json::from_str(&text)?;
        registry.seen = file.seen;
        for state in file.watchers {
            let watcher = JobWatcher::from_state(state, Arc::clone(&config));
            registry
                .watchers
                .insert(watcher.done_file().to_path_buf(), watcher);
        }
        tracing::info!(
            registry = %path.display(),
            watchers = registry.watchers.len(),
            seen = registry.seen.len(),
            "Fleet registry restored"
        );
        Ok(registry)
    }

    /// Write the registry to its file. No-op for an in-memory registry.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = RegistryFile {
            seen: self.seen.clone(),
            watchers: self.watchers.values().map(|w| w.state().clone()).collect(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // write-then-rename so a crash never leaves a truncated registry
        let tmp = with_suffix(path, ".tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Remember a task file. False if it was already seen.
    pub fn mark_seen(&mut self, task_file: &Path) -> bool {
        self.seen.insert(task_file.to_path_buf())
    }

    pub fn is_seen(&self, task_file: &Path) -> bool {
        self.seen.contains(task_file)
    }

    pub fn insert(&mut self, watcher: JobWatcher) {
        self.watchers
            .insert(watcher.done_file().to_path_buf(), watcher);
    }

    pub fn remove(&mut self, done_file: &Path) -> Option<JobWatcher> {
        self.watchers.remove(done_file)
    }

    pub fn get(&self, done_file: &Path) -> Option<&JobWatcher> {
        self.watchers.get(done_file)
    }

    pub fn done_files(&self) -> Vec<PathBuf> {
        self.watchers.keys().cloned().collect()
    }

    pub fn watchers_mut(&mut self) -> impl Iterator<Item = &mut JobWatcher> {
        self.watchers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}

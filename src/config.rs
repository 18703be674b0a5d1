use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Marker TensorFlow prints when a GPU allocation fails.
pub const DEFAULT_OOM_MARKER: &str = "ResourceExhaustedError";

/// How resubmissions from different failure causes share the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResubmitBudget {
    /// Every cause draws from one combined counter.
    #[default]
    Shared,
    /// Each cause is bounded independently by the same limit.
    PerCause,
}

/// Policy knobs for a single DAG watcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Wall-clock limit for one submission, used when the resource file has none.
    pub timeout_secs: Option<u64>,
    pub resubmit_limit: u32,
    pub resubmit_budget: ResubmitBudget,
    /// Ordered GPU memory tiers (MB) used when a job runs out of GPU memory.
    pub gpu_memory_thresholds: Vec<u64>,
    /// Ordered `request_memory` tiers (MB) used when a job exceeds its memory limit.
    pub cpu_memory_thresholds: Vec<u64>,
    pub oom_marker: String,
    pub log_tail_lines: usize,
    /// Time a DAG may stay live after all finish markers exist.
    pub stuck_grace_secs: u64,
    pub error_log_capacity: usize,
    /// Directory for the aggregated per-fleet error log.
    pub global_error_dir: Option<PathBuf>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            resubmit_limit: 3,
            resubmit_budget: ResubmitBudget::Shared,
            gpu_memory_thresholds: vec![8_000, 11_000, 16_000, 24_000, 32_000, 48_000, 80_000],
            cpu_memory_thresholds: vec![16_384, 32_768, 65_536, 131_072],
            oom_marker: DEFAULT_OOM_MARKER.to_string(),
            log_tail_lines: 100,
            stuck_grace_secs: 600,
            error_log_capacity: 200,
            global_error_dir: None,
        }
    }
}

impl WatcherConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn stuck_grace(&self) -> Duration {
        Duration::from_secs(self.stuck_grace_secs)
    }

    pub fn with_resubmit_limit(mut self, limit: u32) -> Self {
        self.resubmit_limit = limit;
        self
    }

    pub fn with_gpu_thresholds(mut self, thresholds: Vec<u64>) -> Self {
        self.gpu_memory_thresholds = thresholds;
        self
    }

    pub fn with_cpu_thresholds(mut self, thresholds: Vec<u64>) -> Self {
        self.cpu_memory_thresholds = thresholds;
        self
    }

    pub fn with_global_error_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_error_dir = Some(dir.into());
        self
    }
}

/// Defaults applied to every generated job descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub universe: String,
    pub docker_image: Option<String>,
    /// Base `requirements` clauses, each AND-ed with the others.
    pub requirements: Vec<String>,
    /// Prepended to `PATH` inside the shell wrapper.
    pub path_export: Option<String>,
    pub dag_file_name: String,
    /// Priority assigned to jobs that carry a GPU memory filter.
    pub raised_priority: i32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            universe: "vanilla".to_string(),
            docker_image: None,
            requirements: Vec::new(),
            path_export: None,
            dag_file_name: "dag.submit".to_string(),
            raised_priority: 20,
        }
    }
}

impl GraphConfig {
    pub fn with_docker_image(mut self, image: impl Into<String>) -> Self {
        self.universe = "docker".to_string();
        self.docker_image = Some(image.into());
        self
    }

    pub fn with_requirement(mut self, clause: impl Into<String>) -> Self {
        self.requirements.push(clause.into());
        self
    }
}

/// Configuration for a fleet of DAG watchers fed from a watch directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub watch_dir: PathBuf,
    /// Pattern, relative to `watch_dir`, matching task files.
    pub task_glob: String,
    /// Resource file used when a task file has no `<stem>.resources.json` companion.
    pub default_resource_file: Option<PathBuf>,
    /// Where the registry is persisted; `None` keeps it in memory only.
    pub registry_file: Option<PathBuf>,
    pub watcher: WatcherConfig,
    pub graph: GraphConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("."),
            task_glob: "*.tasks".to_string(),
            default_resource_file: None,
            registry_file: None,
            watcher: WatcherConfig::default(),
            graph: GraphConfig::default(),
        }
    }
}

impl FleetConfig {
    pub fn new(watch_dir: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_registry_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_file = Some(path.into());
        self
    }

    pub fn with_watcher(mut self, watcher: WatcherConfig) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn with_graph(mut self, graph: GraphConfig) -> Self {
        self.graph = graph;
        self
    }

    pub fn watcher_config(&self) -> Arc<WatcherConfig> {
        Arc::new(self.watcher.clone())
    }
}

/// Resource request produced by the resource loader for one task file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResourceParams {
    pub request_gpus: Option<u32>,
    /// Minimum GPU memory (MB); becomes a `GPUMEM >= N` requirement.
    pub condor_memory_filter: Option<u64>,
    /// Host memory request (MB); becomes `request_memory`.
    pub cpu_memory_filter: Option<u64>,
    /// Wall-clock limit in seconds.
    pub timeout: Option<u64>,
    /// Any other key is copied verbatim into the descriptor.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ResourceParams {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

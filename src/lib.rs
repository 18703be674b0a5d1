//! Build HTCondor-style DAGs from task files and keep them alive.
//!
//! [`graph::JobGraphBuilder`] turns task lines into wrapper scripts, submit
//! files ([`descriptor::JobDescriptor`]) and a DAG description.
//! [`watcher::JobWatcher`] submits the DAG through a
//! [`scheduler::SchedulerClient`] and reacts to timeouts, out-of-memory
//! failures and held sub-jobs. [`fleet::FleetWatcher`] does the same for
//! every task file dropped into a directory.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod fleet;
pub mod graph;
pub mod scheduler;
pub mod watcher;

pub use config::{FleetConfig, GraphConfig, ResourceParams, ResubmitBudget, WatcherConfig};
pub use descriptor::JobDescriptor;
pub use error::{DagError, Result};
pub use fleet::{DagFailure, FleetWatcher};
pub use graph::{JobGraph, JobGraphBuilder};
pub use scheduler::{InMemoryScheduler, SchedulerClient};
pub use watcher::{JobWatcher, WatcherPhase};

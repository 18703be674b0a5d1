//! Turning task files into runnable job graphs.
//!
//! Each non-empty line of a task file becomes one [`Job`]: a bash wrapper, a
//! submit file, and the paths of its log and finish marker. Jobs are linked
//! by hierarchy depth: the first jobs form a chain and every later job fans
//! out from the last link.
//!
//! # Layout
//!
//! ```text
//! {exec_dir}/{id}.sh           wrapper script
//! {exec_dir}/{id}.condor       submit file
//! {exec_dir}/{id}.log          teed command output
//! {exec_dir}/{id}_finish.log   touched on success
//! {exec_dir}/dag.submit        DAG description (+ .metrics, .nodes.log)
//! {exec_dir}.done / .err       terminal markers
//! ```

pub mod builder;
pub mod dag;
pub mod job;
pub mod wrapper;

pub use builder::{read_task_lines, JobGraph, JobGraphBuilder};
pub use dag::{DagFormatter, DagmanFormatter};
pub use job::{with_suffix, DagPaths, Job, MAX_HIERARCHY_DEPTH};
pub use wrapper::{wrapper_script, EXIT_CODE_PREFIX, WRAPPER_FAILURE_EXIT};

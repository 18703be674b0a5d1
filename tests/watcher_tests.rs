//! Watcher tests: a DAG built from task lines, driven through resubmission,
//! escalation and completion with explicit poll times.


use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use dagman_lite::config::{GraphConfig, ResourceParams, WatcherConfig};
use dagman_lite::descriptor::JobDescriptor;
use dagman_lite::graph::JobGraphBuilder;
use dagman_lite::scheduler::{InMemoryScheduler, JobAction, StatusRow};
use dagman_lite::watcher::{JobWatcher, ResubmitCause, WatcherPhase};
use test_harness::{init_tracing, t0};

fn build(dir: &Path, commands: &[&str], config: WatcherConfig) -> JobWatcher {
    init_tracing();
    let lines: Vec<String> = commands.iter().map(|c| c.to_string()).collect();
    let graph = JobGraphBuilder::new(GraphConfig::default().with_requirement("CUDACapability >= 7"))
        .build_graph(&lines, &dir.join("run"), &ResourceParams::default())
        .unwrap();
    JobWatcher::from_graph(graph, Arc::new(config))
}

fn metrics(watcher: &JobWatcher, exit_code: i32) {
    fs::write(
        &watcher.state().paths.metrics_file,
        format!(r#"{{"exitcode": {}, "DagStatus": {}}}"#, exit_code, exit_code),
    )
    .unwrap();
}

/// Test 1: OOM raises GPUMEM on the failing job only, then the rerun succeeds
#[test]
fn test_oom_escalation_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = build(dir.path(), &["python a.py", "python b.py"], WatcherConfig::default());
    let mut s = InMemoryScheduler::new();
    assert!(w.submit_at(&mut s, t0()).unwrap());
    let first = w.cluster_id().unwrap();

    let jobs = w.state().jobs.clone();
    fs::write(&jobs[1].log_path, "epoch 1\ntensorflow ResourceExhaustedError: OOM when allocating\n")
        .unwrap();

    assert!(w.poll_at(&mut s, t0() + Duration::minutes(1)));
    assert!(!s.is_queued(first));
    assert_ne!(w.cluster_id(), Some(first));
    assert_eq!(w.state().resubmits.count(ResubmitCause::OutOfMemory), 1);

    let escalated = JobDescriptor::load(&jobs[1].condor_file_path).unwrap();
    assert_eq!(
        escalated.get("requirements").as_deref(),
        Some("(CUDACapability >= 7) && (GPUMEM >= 8000)")
    );
    let untouched = JobDescriptor::load(&jobs[0].condor_file_path).unwrap();
    assert_eq!(
        untouched.get("requirements").as_deref(),
        Some("(CUDACapability >= 7)")
    );
    assert!(dir.path().join("run/1.oom-1.log").exists());

    // Rerun succeeds
    for job in &jobs {
        fs::write(&job.finish_marker_path, "").unwrap();
    }
    metrics(&w, 0);
    s.complete(w.cluster_id().unwrap(), 0);
    assert!(!w.poll_at(&mut s, t0() + Duration::minutes(30)));
    assert!(!w.finish().unwrap());
    assert!(w.done_file().exists());
}

/// Test 2: Timeout and OOM resubmissions share one budget
#[test]
fn test_shared_budget_across_causes() {
    let dir = tempfile::tempdir().unwrap();
    let config = WatcherConfig {
        timeout_secs: Some(600),
        ..WatcherConfig::default().with_resubmit_limit(2)
    };
    let mut w = build(dir.path(), &["python a.py"], config);
    let mut s = InMemoryScheduler::new();
    w.submit_at(&mut s, t0()).unwrap();

    assert!(w.poll_at(&mut s, t0() + Duration::minutes(11)));
    assert_eq!(w.state().resubmits.count(ResubmitCause::Timeout), 1);

    let log = w.state().jobs[0].log_path.clone();
    fs::write(&log, "ResourceExhaustedError\n").unwrap();
    assert!(w.poll_at(&mut s, t0() + Duration::minutes(12)));
    assert_eq!(w.state().times_resubmitted(), 2);

    assert!(!w.poll_at(&mut s, t0() + Duration::minutes(30)));
    assert_eq!(w.phase(), WatcherPhase::FinishedError);
    assert_eq!(s.submissions().len(), 3);
    assert_eq!(w.state().times_resubmitted(), 2);

    assert!(w.finish().unwrap());
    let report = fs::read_to_string(&w.state().paths.error_file).unwrap();
    assert!(report.contains("resubmit limit of 2 reached"));
}

/// Test 3: Sub-job holds are handled per hold code within one DAG
#[test]
fn test_mixed_sub_job_holds() {
    let dir = tempfile::tempdir().unwrap();
    let config = WatcherConfig::default().with_cpu_thresholds(vec![8192, 16384]);
    let mut w = build(dir.path(), &["a", "b", "c"], config);
    let mut s = InMemoryScheduler::new();
    w.submit_at(&mut s, t0()).unwrap();
    let nodes_log = w.state().paths.nodes_log.clone();

    let duration = s.spawn_sub_job(&nodes_log, StatusRow::held(0, 46, "MaxJobDuration exceeded"));
    let memory = s.spawn_sub_job(
        &nodes_log,
        StatusRow {
            request_memory: Some(8192),
            ..StatusRow::held(0, 34, "memory usage exceeded request_memory")
        },
    );
    let unknown = s.spawn_sub_job(&nodes_log, StatusRow::held(0, 12, "transfer failed"));

    assert!(w.poll_at(&mut s, t0()));
    assert!(s.actions().contains(&(duration, JobAction::Release)));
    assert!(s.actions().contains(&(memory, JobAction::Release)));
    assert!(!s.actions().iter().any(|(id, _)| *id == unknown));
    assert_eq!(s.row(memory).unwrap().request_memory, Some(16384));
    assert_eq!(w.state().request_memory_index, 2);
    assert_eq!(w.state().times_resubmitted(), 2);
    assert_eq!(w.state().sub_job_ids.len(), 3);
}

/// Test 4: The error log keeps only the newest entries
#[test]
fn test_error_log_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let config = WatcherConfig {
        error_log_capacity: 3,
        ..WatcherConfig::default()
    };
    let mut w = build(dir.path(), &["a"], config);
    let mut s = InMemoryScheduler::new();
    w.submit_at(&mut s, t0()).unwrap();

    for _ in 0..5 {
        s.fail_next("schedd not responding");
        assert!(w.poll_at(&mut s, t0()));
    }
    assert_eq!(w.state().error_log.len(), 3);
    assert_eq!(w.state().error_log.dropped(), 2);
    assert!(w.state().error_status.is_empty());
}

/// Test 5: Watcher state survives a JSON round trip mid-flight
#[test]
fn test_restored_watcher_keeps_polling() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(WatcherConfig {
        timeout_secs: Some(600),
        ..WatcherConfig::default()
    });
    let lines = vec!["echo 1".to_string()];
    let graph = JobGraphBuilder::default()
        .build_graph(&lines, &dir.path().join("run"), &ResourceParams::default())
        .unwrap();
    let mut w = JobWatcher::from_graph(graph, Arc::clone(&config));
    let mut s = InMemoryScheduler::new();
    w.submit_at(&mut s, t0()).unwrap();

    let json = serde_json::to_string(w.state()).unwrap();
    let mut restored = JobWatcher::from_state(serde_json::from_str(&json).unwrap(), config);
    assert_eq!(restored.cluster_id(), w.cluster_id());

    // Start time came along, so the timeout still fires
    assert!(restored.poll_at(&mut s, t0() + Duration::minutes(11)));
    assert_eq!(restored.state().times_resubmitted(), 1);
}

/// Test 6: Logs left by an earlier attempt do not trigger a resubmit
#[test]
fn test_stale_oom_log_is_ignored_after_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let run = dir.path().join("run");
    fs::create_dir_all(&run).unwrap();
    fs::write(run.join("0.log"), "ResourceExhaustedError: OOM when allocating\n").unwrap();
    fs::write(run.join("0_finish.log"), "").unwrap();

    let mut w = build(dir.path(), &["python a.py"], WatcherConfig::default());
    let mut s = InMemoryScheduler::new();
    assert!(w.submit_at(&mut s, t0()).unwrap());
    let cluster = w.cluster_id().unwrap();

    assert!(w.poll_at(&mut s, t0() + Duration::minutes(1)));
    assert_eq!(s.submissions().len(), 1);
    assert_eq!(w.cluster_id(), Some(cluster));
    assert_eq!(w.state().resubmits.count(ResubmitCause::OutOfMemory), 0);
    assert!(!w.state().jobs[0].is_finished());
}

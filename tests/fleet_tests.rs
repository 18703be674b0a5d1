//! Fleet tests: discovery, submission, completion and restart through
//! `FleetWatcher::tick` against the in-memory scheduler.


use std::fs;

use dagman_lite::config::{FleetConfig, WatcherConfig};
use dagman_lite::descriptor::JobDescriptor;
use dagman_lite::fleet::FleetWatcher;
use dagman_lite::scheduler::{InMemoryScheduler, SchedulerClient};
use test_harness::TestFleet;

/// Test 1: Every new task file is submitted exactly once
#[test]
fn test_tick_submits_new_task_files() {
    let mut t = TestFleet::new();
    t.add_task_file("a", &["echo a1", "echo a2"]);
    t.add_task_file("b", &["echo b1"]);

    let failures = t.fleet.tick().unwrap();
    assert!(failures.is_empty());
    assert_eq!(t.fleet.registry().len(), 2);
    assert_eq!(t.fleet.client().submissions().len(), 2);

    // Nothing new on disk, nothing new submitted
    t.fleet.tick().unwrap();
    assert_eq!(t.fleet.client().submissions().len(), 2);
}

/// Test 2: A clean DAG ends with a done file and leaves the registry
#[test]
fn test_clean_dag_writes_done_file() {
    let mut t = TestFleet::new();
    t.add_task_file("a", &["echo 1", "echo 2", "echo 3"]);
    t.fleet.tick().unwrap();

    t.complete_dag("a", 0);
    let failures = t.fleet.tick().unwrap();
    assert!(failures.is_empty(), "unexpected failures: {:?}", failures);
    assert!(t.done_file("a").exists());
    assert!(!t.error_file("a").exists());
    assert!(t.fleet.registry().is_empty());

    // Done task files are never resubmitted
    t.fleet.tick().unwrap();
    assert_eq!(t.fleet.client().submissions().len(), 1);
}

/// Test 3: A failed job is reported with its log excerpt
#[test]
fn test_failed_dag_is_reported() {
    let mut t = TestFleet::with_config(|config| {
        let global = config.watch_dir.join("errors");
        config.with_watcher(WatcherConfig::default().with_global_error_dir(global))
    });
    t.add_task_file("a", &["python train.py"]);
    t.fleet.tick().unwrap();

    t.write_job_log("a", 0, "loading data\nKeyError: 'label'\nExit code: 1\n");
    t.complete_dag("a", 1);

    let failures = t.fleet.tick().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].done_file, t.done_file("a"));
    assert!(failures[0].errors["job 0"].contains("KeyError"));

    let report = fs::read_to_string(t.error_file("a")).unwrap();
    assert!(report.contains("job 0: exit code 1"));
    assert!(!t.done_file("a").exists());

    let global = t
        .watch_dir()
        .join("errors")
        .join(format!("{}.err", t.fleet.id()));
    assert!(fs::read_to_string(global).unwrap().contains("job 0"));
}

/// Test 4: Companion resource file shapes the submit files and timeout
#[test]
fn test_resource_file_is_applied() {
    let mut t = TestFleet::new();
    t.add_task_file("a", &["python train.py"]);
    t.add_resources(
        "a",
        r#"{"condor_memory_filter": 16000, "request_gpus": 1, "request_cpus": 2, "timeout": 60}"#,
    );
    t.fleet.tick().unwrap();

    let d = JobDescriptor::load(&t.watch_dir().join("a/0.condor")).unwrap();
    assert!(d.get("requirements").unwrap().contains("GPUMEM >= 16000"));
    assert_eq!(d.get("priority").as_deref(), Some("20"));
    assert_eq!(d.get("request_gpus").as_deref(), Some("1"));
    assert_eq!(d.get("request_cpus").as_deref(), Some("2"));
    assert_eq!(t.watcher("a").unwrap().state().timeout_secs, Some(60));
}

/// Test 5: An unreadable resource file fails only that task file
#[test]
fn test_bad_resource_file_is_reported_once() {
    let mut t = TestFleet::new();
    t.add_task_file("a", &["echo a"]);
    t.add_resources("a", "{not json");
    t.add_task_file("b", &["echo b"]);

    let failures = t.fleet.tick().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].errors.contains_key("submit"));
    assert_eq!(t.fleet.registry().len(), 1);
    assert!(t.watcher("b").is_some());

    assert!(t.fleet.tick().unwrap().is_empty());
}

/// Test 6: A restarted fleet re-attaches to live clusters instead of resubmitting
#[test]
fn test_registry_restores_after_restart() {
    let t = TestFleet::with_config(|config| {
        let registry = config.watch_dir.join("state/fleet.json");
        config.with_registry_file(registry)
    });
    t.add_task_file("a", &["echo 1"]);
    let config = t.fleet.config().clone();
    let TestFleet { dir, mut fleet } = t;
    fleet.tick().unwrap();
    drop(fleet);

    // New scheduler client that still knows the running cluster
    let mut scheduler = InMemoryScheduler::new();
    scheduler
        .submit_dag(&dir.path().join("a/dag.submit"))
        .unwrap();

    let mut fleet = FleetWatcher::new(config, scheduler).unwrap();
    assert_eq!(fleet.registry().len(), 1);
    assert!(fleet.tick().unwrap().is_empty());
    assert_eq!(fleet.client().submissions().len(), 1);
    assert_eq!(fleet.registry().len(), 1);
}

/// Test 7: Default resource file is used when there is no companion
#[test]
fn test_default_resource_file_fallback() {
    let mut t = TestFleet::with_config(|mut config: FleetConfig| {
        let default = config.watch_dir.join("defaults.json");
        fs::write(&default, r#"{"cpu_memory_filter": 8192}"#).unwrap();
        config.default_resource_file = Some(default);
        config
    });
    t.add_task_file("a", &["echo 1"]);
    t.fleet.tick().unwrap();

    let d = JobDescriptor::load(&t.watch_dir().join("a/0.condor")).unwrap();
    assert_eq!(d.get("request_memory").as_deref(), Some("8192"));
}

// Worker iteration over a task list: outcomes, interruption, store faults

use async_trait::async_trait;
use solo::prelude::*;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

struct FailingTask(&'static str);

#[async_trait]
impl Task for FailingTask {
    fn id(&self) -> &str {
        self.0
    }

    async fn run(&self) -> anyhow::Result<()> {
        anyhow::bail!("{} broke", self.0)
    }
}

struct CountingTask {
    id: &'static str,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Task for CountingTask {
    fn id(&self) -> &str {
        self.id
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn worker(store: &Arc<InMemoryStore>) -> ExclusiveWorker {
    ExclusiveWorker::new(store.clone(), LeaseSpec::new(Duration::from_secs(15)), "service")
}

#[tokio::test(start_paused = true)]
async fn test_failures_and_non_leadership_do_not_stop_the_pass() {
    let store = Arc::new(InMemoryStore::new());
    let runs = Arc::new(AtomicUsize::new(0));

    // someone else already leads taskB
    let other = LeaseManager::new(store.clone(), LeaseSpec::default());
    other.create().await.unwrap();
    assert!(other.acquire(&lock_key("service", "taskB"), b"other").await.unwrap());

    let tasks: Vec<Arc<dyn Task>> = vec![
        Arc::new(FailingTask("taskA")),
        Arc::new(CountingTask { id: "taskB", runs: runs.clone() }),
        Arc::new(CountingTask { id: "taskC", runs: runs.clone() }),
    ];

    let report = worker(&store).run(&tasks).await.unwrap();
    assert!(!report.interrupted);
    assert_eq!(report.tasks.len(), 3);
    assert!(matches!(report.tasks[0].outcome, TaskOutcome::Failed(_)));
    assert!(matches!(report.tasks[1].outcome, TaskOutcome::NotLeader));
    assert!(matches!(report.tasks[2].outcome, TaskOutcome::Completed));
    assert_eq!(report.leader_count(), 2);
    assert_eq!(report.failures(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // three leases created by the worker, three destroyed; the other holder remains
    let stats = store.stats();
    assert_eq!(stats.created, 4);
    assert_eq!(stats.destroyed, 3);
    assert_eq!(store.active_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_lease_and_skips_remaining_tasks() {
    let store = Arc::new(InMemoryStore::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let worker = Arc::new(worker(&store));

    let tasks: Vec<Arc<dyn Task>> = vec![
        Arc::new(SleepTask::new("long", Duration::from_secs(3600))),
        Arc::new(CountingTask { id: "after", runs: runs.clone() }),
    ];

    let running = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run(&tasks).await }
    });

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(worker.leader("long").await.unwrap().is_some());
    worker.stop();

    let report = running.await.unwrap().unwrap();
    assert!(report.interrupted);
    assert_eq!(report.tasks.len(), 1);
    assert!(matches!(report.tasks[0].outcome, TaskOutcome::Aborted));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert_eq!(store.stats().destroyed, 1);
    assert_eq!(report.release_failures(), 0);
    assert_eq!(store.active_sessions(), 0);
    assert!(worker.leader("long").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_outage_reports_release_failure() {
    let store = Arc::new(InMemoryStore::new());
    let worker = Arc::new(worker(&store));
    let tasks: Vec<Arc<dyn Task>> = vec![Arc::new(SleepTask::new("long", Duration::from_secs(3600)))];

    let running = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run(&tasks).await }
    });

    tokio::time::sleep(Duration::from_secs(40)).await;
    store.set_available(false);
    worker.stop();

    let report = running.await.unwrap().unwrap();
    assert!(report.interrupted);
    assert!(matches!(report.tasks[0].outcome, TaskOutcome::Aborted));
    assert!(!report.tasks[0].lease_released);
    assert_eq!(report.release_failures(), 1);

    store.set_available(true);
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(store.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_store_fault_during_setup_aborts_run() {
    let store = Arc::new(InMemoryStore::new());
    store.set_available(false);
    let runs = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<Arc<dyn Task>> = vec![Arc::new(CountingTask { id: "taskA", runs: runs.clone() })];

    let err = worker(&store).run(&tasks).await.unwrap_err();
    assert!(err.is_store_unavailable());
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tasks_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
namespace = "jobs"

[store]
backend = "memory"

[[tasks]]
id = "first"
duration = "1s"

[[tasks]]
id = "second"
duration = "2s"
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    let store = config.store.build().unwrap();
    let worker = ExclusiveWorker::new(store, config.lease.spec(), config.namespace.clone());

    let report = worker.run(&config.build_tasks().unwrap()).await.unwrap();
    let keys: Vec<_> = report.tasks.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["jobs/first/leader", "jobs/second/leader"]);
    assert_eq!(report.leader_count(), 2);
    assert_eq!(report.failures(), 0);
}

// Several workers racing for the same task keys through one shared store

use async_trait::async_trait;
use solo::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinSet;

const KEY: &str = "service/taskA/leader";

/// Records how many copies of itself run at the same time
struct OverlapTask {
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Task for OverlapTask {
    fn id(&self) -> &str {
        "taskA"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(20)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_only_one_gate_wins() {
    let store = Arc::new(InMemoryStore::new());
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let mut workers = JoinSet::new();
    for _ in 0..8 {
        let store = store.clone();
        let task = OverlapTask {
            running: running.clone(),
            max_running: max_running.clone(),
            runs: runs.clone(),
        };
        workers.spawn(async move {
            let mut gate = ExclusiveTaskGate::new(store, LeaseSpec::new(Duration::from_secs(15)), KEY);
            gate.run(&task, &CancellationToken::new()).await
        });
    }

    let mut leaders = 0;
    let mut followers = 0;
    while let Some(joined) = workers.join_next().await {
        match joined.unwrap().unwrap() {
            TaskOutcome::Completed => leaders += 1,
            TaskOutcome::NotLeader => followers += 1,
            other => panic!("unexpected outcome: {}", other),
        }
    }

    assert_eq!(leaders, 1);
    assert_eq!(followers, 7);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);

    // every lease created was destroyed exactly once
    let stats = store.stats();
    assert_eq!(stats.created, 8);
    assert_eq!(stats.destroyed, 8);
    assert_eq!(store.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_raw_acquire_has_single_winner() {
    let store = Arc::new(InMemoryStore::new());
    let mut attempts = JoinSet::new();

    for _ in 0..16 {
        let store = store.clone();
        attempts.spawn(async move {
            let manager = LeaseManager::new(store, LeaseSpec::default());
            manager.create().await.unwrap();
            manager.acquire(KEY, b"me").await.unwrap()
        });
    }

    let mut winners = 0;
    while let Some(held) = attempts.join_next().await {
        if held.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(start_paused = true)]
async fn test_two_workers_hand_over_after_lock_delay() {
    let store = Arc::new(InMemoryStore::with_lock_delay(Duration::from_secs(15)));
    let spec = LeaseSpec::new(Duration::from_secs(15));
    let task: Arc<dyn Task> = Arc::new(SleepTask::new("taskA", Duration::from_secs(30)));

    let first = tokio::spawn({
        let store = store.clone();
        let spec = spec.clone();
        let task = task.clone();
        async move {
            let worker = ExclusiveWorker::new(store, spec, "service");
            worker.run(&[task]).await
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    let second = ExclusiveWorker::new(store.clone(), spec.clone(), "service");
    let holder = second.leader("taskA").await.unwrap();
    assert!(holder.is_some());

    let report = second.run(&[task.clone()]).await.unwrap();
    assert!(matches!(report.tasks[0].outcome, TaskOutcome::NotLeader));
    assert_eq!(report.tasks[0].key, KEY);

    let report = first.await.unwrap().unwrap();
    assert!(matches!(report.tasks[0].outcome, TaskOutcome::Completed));
    // the leader renewed roughly every 7.5s while working
    assert!(store.stats().renewed >= 3);

    // the key was deleted but is still inside its lock-delay window
    assert!(second.leader("taskA").await.unwrap().is_none());
    let report = second.run(&[task.clone()]).await.unwrap();
    assert!(matches!(report.tasks[0].outcome, TaskOutcome::NotLeader));

    tokio::time::sleep(Duration::from_secs(15)).await;
    let report = second.run(&[task]).await.unwrap();
    assert!(matches!(report.tasks[0].outcome, TaskOutcome::Completed));
    assert_eq!(store.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_crashed_leader_lease_expires() {
    let store = Arc::new(InMemoryStore::with_lock_delay(Duration::from_secs(15)));

    // a worker that acquired and then vanished without renewing or destroying
    let crashed = LeaseManager::new(store.clone(), LeaseSpec::new(Duration::from_secs(15)));
    crashed.create().await.unwrap();
    assert!(crashed.acquire(KEY, b"crashed").await.unwrap());

    let survivor = LeaseManager::new(store.clone(), LeaseSpec::new(Duration::from_secs(15)));
    survivor.create().await.unwrap();
    assert!(!survivor.acquire(KEY, b"survivor").await.unwrap());
    survivor.destroy().await.unwrap();

    // TTL expiry, then lock-delay
    tokio::time::sleep(Duration::from_secs(15)).await;
    survivor.create().await.unwrap();
    assert!(!survivor.acquire(KEY, b"survivor").await.unwrap());
    survivor.destroy().await.unwrap();

    tokio::time::sleep(Duration::from_secs(15)).await;
    survivor.create().await.unwrap();
    assert!(survivor.acquire(KEY, b"survivor").await.unwrap());
}

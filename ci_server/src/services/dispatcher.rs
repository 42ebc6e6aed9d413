//! Job dispatcher: background task that drains the webhook queue into a
//! bounded pool of concurrent runs.
//!
//! Runs for one working directory never overlap. An event whose directory is
//! busy is parked behind the active run instead of taking a worker, so a
//! burst of pushes to one repository cannot starve the others. Intake stops
//! while every worker is busy or the parked backlog is full; events then wait
//! in the bounded queue and the webhook handler rejects once it fills up.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use ci_pipeline::{BuildEvent, JobOrchestrator};
use tokio::sync::mpsc;

/// Sends the run's path back to the dispatcher when dropped, including when
/// the run panics.
struct RunFinished {
    path: Option<PathBuf>,
    done: mpsc::UnboundedSender<PathBuf>,
}

impl Drop for RunFinished {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = self.done.send(path);
        }
    }
}

fn spawn_run(
    orchestrator: &Arc<JobOrchestrator>,
    event: BuildEvent,
    path: PathBuf,
    done: &mpsc::UnboundedSender<PathBuf>,
) {
    tracing::debug!(repo = %event.repo_clone_url, "Dispatching run");
    let orchestrator = orchestrator.clone();
    let finished = RunFinished {
        path: Some(path),
        done: done.clone(),
    };
    tokio::spawn(async move {
        let _finished = finished;
        orchestrator.run(event).await;
    });
}

/// Run the dispatcher until every sender is dropped, then wait for the runs
/// still in flight. Spawned as a background tokio task.
///
/// At most `max_concurrent` runs execute at once and at most `max_parked`
/// events wait behind a busy working directory.
pub async fn run_dispatcher(
    orchestrator: Arc<JobOrchestrator>,
    mut jobs: mpsc::Receiver<BuildEvent>,
    max_concurrent: usize,
    max_parked: usize,
) {
    let max_concurrent = max_concurrent.max(1);
    let max_parked = max_parked.max(1);
    tracing::info!(max_concurrent, max_parked, "Job dispatcher started");

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<PathBuf>();
    // Busy working directories, each with the events parked behind it.
    let mut busy: HashMap<PathBuf, VecDeque<BuildEvent>> = HashMap::new();
    let mut running = 0usize;
    let mut parked = 0usize;
    let mut open = true;

    loop {
        if !open && running == 0 {
            break;
        }

        tokio::select! {
            Some(path) = done_rx.recv() => {
                running -= 1;
                match busy.get_mut(&path).and_then(VecDeque::pop_front) {
                    Some(next) => {
                        parked -= 1;
                        running += 1;
                        spawn_run(&orchestrator, next, path, &done_tx);
                    }
                    None => {
                        busy.remove(&path);
                    }
                }
            }
            received = jobs.recv(), if open && running < max_concurrent && parked < max_parked => {
                let Some(event) = received else {
                    tracing::info!("Job queue closed, waiting for running jobs");
                    open = false;
                    continue;
                };
                let path = orchestrator.local_path(&event);
                match busy.get_mut(&path) {
                    Some(waiting) => {
                        tracing::debug!(
                            repo = %event.repo_clone_url,
                            "Working copy busy, parking event"
                        );
                        waiting.push_back(event);
                        parked += 1;
                    }
                    None => {
                        busy.insert(path.clone(), VecDeque::new());
                        running += 1;
                        spawn_run(&orchestrator, event, path, &done_tx);
                    }
                }
            }
        }
    }

    tracing::info!("Job dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use ci_pipeline::stages::StageRunner;
    use ci_pipeline::status::{CommitStatusReport, StatusSink, StatusTarget};
    use ci_pipeline::sync::Synchronizer;
    use ci_pipeline::{PipelineConfig, StageOutcome, SyncResult};

    /// Counts concurrent syncs, remembers the peak and when each one started.
    struct SlowSync {
        delay: Duration,
        epoch: Instant,
        active: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
        starts: Mutex<Vec<(String, Duration)>>,
    }

    impl SlowSync {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                epoch: Instant::now(),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                done: AtomicUsize::new(0),
                starts: Mutex::new(Vec::new()),
            })
        }

        fn started_at(&self, label: &str) -> Vec<Duration> {
            self.starts
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _)| l == label)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    #[async_trait]
    impl Synchronizer for SlowSync {
        async fn sync(&self, event: &BuildEvent, _local_path: &Path) -> SyncResult {
            let label = event.commit_sha.clone().unwrap_or_default();
            self.starts.lock().unwrap().push((label, self.epoch.elapsed()));
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
            SyncResult::Cloned
        }
    }

    struct Pass;

    #[async_trait]
    impl StageRunner for Pass {
        fn name(&self) -> &'static str {
            "pass"
        }

        async fn run(&self, _local_path: &Path, _event: &BuildEvent) -> StageOutcome {
            StageOutcome::Success
        }
    }

    struct Silent;

    #[async_trait]
    impl StatusSink for Silent {
        async fn publish(&self, _target: &StatusTarget, _report: &CommitStatusReport) -> bool {
            true
        }
    }

    fn orchestrator(sync: Arc<SlowSync>) -> Arc<JobOrchestrator> {
        let workspace = std::env::temp_dir().join("cihook-dispatcher-tests");
        let config = PipelineConfig {
            workspace_dir: workspace,
            ..PipelineConfig::default()
        };
        Arc::new(JobOrchestrator::new(
            config,
            sync,
            Arc::new(Pass),
            Arc::new(Pass),
            Arc::new(Silent),
        ))
    }

    fn push(repo: &str, label: &str) -> BuildEvent {
        BuildEvent::for_clone_url(format!("https://github.com/u/{repo}.git")).with_commit(label)
    }

    #[tokio::test]
    async fn runs_every_job_within_the_concurrency_limit() {
        let sync = SlowSync::new(Duration::from_millis(50));
        let (tx, rx) = mpsc::channel(16);
        let dispatcher = tokio::spawn(run_dispatcher(orchestrator(sync.clone()), rx, 2, 8));

        for i in 0..6 {
            tx.send(push(&format!("repo{i}"), &format!("c{i}"))).await.unwrap();
        }
        drop(tx);
        dispatcher.await.unwrap();

        assert_eq!(sync.done.load(Ordering::SeqCst), 6);
        assert_eq!(sync.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn busy_repository_does_not_hold_back_others() {
        let sync = SlowSync::new(Duration::from_millis(400));
        let (tx, rx) = mpsc::channel(16);
        let dispatcher = tokio::spawn(run_dispatcher(orchestrator(sync.clone()), rx, 2, 8));

        tx.send(push("a", "a1")).await.unwrap();
        tx.send(push("a", "a2")).await.unwrap();
        tx.send(push("b", "b1")).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        let a1 = sync.started_at("a1")[0];
        let a2 = sync.started_at("a2")[0];
        let b1 = sync.started_at("b1")[0];
        assert!(b1 < a1 + Duration::from_millis(200), "b1 waited: a1={a1:?} b1={b1:?}");
        assert!(a2 >= a1 + Duration::from_millis(400), "a2 overlapped a1: {a1:?} {a2:?}");
        assert_eq!(sync.done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn parked_events_run_in_arrival_order() {
        let sync = SlowSync::new(Duration::from_millis(20));
        let (tx, rx) = mpsc::channel(16);
        let dispatcher = tokio::spawn(run_dispatcher(orchestrator(sync.clone()), rx, 4, 8));

        for label in ["a1", "a2", "a3"] {
            tx.send(push("a", label)).await.unwrap();
        }
        drop(tx);
        dispatcher.await.unwrap();

        let order: Vec<String> =
            sync.starts.lock().unwrap().iter().map(|(l, _)| l.clone()).collect();
        assert_eq!(order, ["a1", "a2", "a3"]);
        assert_eq!(sync.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_when_queue_closes() {
        let sync = SlowSync::new(Duration::from_millis(50));
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        tokio::time::timeout(
            Duration::from_secs(5),
            run_dispatcher(orchestrator(sync.clone()), rx, 1, 1),
        )
        .await
        .expect("dispatcher returns once the queue is closed");
        assert_eq!(sync.done.load(Ordering::SeqCst), 0);
    }
}

use crate::job_engine::closure_job::ClosureJob;
use crate::job_engine::handle::{JobHandle, JobState};
use crate::job_engine::job::Job;
use crate::job_engine::scheduler::Scheduler;

use futures::channel::oneshot;
use futures::future::FutureObj;
use futures::task::{noop_waker, Spawn, SpawnError};
use futures::FutureExt;
use proptest::prelude::*;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

/// Spawner that only stores futures. The test decides when they are polled.
#[derive(Clone, Default)]
struct ManualSpawner {
    tasks: Arc<Mutex<Vec<FutureObj<'static, ()>>>>,
    closed: Arc<AtomicBool>,
}

impl Spawn for ManualSpawner {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SpawnError::shutdown());
        }
        self.tasks.lock().unwrap().push(future);
        Ok(())
    }
}

impl ManualSpawner {
    fn spawned(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Polls every task until none of them makes progress anymore.
    fn settle(&self) {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        loop {
            let batch = std::mem::take(&mut *self.tasks.lock().unwrap());
            if batch.is_empty() {
                return;
            }
            let mut pending = Vec::new();
            let mut finished = false;
            for mut task in batch {
                match task.poll_unpin(&mut cx) {
                    // dropping the task here fires its completion
                    Poll::Ready(()) => finished = true,
                    Poll::Pending => pending.push(task),
                }
            }
            let mut tasks = self.tasks.lock().unwrap();
            let spawned_meanwhile = !tasks.is_empty();
            pending.append(&mut tasks);
            *tasks = pending;
            drop(tasks);
            if !finished && !spawned_meanwhile {
                return;
            }
        }
    }

    /// Drops every task, started or not, without completing it.
    fn drop_all(&self) {
        let batch = std::mem::take(&mut *self.tasks.lock().unwrap());
        drop(batch);
    }
}

type StartLog = Arc<Mutex<Vec<usize>>>;

/// A job that records its number when it begins and then waits until the
/// returned sender fires (or is dropped).
fn gated_job(n: usize, log: &StartLog, panic_at_end: bool) -> (Box<dyn Job>, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();
    let log = log.clone();
    let job: Box<dyn Job> = Box::new(ClosureJob::from_future(format!("gated-{n}"), async move {
        log.lock().unwrap().push(n);
        let fired = rx.await.is_ok();
        if fired && panic_at_end {
            panic!("gated-{n} panics on purpose");
        }
    }));
    (job, tx)
}

fn limit(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

struct Fixture {
    spawner: ManualSpawner,
    scheduler: Scheduler<ManualSpawner>,
    log: StartLog,
    gates: Vec<Option<oneshot::Sender<()>>>,
    handles: Vec<JobHandle>,
}

impl Fixture {
    fn new(n: usize) -> Self {
        let spawner = ManualSpawner::default();
        Self {
            scheduler: Scheduler::named("test", limit(n), spawner.clone()),
            spawner,
            log: Arc::new(Mutex::new(Vec::new())),
            gates: Vec::new(),
            handles: Vec::new(),
        }
    }

    fn submit(&mut self) -> usize {
        self.submit_with(false)
    }

    fn submit_with(&mut self, panic_at_end: bool) -> usize {
        let n = self.gates.len();
        let (job, gate) = gated_job(n, &self.log, panic_at_end);
        self.handles.push(self.scheduler.submit(job));
        self.gates.push(Some(gate));
        n
    }

    fn finish(&mut self, n: usize) {
        let gate = self.gates[n].take().expect("job finished twice");
        let _ = gate.send(());
        self.spawner.settle();
    }

    fn started(&self) -> Vec<usize> {
        self.log.lock().unwrap().clone()
    }

    fn state(&self, n: usize) -> JobState {
        self.handles[n].state()
    }
}

#[test]
fn test_single_slot_runs_jobs_one_after_another() {
    let mut f = Fixture::new(1);
    let j1 = f.submit();
    let j2 = f.submit();
    let j3 = f.submit();
    f.spawner.settle();

    assert_eq!(f.started(), vec![j1]);
    assert_eq!(f.state(j1), JobState::Running);
    assert_eq!(f.state(j2), JobState::Queued);
    assert_eq!(f.state(j3), JobState::Queued);
    assert_eq!(f.scheduler.queued_count(), 2);

    f.finish(j1);
    assert_eq!(f.started(), vec![j1, j2]);
    assert_eq!(f.state(j1), JobState::Completed);
    assert_eq!(f.state(j2), JobState::Running);
    assert_eq!(f.state(j3), JobState::Queued);

    f.finish(j2);
    assert_eq!(f.started(), vec![j1, j2, j3]);
    assert_eq!(f.scheduler.running_count(), 1);
    assert_eq!(f.scheduler.queued_count(), 0);

    f.finish(j3);
    assert_eq!(f.scheduler.running_count(), 0);
    assert_eq!(f.state(j3), JobState::Completed);
}

#[test]
fn test_free_slots_start_within_the_submit_call() {
    let mut f = Fixture::new(3);
    for _ in 0..5 {
        f.submit();
    }

    // spawned before anything was polled
    assert_eq!(f.spawner.spawned(), 3);
    assert_eq!(f.scheduler.running_count(), 3);
    assert_eq!(f.scheduler.queued_count(), 2);
    assert!(f.started().is_empty());

    f.spawner.settle();
    assert_eq!(f.started(), vec![0, 1, 2]);

    // finishing out of order still hands slots to the queue in order
    f.finish(1);
    assert_eq!(f.started(), vec![0, 1, 2, 3]);
    f.finish(0);
    assert_eq!(f.started(), vec![0, 1, 2, 3, 4]);
    assert_eq!(f.scheduler.running_count(), 3);
    assert_eq!(f.scheduler.queued_count(), 0);
}

#[test]
fn test_initial_jobs_take_the_same_admission_path() {
    let spawner = ManualSpawner::default();
    let log: StartLog = Arc::new(Mutex::new(Vec::new()));
    let mut gates = Vec::new();
    let jobs: Vec<Box<dyn Job>> = (0..3)
        .map(|n| {
            let (job, gate) = gated_job(n, &log, false);
            gates.push(gate);
            job
        })
        .collect();

    let scheduler = Scheduler::with_jobs(limit(2), spawner.clone(), jobs);
    assert_eq!(scheduler.running_count(), 2);
    assert_eq!(scheduler.queued_count(), 1);

    spawner.settle();
    assert_eq!(*log.lock().unwrap(), vec![0, 1]);

    drop(gates);
    spawner.settle();
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(scheduler.running_count(), 0);
}

#[test]
fn test_batch_is_admitted_job_by_job() {
    let mut f = Fixture::new(2);
    f.submit();
    f.spawner.settle();

    let mut batch = Vec::new();
    for n in 1..4 {
        let (job, gate) = gated_job(n, &f.log, false);
        f.gates.push(Some(gate));
        batch.push(job);
    }
    f.scheduler.add_jobs(batch);

    // one free slot, so exactly the first job of the batch starts
    assert_eq!(f.scheduler.running_count(), 2);
    assert_eq!(f.scheduler.queued_count(), 2);
    f.spawner.settle();
    assert_eq!(f.started(), vec![0, 1]);
}

#[test]
fn test_panicking_job_frees_its_slot() {
    let mut f = Fixture::new(1);
    let bad = f.submit_with(true);
    let next = f.submit();
    f.spawner.settle();

    f.finish(bad);
    assert_eq!(f.state(bad), JobState::Completed);
    assert_eq!(f.state(next), JobState::Running);
    assert_eq!(f.started(), vec![bad, next]);
    assert_eq!(f.scheduler.running_count(), 1);
}

#[test]
fn test_dropped_job_frees_its_slot() {
    let mut f = Fixture::new(1);
    let j1 = f.submit();
    let j2 = f.submit();
    f.spawner.settle();
    assert_eq!(f.started(), vec![j1]);

    // the executor throws away a started job
    f.spawner.drop_all();
    assert_eq!(f.state(j1), JobState::Completed);
    assert_eq!(f.state(j2), JobState::Running);

    f.spawner.settle();
    assert_eq!(f.started(), vec![j1, j2]);
}

#[test]
fn test_job_discarded_before_its_first_poll_frees_its_slot() {
    let mut f = Fixture::new(1);
    let j1 = f.submit();
    let j2 = f.submit();
    assert_eq!(f.state(j1), JobState::Running);
    assert_eq!(f.state(j2), JobState::Queued);

    // the executor throws its run queue away without polling anything
    f.spawner.drop_all();
    assert_eq!(f.state(j1), JobState::Completed);
    assert_eq!(f.state(j2), JobState::Running);
    assert_eq!(f.scheduler.running_count(), 1);
    assert_eq!(f.scheduler.queued_count(), 0);

    f.spawner.drop_all();
    assert_eq!(f.state(j2), JobState::Completed);
    assert_eq!(f.scheduler.running_count(), 0);
    assert!(f.started().is_empty());
}

/// Spawner that polls each future once inside `spawn_obj` and drops it.
struct InlineSpawner;

impl Spawn for InlineSpawner {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        let _ = future.now_or_never();
        Ok(())
    }
}

#[test]
fn test_job_ending_inside_spawn_frees_its_slot() {
    let scheduler = Scheduler::new(limit(1), InlineSpawner);
    let log: StartLog = Arc::new(Mutex::new(Vec::new()));

    let finishing = {
        let log = log.clone();
        ClosureJob::from_future("finishing", async move {
            log.lock().unwrap().push(0);
        })
    };
    let h1 = scheduler.submit(Box::new(finishing));
    // pending on its gate when polled inline, then dropped by the spawner
    let (stuck, _gate) = gated_job(1, &log, false);
    let h2 = scheduler.submit(stuck);
    let (stuck, _gate) = gated_job(2, &log, false);
    let h3 = scheduler.submit(stuck);

    assert_eq!(h1.state(), JobState::Completed);
    assert_eq!(h2.state(), JobState::Completed);
    assert_eq!(h3.state(), JobState::Completed);
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(scheduler.running_count(), 0);
    assert_eq!(scheduler.queued_count(), 0);
}

#[test]
fn test_start_order_follows_admission() {
    let mut f = Fixture::new(2);
    for _ in 0..5 {
        f.submit();
    }
    assert_eq!(f.handles[0].start_order(), Some(0));
    assert_eq!(f.handles[1].start_order(), Some(1));
    assert_eq!(f.handles[2].start_order(), None);

    f.spawner.settle();
    f.finish(1);
    f.finish(0);
    f.finish(2);
    let order: Vec<Option<u64>> = f.handles.iter().map(|h| h.start_order()).collect();
    assert_eq!(order, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
}

#[test]
fn test_spawn_failure_releases_the_slot() {
    let mut f = Fixture::new(1);
    let j1 = f.submit();
    let j2 = f.submit();
    let j3 = f.submit();
    f.spawner.settle();

    f.spawner.close();
    f.finish(j1);

    // neither queued job could be spawned, both are given up
    assert_eq!(f.state(j2), JobState::Completed);
    assert_eq!(f.state(j3), JobState::Completed);
    assert_eq!(f.started(), vec![j1]);
    assert_eq!(f.scheduler.running_count(), 0);
    assert_eq!(f.scheduler.queued_count(), 0);

    let late = f.submit();
    assert_eq!(f.state(late), JobState::Completed);
    assert_eq!(f.scheduler.running_count(), 0);
}

#[test]
fn test_handle_waits_for_completion() {
    let mut f = Fixture::new(1);
    let j1 = f.submit();
    f.spawner.settle();

    let handle = f.handles[j1].clone();
    assert!(!handle.wait_for_timeout(JobState::Completed, Duration::from_millis(10)));
    assert!(handle.wait_for_timeout(JobState::Running, Duration::from_millis(10)));

    f.finish(j1);
    handle.wait_for(JobState::Completed);
    assert_eq!(handle.state(), JobState::Completed);
}

#[test]
fn test_ids_follow_admission_order() {
    let mut f = Fixture::new(2);
    for _ in 0..4 {
        f.submit();
    }
    let ids: Vec<u64> = f.handles.iter().map(|h| h.id().value()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
}

#[derive(Debug, Clone)]
enum Op {
    Submit,
    Finish(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Submit),
        2 => any::<usize>().prop_map(Op::Finish),
    ]
}

proptest! {
    #[test]
    fn prop_limit_and_fifo_hold(n in 1usize..5, ops in prop::collection::vec(op(), 1..60)) {
        let mut f = Fixture::new(n);
        let mut completed = 0usize;

        for op in ops {
            match op {
                Op::Submit => {
                    f.submit();
                    f.spawner.settle();
                }
                Op::Finish(pick) => {
                    let running: Vec<usize> = f
                        .started()
                        .into_iter()
                        .filter(|j| f.gates[*j].is_some())
                        .collect();
                    if running.is_empty() {
                        continue;
                    }
                    f.finish(running[pick % running.len()]);
                    completed += 1;
                }
            }

            let submitted = f.gates.len();
            let outstanding = submitted - completed;
            let running = f.scheduler.running_count();
            prop_assert!(running <= n);
            prop_assert_eq!(running, outstanding.min(n));
            prop_assert_eq!(f.scheduler.queued_count(), outstanding - running);

            // everything that started did so in submission order
            let started = f.started();
            prop_assert_eq!(started.len(), completed + running);
            prop_assert_eq!(started, (0..completed + running).collect::<Vec<_>>());
        }
    }
}

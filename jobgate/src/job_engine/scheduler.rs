// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::task::{Spawn, SpawnExt};
use futures::FutureExt;
use log::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::job_engine::handle::{JobHandle, JobState};
use crate::job_engine::job::{Job, JobId, JobTask};

/// A job that has been admitted but not started yet.
struct Pending {
    id: JobId,
    desc: String,
    task: JobTask,
    handle: JobHandle,
}

/// Everything guarded by the scheduler mutex. Admission, completion and the
/// queue drain all happen under this single lock.
struct State {
    next_id: u64,
    started: u64,
    running: HashMap<JobId, JobHandle>,
    queue: VecDeque<Pending>,
}

impl State {
    fn allocate_id(&mut self) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        id
    }
}

struct Inner<S> {
    name: String,
    limit: NonZeroUsize,
    spawner: S,
    state: Mutex<State>,
}

/// Runs at most `limit` jobs at a time on the given spawner and queues the
/// rest in arrival order.
///
/// The scheduler never polls a job itself. Starting a job means handing its
/// future to the spawner. Whatever the spawner then does with it (runs it,
/// drops it unpolled, polls it inline) the slot comes back exactly once.
/// Cloning a `Scheduler` yields another handle to the same queue and budget.
pub struct Scheduler<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Scheduler<S>
where
    S: Spawn + Send + Sync + 'static,
{
    pub fn new(limit: NonZeroUsize, spawner: S) -> Self {
        Self::named("scheduler", limit, spawner)
    }

    /// Like [`Scheduler::new`], the name prefixes every log line.
    pub fn named(name: impl Into<String>, limit: NonZeroUsize, spawner: S) -> Self {
        let name = name.into();
        info!("[{}] created with a limit of {} concurrent jobs", name, limit);
        Self {
            inner: Arc::new(Inner {
                name,
                limit,
                spawner,
                state: Mutex::new(State {
                    next_id: 0,
                    started: 0,
                    running: HashMap::with_capacity(limit.get()),
                    queue: VecDeque::new(),
                }),
            }),
        }
    }

    /// Creates a scheduler and submits `jobs` in order. Up to `limit` of them
    /// start right away, the others queue.
    pub fn with_jobs<I>(limit: NonZeroUsize, spawner: S, jobs: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn Job>>,
    {
        let scheduler = Self::new(limit, spawner);
        scheduler.add_jobs(jobs);
        scheduler
    }

    pub fn from_config(config: &SchedulerConfig, spawner: S) -> Self {
        Self::named(config.name.clone(), config.limit, spawner)
    }

    pub fn add_job(&self, job: Box<dyn Job>) {
        self.submit(job);
    }

    /// Submits every job in iteration order. Each one is admitted on its
    /// own, the batch is not started as a unit.
    pub fn add_jobs<I>(&self, jobs: I)
    where
        I: IntoIterator<Item = Box<dyn Job>>,
    {
        for job in jobs {
            self.add_job(job);
        }
    }

    /// Submits a job and returns a handle to observe its scheduling state.
    ///
    /// If a slot is free the job is spawned before this returns, otherwise it
    /// is appended to the wait queue. Never blocks beyond the bookkeeping.
    pub fn submit(&self, job: Box<dyn Job>) -> JobHandle {
        let desc = job.desc().to_string();
        // creating the future runs caller code, keep it out of the lock
        let task = job.create_task();

        let inner = &self.inner;
        let mut state = inner.lock_state();
        let id = state.allocate_id();
        if state.running.len() < inner.limit.get() {
            let handle = JobHandle::new(id, JobState::Running);
            inner.start(
                &mut state,
                Pending {
                    id,
                    desc,
                    task,
                    handle: handle.clone(),
                },
            );
            handle
        } else {
            let handle = JobHandle::new(id, JobState::Queued);
            debug!(
                "[{}] queued job {} ({}), {} waiting",
                inner.name,
                id,
                desc,
                state.queue.len() + 1
            );
            state.queue.push_back(Pending {
                id,
                desc,
                task,
                handle: handle.clone(),
            });
            handle
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn limit(&self) -> NonZeroUsize {
        self.inner.limit
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock_state().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock_state().queue.len()
    }
}

impl<S> Inner<S>
where
    S: Spawn + Send + Sync + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, State> {
        // no caller code runs under the lock, a poisoned state is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a slot for `pending` and spawns it. Must be called with the
    /// state lock held and a free slot available.
    fn start(self: &Arc<Self>, state: &mut State, pending: Pending) {
        let Pending {
            id,
            desc,
            task,
            handle,
        } = pending;

        state.running.insert(id, handle.clone());
        debug_assert!(state.running.len() <= self.limit.get());
        handle.mark_started(state.started);
        state.started += 1;

        let arming = Arc::new(AtomicU8::new(SPAWNING));
        let completion = Completion {
            inner: Arc::clone(self),
            id,
            arming: Arc::clone(&arming),
        };
        // the guard lives in the future itself, dropping it unpolled still counts
        let wrapped = async move {
            let _completion = completion;
            let _ = AssertUnwindSafe(task).catch_unwind().await;
        };

        let spawned = self.spawner.spawn(wrapped);
        // Arm the guard. If it was already dropped while we were spawning, it
        // could not take the lock we hold, so the slot is released right here.
        let armed = arming
            .compare_exchange(SPAWNING, ARMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        match spawned {
            Ok(()) if armed => debug!(
                "[{}] started job {} ({}), {}/{} running",
                self.name,
                id,
                desc,
                state.running.len(),
                self.limit
            ),
            Ok(()) => {
                debug!("[{}] job {} ({}) ended during spawn", self.name, id, desc);
                state.running.remove(&id);
                handle.set_state(JobState::Completed);
            }
            Err(e) => {
                error!("[{}] failed to start job {} ({}): {}", self.name, id, desc, e);
                // a failed spawn never hands out the future, nothing to disarm
                arming.store(DONE, Ordering::Release);
                state.running.remove(&id);
                handle.set_state(JobState::Completed);
            }
        }
    }

    fn complete(self: &Arc<Self>, id: JobId) {
        let mut state = self.lock_state();
        match state.running.remove(&id) {
            Some(handle) => handle.set_state(JobState::Completed),
            None => {
                error!("[{}] completion for unknown job {}", self.name, id);
                return;
            }
        }
        debug!(
            "[{}] job {} completed, {} running, {} waiting",
            self.name,
            id,
            state.running.len(),
            state.queue.len()
        );
        self.drain(&mut state);
    }

    /// Starts queued jobs in order until the budget is used up or the queue is
    /// empty.
    fn drain(self: &Arc<Self>, state: &mut State) {
        while state.running.len() < self.limit.get() {
            let Some(next) = state.queue.pop_front() else {
                break;
            };
            self.start(state, next);
        }
    }
}

const SPAWNING: u8 = 0;
const ARMED: u8 = 1;
const DONE: u8 = 2;

/// Completion notification of a started job. Fires when the wrapped job
/// future is dropped, for whatever reason. A drop that happens before the
/// spawn call returned only flags the guard, `Inner::start` then releases the
/// slot itself.
struct Completion<S>
where
    S: Spawn + Send + Sync + 'static,
{
    inner: Arc<Inner<S>>,
    id: JobId,
    arming: Arc<AtomicU8>,
}

impl<S> Drop for Completion<S>
where
    S: Spawn + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.arming.swap(DONE, Ordering::AcqRel) == ARMED {
            self.inner.complete(self.id);
        }
    }
}

impl<S> fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("limit", &self.inner.limit)
            .field("running", &state.running.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

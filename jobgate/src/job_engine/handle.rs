// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use crate::job_engine::job::JobId;

/// Scheduling state of a job. The order of the variants is the order of
/// the transitions, a job never moves backwards.
#[derive(Clone, Debug, Copy, PartialOrd, Ord, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
}

/// Observer for the scheduling state of a single job.
#[derive(Clone, Debug)]
pub struct JobHandle {
    id: JobId,
    sync_state: Arc<(Mutex<JobState>, Condvar)>,
    start_order: Arc<OnceLock<u64>>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, initial: JobState) -> Self {
        Self {
            id,
            sync_state: Arc::new((Mutex::new(initial), Condvar::new())),
            start_order: Arc::new(OnceLock::new()),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn state(&self) -> JobState {
        let (lock, _) = &*self.sync_state;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Position of this job among all jobs its scheduler has started, `None`
    /// while it is queued. Queued jobs are started in admission order, so this
    /// grows with [`JobHandle::id`].
    pub fn start_order(&self) -> Option<u64> {
        self.start_order.get().copied()
    }

    pub(crate) fn mark_started(&self, order: u64) {
        let _ = self.start_order.set(order);
        self.set_state(JobState::Running);
    }

    pub(crate) fn set_state(&self, new_state: JobState) {
        let (lock, cvar) = &*self.sync_state;
        let mut current_state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *current_state = new_state;
        cvar.notify_all();
    }

    /// Blocks until the job has reached `state` or a later one.
    pub fn wait_for(&self, state: JobState) {
        let (lock, cvar) = &*self.sync_state;
        let mut current_state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while *current_state < state {
            current_state = cvar
                .wait(current_state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`JobHandle::wait_for`], but gives up after `timeout`. Returns
    /// whether the state was reached.
    pub fn wait_for_timeout(&self, state: JobState, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.sync_state;
        let current_state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (current_state, _) = cvar
            .wait_timeout_while(current_state, timeout, |current| *current < state)
            .unwrap_or_else(PoisonError::into_inner);
        *current_state >= state
    }
}

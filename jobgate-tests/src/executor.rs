// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::{Duration, Instant};

use futures::executor::ThreadPool;
use jobgate::{JobHandle, JobState};

pub fn thread_pool(threads: usize) -> ThreadPool {
    ThreadPool::builder()
        .pool_size(threads)
        .name_prefix("jobgate-test-")
        .create()
        .unwrap_or_else(|e| panic!("failed to create thread pool: {e}"))
}

/// Waits until every handle reports `Completed`. Returns false if that did
/// not happen within `timeout`.
pub fn wait_all_completed(handles: &[JobHandle], timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    handles.iter().all(|handle| {
        let left = deadline.saturating_duration_since(Instant::now());
        handle.wait_for_timeout(JobState::Completed, left)
    })
}

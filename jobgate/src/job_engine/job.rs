// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// The future a job turns into. It is lazy: nothing runs until the
/// scheduler spawns it.
pub type JobTask = Pin<Box<dyn Future<Output = ()> + Send>>;

// A job is consumed exactly once. The scheduler calls `create_task` when the
// job is submitted and keeps only the resulting future around, so queued jobs
// cost a boxed future and nothing else.
pub trait Job: Send + 'static {
    /// Free-form description, used for logging or debugging
    fn desc(&self) -> &str;

    /// Main entry point — creates the future that executes this job
    fn create_task(self: Box<Self>) -> JobTask;
}

impl fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("desc", &self.desc()).finish()
    }
}

/// Admission number of a job. Ids grow in the order the scheduler admitted
/// the jobs, which is also the order in which queued jobs are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub(crate) u64);

impl JobId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::future::Future;

use crate::job_engine::job::{Job, JobTask};

pub struct ClosureJob {
    desc: String,
    task_creator: Box<dyn FnOnce() -> JobTask + Send + 'static>,
}

impl ClosureJob {
    pub fn new(
        desc: impl Into<String>,
        f: Box<
            dyn FnOnce() -> JobTask // closure returns any future
                + Send // the closure itself can be sent across threads
                + 'static,
        >,
    ) -> Self {
        Self {
            desc: desc.into(),
            task_creator: f,
        }
    }

    /// Shorthand for a job whose body is a plain `async` block.
    pub fn from_future<F>(desc: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::new(desc, Box::new(move || Box::pin(fut)))
    }
}

impl Job for ClosureJob {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn create_task(self: Box<Self>) -> JobTask {
        (self.task_creator)()
    }
}

// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::future::Future;
use std::pin::Pin;

use anyhow::anyhow;
use async_channel::{Receiver, Sender, TryRecvError};
use log::debug;

use crate::job_engine::job::{Job, JobTask};

type ResultTask<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

/// A job that reports its outcome through its own channel. The scheduler only
/// sees a future returning `()`; success or failure stays between the job and
/// whoever holds the [`JobResult`].
pub struct ResultJob<T> {
    desc: String,
    task: ResultTask<T>,
    tx: Sender<anyhow::Result<T>>,
}

impl<T> ResultJob<T>
where
    T: Send + 'static,
{
    pub fn new<F>(desc: impl Into<String>, fut: F) -> (Self, JobResult<T>)
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (tx, rx) = async_channel::bounded(1);
        let job = Self {
            desc: desc.into(),
            task: Box::pin(fut),
            tx,
        };
        (job, JobResult { rx })
    }
}

impl<T> Job for ResultJob<T>
where
    T: Send + 'static,
{
    fn desc(&self) -> &str {
        &self.desc
    }

    fn create_task(self: Box<Self>) -> JobTask {
        let ResultJob { desc, task, tx } = *self;
        Box::pin(async move {
            let outcome = task.await;
            if tx.send(outcome).await.is_err() {
                debug!("nobody is waiting for the result of {}", desc);
            }
        })
    }
}

/// Receiving end of a [`ResultJob`]. If the job panics or is dropped before it
/// produces a value, the channel closes and the receiver gets an error.
#[derive(Debug)]
pub struct JobResult<T> {
    rx: Receiver<anyhow::Result<T>>,
}

impl<T> JobResult<T> {
    pub async fn recv(&self) -> anyhow::Result<T> {
        match self.rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("job ended without producing a result")),
        }
    }

    pub fn recv_blocking(&self) -> anyhow::Result<T> {
        match self.rx.recv_blocking() {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("job ended without producing a result")),
        }
    }

    /// Returns `None` while the job is still queued or running.
    pub fn try_recv(&self) -> Option<anyhow::Result<T>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(anyhow!("job ended without producing a result"))),
        }
    }
}

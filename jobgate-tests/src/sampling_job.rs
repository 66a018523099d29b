// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_io::Timer;
use futures::task::Spawn;
use jobgate::jobs::workload::ConcurrencyMeter;
use jobgate::{Job, JobTask, Scheduler};

/// What the sampling jobs saw while running.
#[derive(Debug, Default)]
pub struct Observations {
    /// Job indices in the order their bodies began
    pub start_order: Mutex<Vec<usize>>,
    /// Largest running count the scheduler reported from inside a job
    pub max_running_seen: AtomicUsize,
    pub meter: Arc<ConcurrencyMeter>,
}

impl Observations {
    pub fn start_order(&self) -> Vec<usize> {
        self.start_order.lock().unwrap().clone()
    }

    pub fn max_running_seen(&self) -> usize {
        self.max_running_seen.load(Ordering::SeqCst)
    }
}

/// Sleeps for a while and records what the scheduler looked like when it
/// began. Optionally panics at the end.
pub struct SamplingJob<S> {
    desc: String,
    index: usize,
    duration: Duration,
    panics: bool,
    scheduler: Scheduler<S>,
    observations: Arc<Observations>,
}

impl<S> SamplingJob<S>
where
    S: Spawn + Send + Sync + 'static,
{
    pub fn new(
        index: usize,
        duration: Duration,
        panics: bool,
        scheduler: &Scheduler<S>,
        observations: &Arc<Observations>,
    ) -> Self {
        Self {
            desc: format!("sample-{index}"),
            index,
            duration,
            panics,
            scheduler: scheduler.clone(),
            observations: observations.clone(),
        }
    }
}

impl<S> Job for SamplingJob<S>
where
    S: Spawn + Send + Sync + 'static,
{
    fn desc(&self) -> &str {
        &self.desc
    }

    fn create_task(self: Box<Self>) -> JobTask {
        let SamplingJob {
            desc,
            index,
            duration,
            panics,
            scheduler,
            observations,
        } = *self;
        Box::pin(async move {
            observations.start_order.lock().unwrap().push(index);
            let _active = observations.meter.enter();
            observations
                .max_running_seen
                .fetch_max(scheduler.running_count(), Ordering::SeqCst);
            Timer::after(duration).await;
            if panics {
                panic!("{desc} panics on purpose");
            }
        })
    }
}

// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_io::Timer;
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::jobs::result_job::{JobResult, ResultJob};

/// How a planned job ends.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    #[default]
    Succeed,
    /// Returns an error through the job's result channel
    Fail,
    /// Panics inside the job body
    Panic,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub desc: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub outcome: Outcome,
}

/// A synthetic workload, as read from `--plan`/`--plan-file` or generated from the
/// command line flags.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
    pub jobs: Vec<PlannedJob>,
}

impl Plan {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid plan JSON")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Generates `count` jobs with durations spread over `min_ms..=max_ms`.
    /// Every `fail_every`-th job fails, 0 disables failures.
    pub fn synthetic(count: usize, min_ms: u64, max_ms: u64, fail_every: usize) -> anyhow::Result<Self> {
        if min_ms > max_ms {
            bail!("minimum duration {min_ms}ms exceeds maximum {max_ms}ms");
        }
        // None when the range covers every u64, any offset fits then
        let span = (max_ms - min_ms).checked_add(1);
        let jobs = (0..count)
            .map(|i| {
                // cheap spread, consecutive jobs get unrelated durations
                let spread = (i as u64).wrapping_mul(7919);
                let duration_ms = min_ms + span.map_or(spread, |span| spread % span);
                let outcome = if fail_every > 0 && (i + 1) % fail_every == 0 {
                    Outcome::Fail
                } else {
                    Outcome::Succeed
                };
                PlannedJob {
                    desc: format!("job-{i}"),
                    duration_ms,
                    outcome,
                }
            })
            .collect();
        Ok(Self {
            scheduler: None,
            jobs,
        })
    }
}

impl PlannedJob {
    /// Turns the plan entry into a job that sleeps for its duration while
    /// being counted by `meter`.
    pub fn into_job(self, meter: Arc<ConcurrencyMeter>) -> (ResultJob<Duration>, JobResult<Duration>) {
        let PlannedJob {
            desc,
            duration_ms,
            outcome,
        } = self;
        let duration = Duration::from_millis(duration_ms);
        let label = desc.clone();
        ResultJob::new(desc, async move {
            let _active = meter.enter();
            Timer::after(duration).await;
            match outcome {
                Outcome::Succeed => Ok(duration),
                Outcome::Fail => bail!("{label} failed as planned"),
                Outcome::Panic => panic!("{label} panicked as planned"),
            }
        })
    }
}

/// Counts how many job bodies are active at once and remembers the maximum.
#[derive(Debug, Default)]
pub struct ConcurrencyMeter {
    active: AtomicUsize,
    peak: AtomicUsize,
    entered: AtomicUsize,
}

impl ConcurrencyMeter {
    pub fn enter(self: &Arc<Self>) -> MeterGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entered.fetch_add(1, Ordering::SeqCst);
        MeterGuard {
            meter: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total number of bodies that have started so far.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

pub struct MeterGuard {
    meter: Arc<ConcurrencyMeter>,
}

impl Drop for MeterGuard {
    fn drop(&mut self) {
        self.meter.active.fetch_sub(1, Ordering::SeqCst);
    }
}

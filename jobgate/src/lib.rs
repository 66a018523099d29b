// SPDX-License-Identifier: MIT
// jobgate: bounded-concurrency job dispatcher
//
// - Starts at most N async jobs at a time on an ambient executor.
// - Queues the excess in arrival order and refills slots as jobs complete.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod config;
pub mod job_engine;
pub mod jobs;

pub use config::SchedulerConfig;
pub use job_engine::closure_job::ClosureJob;
pub use job_engine::handle::{JobHandle, JobState};
pub use job_engine::job::{Job, JobId, JobTask};
pub use job_engine::scheduler::Scheduler;
pub use jobs::result_job::{JobResult, ResultJob};

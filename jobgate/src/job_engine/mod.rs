// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Bounded Job Scheduler
//!
//! ## Overview
//! Runs an open-ended stream of async jobs with at most `limit` of them in
//! flight at any time.
//!
//! - Submitting a job takes a slot if one is free and spawns the job right away.
//! - Otherwise the job waits in a FIFO queue (unbounded, no backpressure).
//! - A finished job gives its slot back and the queue head takes it.
//! - Admission, completion and the queue drain share one mutex.
//! - Jobs run on an ambient executor (`futures::task::Spawn`), never on the
//!   scheduler itself.
//!
//! ## Completion
//! Every spawned job is wrapped in a future that owns a completion guard. The
//! guard fires exactly once: when the job returns, when it panics (the panic is
//! caught at the wrapper) or when the executor drops it, polled or not. If
//! that happens before the spawn call returned, the scheduler releases the
//! slot itself since it still holds the lock.
//!
//! ```text
//!         submit()                           completion guard
//!            |                                      |
//!            v                                      v
//!   +--------+----------------------------------------+--------+
//!   |                  Mutex<State>                            |
//!   |   running: { #3, #4, #5 }   queue: [ #6, #7, #8 ]        |
//!   +--------+-------------------------------------------------+
//!            |  slot free -> spawn        queue head -> spawn
//!            v
//!   +--------+---------+
//!   |  Spawn (executor) |
//!   +-------------------+
//! ```

pub mod closure_job;
pub mod handle;
pub mod job;
pub mod scheduler;

#[cfg(test)]
mod tests;

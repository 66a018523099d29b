// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::num::NonZeroUsize;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

fn default_name() -> String {
    "scheduler".to_string()
}

/// Number of available CPUs, or 1 if that cannot be determined.
pub fn default_limit() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

/// Settings of a single scheduler. The limit is fixed for the lifetime of the
/// scheduler built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Label used in log lines
    #[serde(default = "default_name")]
    pub name: String,

    /// Maximum number of jobs running at the same time. Zero is rejected.
    #[serde(default = "default_limit")]
    pub limit: NonZeroUsize,
}

impl SchedulerConfig {
    pub fn new(name: impl Into<String>, limit: usize) -> anyhow::Result<Self> {
        let limit = NonZeroUsize::new(limit)
            .ok_or_else(|| anyhow!("the concurrency limit must be at least 1"))?;
        Ok(Self {
            name: name.into(),
            limit,
        })
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid scheduler configuration")
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            limit: default_limit(),
        }
    }
}

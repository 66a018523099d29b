// SPDX-License-Identifier: MIT
// jobgate: runs a synthetic workload through a bounded scheduler
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::executor::ThreadPool;
use log::{info, warn};

use jobgate::jobs::workload::{ConcurrencyMeter, Plan};
use jobgate::{Scheduler, SchedulerConfig};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Maximum number of jobs running at the same time (default: number of CPUs)
    #[arg(long)]
    limit: Option<usize>,

    /// Name of the scheduler, used in log lines (default: jobgate)
    #[arg(long)]
    name: Option<String>,

    /// Number of synthetic jobs
    #[arg(long)]
    jobs: Option<usize>,

    /// Shortest synthetic job duration in milliseconds
    #[arg(long)]
    min_ms: Option<u64>,

    /// Longest synthetic job duration in milliseconds
    #[arg(long)]
    max_ms: Option<u64>,

    /// Let every n-th synthetic job fail
    #[arg(long)]
    fail_every: Option<usize>,

    /// Workload to run (JSON encoded). Note that this excludes the synthetic job options.
    #[arg(long, value_name = "JSON")]
    plan: Option<String>,

    /// File with the workload to run (JSON). Note that this excludes the synthetic job options.
    #[arg(long = "plan-file", value_name = "PATH")]
    plan_file: Option<PathBuf>,

    /// Number of executor threads (default: number of CPUs)
    #[arg(long)]
    threads: Option<usize>,
}

fn validate_args(args: &Args) -> Result<(), String> {
    let has_plan = match (&args.plan, &args.plan_file) {
        (Some(_), Some(_)) => {
            return Err("--plan and --plan-file may not be used together".into());
        }
        (None, None) => false,
        _ => true,
    };

    let has_synthetic = args.jobs.is_some()
        || args.min_ms.is_some()
        || args.max_ms.is_some()
        || args.fail_every.is_some();
    if has_plan && has_synthetic {
        return Err(
            "--plan or --plan-file must not be used in combination with --jobs, --min-ms, --max-ms or --fail-every"
                .into(),
        );
    }

    if args.limit == Some(0) {
        return Err("--limit must be at least 1".into());
    }
    if args.threads == Some(0) {
        return Err("--threads must be at least 1".into());
    }

    if let (Some(min), Some(max)) = (args.min_ms, args.max_ms) {
        if min > max {
            return Err(format!("--min-ms ({min}) must not exceed --max-ms ({max})"));
        }
    }

    Ok(())
}

fn load_plan(args: &Args) -> anyhow::Result<Plan> {
    match (&args.plan, &args.plan_file) {
        (Some(json), None) => Plan::from_json(json),
        (None, Some(path)) => Plan::from_file(path),
        (None, None) => Plan::synthetic(
            args.jobs.unwrap_or(20),
            args.min_ms.unwrap_or(10),
            args.max_ms.unwrap_or(200),
            args.fail_every.unwrap_or(0),
        ),
        _ => unreachable!("validate_args enforces mutual exclusion"),
    }
}

fn scheduler_config(args: &Args, plan: &Plan) -> anyhow::Result<SchedulerConfig> {
    // command line wins over the plan, the plan wins over the defaults
    let mut config = plan.scheduler.clone().unwrap_or_else(|| SchedulerConfig {
        name: "jobgate".to_string(),
        ..SchedulerConfig::default()
    });
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(limit) = args.limit {
        config = SchedulerConfig::new(config.name, limit)?;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let plan = load_plan(&args)?;
    let config = scheduler_config(&args, &plan)?;

    let mut pool_builder = ThreadPool::builder();
    pool_builder.name_prefix("jobgate-worker-");
    if let Some(threads) = args.threads {
        pool_builder.pool_size(threads);
    }
    let pool = pool_builder
        .create()
        .context("failed to create the executor thread pool")?;

    let scheduler = Scheduler::from_config(&config, pool);
    let meter = Arc::new(ConcurrencyMeter::default());

    info!("Submitting {} jobs", plan.jobs.len());
    let mut results = Vec::with_capacity(plan.jobs.len());
    for planned in plan.jobs {
        let desc = planned.desc.clone();
        let (job, result) = planned.into_job(meter.clone());
        scheduler.add_job(Box::new(job));
        results.push((desc, result));
    }

    let mut succeeded = 0;
    let mut failed = 0;
    for (desc, result) in &results {
        match result.recv_blocking() {
            Ok(duration) => {
                succeeded += 1;
                info!("{desc} finished after {duration:?}");
            }
            Err(e) => {
                failed += 1;
                warn!("{desc} failed: {e:#}");
            }
        }
    }

    println!(
        "{} jobs finished: {} ok, {} failed, peak concurrency {} (limit {})",
        results.len(),
        succeeded,
        failed,
        meter.peak(),
        config.limit
    );
    Ok(())
}

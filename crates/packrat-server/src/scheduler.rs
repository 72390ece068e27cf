//! Background job scheduler
//!
//! Evaluates cron triggers for enabled jobs on a fixed tick. Each tick
//! fires every trigger whose next occurrence falls inside the window since
//! the previous tick, so a tick delayed by load still catches up without
//! double-firing. Runs execute on a small worker pool, and a job with an
//! active run is skipped until that run finishes rather than queued up.
//! A daily retention sweep fires at 02:00 UTC from the same loop.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{error, info, warn};

use packrat_core::{Database, RetentionEnforcer, RunExecutor};

/// Number of backup runs that may execute concurrently
pub const WORKER_POOL_SIZE: usize = 3;

/// Seconds between trigger evaluations
const TICK_SECONDS: u64 = 30;

/// Daily retention sweep at 02:00 UTC
const RETENTION_SCHEDULE: &str = "0 0 2 * * *";

/// Parse a cron expression, accepting the common 5-field form
///
/// The `cron` crate wants a seconds field. Job schedules are written in
/// the traditional 5-field form (minute through day-of-week), so a "0"
/// seconds field is prepended before parsing.
pub fn parse_cron(expr: &str) -> Result<Schedule, String> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|e| format!("Invalid cron expression '{}': {}", expr, e))
}

/// Whether a schedule has an occurrence in the half-open window (after, until]
fn fired_between(schedule: &Schedule, after: DateTime<Utc>, until: DateTime<Utc>) -> bool {
    schedule
        .after(&after)
        .next()
        .map(|t| t <= until)
        .unwrap_or(false)
}

struct SchedulerInner {
    db: Database,
    executor: RunExecutor,
    enforcer: RetentionEnforcer,
    /// Cron triggers for enabled jobs, keyed by job id
    triggers: Mutex<HashMap<i64, Schedule>>,
    /// Jobs with a run currently executing or queued for a worker
    active: Mutex<HashSet<i64>>,
    pool: Semaphore,
    started: AtomicBool,
}

/// Handle to the background scheduler
///
/// Cheap to clone; all clones share the same trigger table and worker pool.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(db: Database) -> Self {
        let executor = RunExecutor::new(db.clone());
        Self::with_executor(db, executor)
    }

    /// Build a scheduler around a preconfigured executor
    pub fn with_executor(db: Database, executor: RunExecutor) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                enforcer: RetentionEnforcer::new(db.clone()),
                db,
                executor,
                triggers: Mutex::new(HashMap::new()),
                active: Mutex::new(HashSet::new()),
                pool: Semaphore::new(WORKER_POOL_SIZE),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Start the tick loop as a background task
    pub fn start(&self) {
        info!(
            "Starting scheduler: {} workers, {} second tick",
            WORKER_POOL_SIZE, TICK_SECONDS
        );
        self.inner.started.store(true, Ordering::SeqCst);

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_loop().await;
        });
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Rebuild the trigger table from the database
    ///
    /// Called after every job mutation so schedule changes take effect
    /// without a restart. Jobs with invalid cron expressions are skipped.
    pub fn sync(&self) {
        match self.rebuild_triggers() {
            Ok(count) => {
                info!("Scheduler tracking {} enabled job(s)", count);
            }
            Err(e) => {
                error!("Failed to sync scheduler triggers: {}", e);
            }
        }
    }

    fn rebuild_triggers(&self) -> packrat_core::Result<usize> {
        let jobs = self.inner.db.list_enabled_jobs()?;
        let mut next = HashMap::new();
        for job in jobs {
            match parse_cron(&job.schedule_cron) {
                Ok(schedule) => {
                    next.insert(job.id, schedule);
                }
                Err(e) => {
                    warn!("Skipping schedule for job '{}': {}", job.name, e);
                }
            }
        }
        let count = next.len();
        *self.inner.triggers.lock().unwrap() = next;
        Ok(count)
    }

    /// Start a run for a job immediately
    ///
    /// Returns the new run id, or None if the job already has an active
    /// run. The run executes on the worker pool; this returns as soon as
    /// the run row exists.
    pub fn run_now(&self, job_id: i64) -> packrat_core::Result<Option<i64>> {
        let run_id = match self.try_begin(job_id)? {
            Some(run_id) => run_id,
            None => return Ok(None),
        };
        self.spawn_run(job_id, run_id);
        Ok(Some(run_id))
    }

    /// Claim the job and create its run row, or bail if one is active
    ///
    /// The active set is checked and updated under one lock so two callers
    /// cannot both claim the same job. The database check catches runs
    /// started outside this process.
    fn try_begin(&self, job_id: i64) -> packrat_core::Result<Option<i64>> {
        let mut active = self.inner.active.lock().unwrap();
        if active.contains(&job_id) {
            return Ok(None);
        }
        if self.inner.db.has_active_run(job_id)? {
            return Ok(None);
        }
        let run = self.inner.db.create_run(job_id)?;
        active.insert(job_id);
        Ok(Some(run.id))
    }

    fn spawn_run(&self, job_id: i64, run_id: i64) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            // Semaphore is never closed, so acquire only fails on shutdown
            let _permit = match scheduler.inner.pool.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    scheduler.inner.active.lock().unwrap().remove(&job_id);
                    return;
                }
            };

            // The executor records the outcome in the run row itself;
            // an Err here means that bookkeeping failed.
            if let Err(e) = scheduler.inner.executor.execute(run_id).await {
                error!("Run {} for job {} failed: {}", run_id, job_id, e);
            }

            scheduler.inner.active.lock().unwrap().remove(&job_id);
        });
    }

    async fn run_loop(&self) {
        let retention =
            Schedule::from_str(RETENTION_SCHEDULE).expect("valid cron expression");

        let mut ticker = interval(Duration::from_secs(TICK_SECONDS));

        // Skip the first immediate tick - we don't want to fire on startup
        ticker.tick().await;
        let mut last_tick = Utc::now();

        loop {
            ticker.tick().await;
            let now = Utc::now();

            self.fire_due_jobs(last_tick, now);

            if fired_between(&retention, last_tick, now) {
                info!("Running daily retention sweep...");
                let scheduler = self.clone();
                tokio::spawn(async move {
                    match scheduler.inner.enforcer.sweep(now).await {
                        Ok(report) => {
                            info!(
                                "Retention sweep done: {} S3 object(s), {} local archive(s) deleted",
                                report.s3.deleted, report.local.deleted
                            );
                        }
                        Err(e) => {
                            error!("Retention sweep failed: {}", e);
                        }
                    }
                });
            }

            last_tick = now;
        }
    }

    /// Fire every trigger with an occurrence in (last_tick, now]
    fn fire_due_jobs(&self, last_tick: DateTime<Utc>, now: DateTime<Utc>) {
        let due: Vec<i64> = {
            let triggers = self.inner.triggers.lock().unwrap();
            triggers
                .iter()
                .filter(|(_, schedule)| fired_between(schedule, last_tick, now))
                .map(|(job_id, _)| *job_id)
                .collect()
        };

        for job_id in due {
            match self.run_now(job_id) {
                Ok(Some(run_id)) => {
                    info!("Schedule fired for job {}, started run {}", job_id, run_id);
                }
                Ok(None) => {
                    info!(
                        "Schedule fired for job {} but a run is already active, skipping",
                        job_id
                    );
                }
                Err(e) => {
                    error!("Failed to start scheduled run for job {}: {}", job_id, e);
                }
            }
        }
    }
}

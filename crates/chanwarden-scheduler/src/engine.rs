//! Scheduler Core: fixed-interval recurring jobs on tokio timers.
//!
//! Each registered job gets its own ticker task. A tick never awaits the job
//! body: the body is spawned as a detached task, so a slow job cannot delay
//! the next tick of itself or of any other job. Overlapping executions of the
//! same job are possible and are tolerated by the job bodies (their queries
//! only select work that is still due).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chanwarden_core::error::{ChanwardenError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Boxed unit of work produced by a job on every tick.
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Factory invoked on every tick.
pub type JobAction = Arc<dyn Fn() -> JobFuture + Send + Sync>;

const NOT_SCHEDULED: i64 = i64::MIN;

struct Job {
    id: String,
    interval: Duration,
    action: JobAction,
    /// Unix millis of the next tick, `NOT_SCHEDULED` while stopped.
    next_fire: Arc<AtomicI64>,
    ticker: Option<JoinHandle<()>>,
}

impl Job {
    fn spawn_ticker(&mut self) {
        let id = self.id.clone();
        let interval = self.interval;
        let action = self.action.clone();
        let next_fire = self.next_fire.clone();

        next_fire.store(fire_after(interval), Ordering::Relaxed);
        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                next_fire.store(fire_after(interval), Ordering::Relaxed);
                tracing::debug!(job = %id, "⏰ Job tick");
                tokio::spawn(action());
            }
        }));
    }

    fn cancel(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.next_fire.store(NOT_SCHEDULED, Ordering::Relaxed);
    }
}

fn fire_after(interval: Duration) -> i64 {
    let delta = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
    (Utc::now() + delta).timestamp_millis()
}

/// Observable state of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub interval_secs: u64,
    pub next_fire: Option<DateTime<Utc>>,
}

/// Observable state of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<JobStatus>,
}

/// The recurring-job driver. Owns timing only, no domain logic.
#[derive(Default)]
pub struct JobScheduler {
    jobs: Vec<Job>,
    running: bool,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job fired every `interval`. Re-registering an id replaces it.
    pub fn register_job<F, Fut>(&mut self, id: &str, interval: Duration, action: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(ChanwardenError::Config(format!(
                "job '{id}' needs a non-zero interval"
            )));
        }

        let action: JobAction = Arc::new(move || Box::pin(action()) as JobFuture);
        let mut job = Job {
            id: id.to_string(),
            interval,
            action,
            next_fire: Arc::new(AtomicI64::new(NOT_SCHEDULED)),
            ticker: None,
        };
        if self.running {
            job.spawn_ticker();
        }

        match self.jobs.iter_mut().find(|j| j.id == id) {
            Some(existing) => {
                existing.cancel();
                *existing = job;
                tracing::info!(job = %id, "📅 Job replaced (every {}s)", interval.as_secs());
            }
            None => {
                self.jobs.push(job);
                tracing::info!(job = %id, "📅 Job registered (every {}s)", interval.as_secs());
            }
        }
        Ok(())
    }

    /// Begin triggering. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(ChanwardenError::AlreadyRunning);
        }
        for job in self.jobs.iter_mut() {
            job.spawn_ticker();
        }
        self.running = true;
        tracing::info!("⏰ Scheduler started ({} jobs)", self.jobs.len());
        Ok(())
    }

    /// Cancel all pending triggers. In-flight job bodies keep running.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        for job in self.jobs.iter_mut() {
            job.cancel();
        }
        self.running = false;
        tracing::info!("⏹️ Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running,
            jobs: self
                .jobs
                .iter()
                .map(|job| {
                    let millis = job.next_fire.load(Ordering::Relaxed);
                    JobStatus {
                        id: job.id.clone(),
                        interval_secs: job.interval.as_secs(),
                        next_fire: (millis != NOT_SCHEDULED)
                            .then(|| DateTime::from_timestamp_millis(millis))
                            .flatten(),
                    }
                })
                .collect(),
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        for job in self.jobs.iter_mut() {
            job.cancel();
        }
    }
}

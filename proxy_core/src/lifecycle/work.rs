//! Background work: a submit-only executor and a keyed periodic scheduler.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, info};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::utils::sync::lock;

/// One-shot unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Repeating unit of background work.
pub type Job = Arc<dyn Fn() + Send + Sync + 'static>;

/// Hands work off the caller's path. `submit` never blocks.
pub trait TaskExecutor: Send + Sync {
    fn submit(&self, task: Task);
}

/// Runs tasks on the runtime's shared blocking pool instead of a thread
/// pool of our own; jobs are rare and short.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl TaskExecutor for TokioExecutor {
    fn submit(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}

/// Shortest period a job may repeat at; shorter requests are raised to it.
pub const MIN_PERIOD: Duration = Duration::from_secs(15 * 60);

struct PeriodicJob {
    period: Duration,
    ticker: JoinHandle<()>,
}

/// Periodic jobs keyed by a stable name.
///
/// Registering a key that already has a live job keeps the existing job
/// untouched, so calling the registration path on every start never
/// stacks up duplicates.
#[derive(Clone)]
pub struct JobScheduler {
    handle: Handle,
    executor: Arc<dyn TaskExecutor>,
    jobs: Arc<Mutex<HashMap<String, PeriodicJob>>>,
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("jobs", &self.scheduled_keys())
            .finish()
    }
}

impl JobScheduler {
    pub fn new(handle: Handle, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            handle,
            executor,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule `job` every `period` under `key`. The first run happens
    /// right away. Returns `false` if `key` was already scheduled.
    pub fn register_periodic(&self, key: &str, period: Duration, job: Job) -> bool {
        let mut jobs = lock(&self.jobs);
        if let Some(existing) = jobs.get(key) {
            if !existing.ticker.is_finished() {
                debug!("Periodic job '{key}' already scheduled; keeping it");
                return false;
            }
        }

        let period = period.max(MIN_PERIOD);
        let executor = Arc::clone(&self.executor);
        let name = key.to_owned();
        let ticker = self.handle.spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                debug!("Submitting periodic job '{name}'");
                let job = Arc::clone(&job);
                executor.submit(Box::new(move || job()));
            }
        });
        jobs.insert(key.to_owned(), PeriodicJob { period, ticker });
        info!("Scheduled periodic job '{key}' every {}s", period.as_secs());
        true
    }

    /// Remove the job under `key` (`true` if one existed).
    pub fn cancel(&self, key: &str) -> bool {
        match lock(&self.jobs).remove(key) {
            Some(job) => {
                job.ticker.abort();
                info!("Cancelled periodic job '{key}'");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        lock(&self.jobs)
            .get(key)
            .is_some_and(|job| !job.ticker.is_finished())
    }

    pub fn period_of(&self, key: &str) -> Option<Duration> {
        lock(&self.jobs).get(key).map(|job| job.period)
    }

    pub fn scheduled_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.jobs)
            .iter()
            .filter(|(_, job)| !job.ticker.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

//! Owns the periodic background jobs of a process.
//!
//! Each registered job gets its own task and shutdown channel. Ticks of one
//! job never overlap: the next tick is scheduled only after the previous one
//! returned.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn interval(&self) -> Duration;
    async fn tick(&self);
}

struct JobHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Arc<dyn PeriodicJob>>,
    running: Vec<JobHandle>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: impl PeriodicJob) -> &mut Self {
        self.jobs.push(Arc::new(job));
        self
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// Spawn every registered job. The first tick fires immediately.
    /// Calling `start` on a running scheduler does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        for job in &self.jobs {
            let (shutdown, mut signal) = watch::channel(false);
            let job = job.clone();
            let name = job.name().to_string();
            let interval = job.interval();

            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => job.tick().await,
                        changed = signal.changed() => {
                            if changed.is_err() || *signal.borrow() {
                                break;
                            }
                        }
                    }
                }
            });

            info!(job = %name, interval_secs = interval.as_secs_f64(), "job started");
            self.running.push(JobHandle {
                name,
                shutdown,
                task,
            });
        }
    }

    /// Signal every job and wait for it to finish its current tick.
    pub async fn stop(&mut self) {
        for handle in self.running.drain(..) {
            let _ = handle.shutdown.send(true);
            if let Err(err) = handle.task.await {
                warn!(job = %handle.name, error = %err, "job ended abnormally");
            } else {
                info!(job = %handle.name, "job stopped");
            }
        }
    }
}

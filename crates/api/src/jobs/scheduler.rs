//! Job scheduler infrastructure for background tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Trait for implementing background jobs.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// The name of this job (used for logging and metrics).
    fn name(&self) -> &'static str;

    /// Interval between runs.
    fn every(&self) -> Duration;

    /// Optional time of day (UTC) for the first run. When absent the first
    /// run happens one interval after startup.
    fn start_time(&self) -> Option<NaiveTime> {
        None
    }

    /// Execute the job. Returns Ok(()) on success, Err with message on failure.
    async fn execute(&self) -> Result<(), String>;
}

/// Background job scheduler.
pub struct JobScheduler {
    jobs: Vec<Arc<dyn Job>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            shutdown_tx,
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    pub fn register<J: Job + 'static>(&mut self, job: J) {
        self.jobs.push(Arc::new(job));
    }

    /// Start all registered jobs.
    pub fn start(&mut self) {
        info!("Starting job scheduler with {} jobs", self.jobs.len());

        for job in &self.jobs {
            let job = Arc::clone(job);
            let mut shutdown_rx = self.shutdown_rx.clone();

            let handle = tokio::spawn(async move {
                let name = job.name();
                let every = job.every();

                let initial_delay = initial_delay(job.start_time(), every);
                info!(
                    job = name,
                    starts_in_secs = initial_delay.as_secs(),
                    repeat_secs = every.as_secs(),
                    "Job scheduled"
                );

                tokio::select! {
                    _ = tokio::time::sleep(initial_delay) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!(job = name, "Job shutting down before first run");
                            return;
                        }
                    }
                }

                let mut interval = tokio::time::interval(every);
                // The first tick completes immediately; consume it so the
                // loop below waits a full period between runs.
                interval.tick().await;
                loop {
                    run_once(job.as_ref()).await;
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                info!(job = name, "Job shutting down");
                                break;
                            }
                        }
                    }
                }
            });

            self.handles.push(handle);
        }
    }

    /// Initiate graceful shutdown of all jobs.
    /// Returns immediately after signaling shutdown.
    pub fn shutdown(&self) {
        info!("Initiating job scheduler shutdown");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for all jobs to complete with timeout.
    pub async fn wait_for_shutdown(self, timeout: Duration) {
        info!("Waiting for jobs to complete (timeout: {:?})", timeout);

        let shutdown_future = async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!("Job task panicked: {}", e);
                }
            }
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(()) => info!("All jobs completed gracefully"),
            Err(_) => warn!("Job shutdown timed out after {:?}", timeout),
        }
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_once(job: &dyn Job) {
    let name = job.name();
    let start = std::time::Instant::now();
    info!(job = name, "Job starting");
    counter!("scheduled_job_runs_total", "job" => name).increment(1);

    match job.execute().await {
        Ok(()) => info!(
            job = name,
            elapsed_ms = start.elapsed().as_millis(),
            "Job completed successfully"
        ),
        Err(e) => {
            counter!("scheduled_job_failures_total", "job" => name).increment(1);
            error!(
                job = name,
                elapsed_ms = start.elapsed().as_millis(),
                error = %e,
                "Job failed"
            );
        }
    }
}

/// Delay until the first run: the next occurrence of `start_time` (UTC),
/// advancing by a day when the time already passed today, or one full
/// interval when no start time is configured.
fn initial_delay(start_time: Option<NaiveTime>, every: Duration) -> Duration {
    let Some(start_time) = start_time else {
        return every;
    };

    let now = Utc::now();
    let mut start = now.date_naive().and_time(start_time).and_utc();
    if start <= now {
        start += chrono::Duration::days(1);
    }
    (start - now).to_std().unwrap_or(every)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestJob {
        run_count: Arc<AtomicUsize>,
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl Job for TestJob {
        fn name(&self) -> &'static str {
            "test_job"
        }

        fn every(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn execute(&self) -> Result<(), String> {
            self.run_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                Err("Test failure".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_initial_delay_without_start_time_is_one_interval() {
        let every = Duration::from_secs(60);
        assert_eq!(initial_delay(None, every), every);
    }

    #[test]
    fn test_initial_delay_with_start_time_is_within_a_day() {
        let every = Duration::from_secs(60);
        let start = NaiveTime::from_hms_opt(3, 30, 0).unwrap();
        let delay = initial_delay(Some(start), every);
        assert!(delay <= Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_scheduler_register() {
        let mut scheduler = JobScheduler::new();
        scheduler.register(TestJob {
            run_count: Arc::new(AtomicUsize::new(0)),
            should_fail: false,
        });
        assert_eq!(scheduler.jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_shutdown_before_first_run() {
        let mut scheduler = JobScheduler::new();
        let run_count = Arc::new(AtomicUsize::new(0));
        scheduler.register(TestJob {
            run_count: Arc::clone(&run_count),
            should_fail: false,
        });
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown();
        scheduler.wait_for_shutdown(Duration::from_secs(2)).await;

        // First run is one interval out; shutdown should win.
        assert_eq!(run_count.load(Ordering::SeqCst), 0);
    }
}

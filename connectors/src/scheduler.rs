//! Interval-driven sync scheduling.
//!
//! Each named job gets its own tokio task ticking at a fixed interval.
//! Re-registering a name replaces the old job, a run that outlasts its
//! interval is single-flight (overlapping ticks are skipped), and a failed
//! run is logged without disturbing the schedule.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::ConnectorResult;
use crate::SyncReport;

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ConnectorResult<SyncReport>> + Send + Sync>;

struct ScheduledJob {
    job: JobFn,
    task: JoinHandle<()>,
    last_report: Arc<RwLock<Option<SyncReport>>>,
    running: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct SyncScheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a repeating job. The first run happens
    /// immediately, then every `interval`.
    pub fn schedule_repeating<F, Fut>(&self, name: &str, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConnectorResult<SyncReport>> + Send + 'static
    {
        let job: JobFn = Arc::new(move || Box::pin(job()));
        let last_report = Arc::new(RwLock::new(None));
        let running = Arc::new(AtomicBool::new(false));

        let task_name = name.to_string();
        let task_job = Arc::clone(&job);
        let task_report = Arc::clone(&last_report);
        let task_running = Arc::clone(&running);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                Self::execute(&task_name, &task_job, &task_report, &task_running).await;
            }
        });

        let mut jobs = self.jobs.lock();
        if let Some(old) = jobs.insert(
            name.to_string(),
            ScheduledJob {
                job,
                task,
                last_report,
                running,
            },
        ) {
            old.task.abort();
            info!(job = name, "replaced scheduled job");
        } else {
            info!(job = name, interval_secs = interval.as_secs(), "scheduled job");
        }
    }

    async fn execute(
        name: &str,
        job: &JobFn,
        last_report: &RwLock<Option<SyncReport>>,
        running: &AtomicBool,
    ) -> Option<SyncReport> {
        if running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(job = name, "previous run still active, skipping tick");
            return None;
        }
        let result = (job)().await;
        running.store(false, Ordering::SeqCst);

        match result {
            Ok(report) => {
                info!(
                    job = name,
                    indexed = report.items_indexed,
                    errors = report.errors.len(),
                    outcome = ?report.outcome,
                    "sync run finished"
                );
                *last_report.write() = Some(report.clone());
                Some(report)
            }
            Err(err) => {
                error!(job = name, error = %err, "sync run failed");
                None
            }
        }
    }

    /// Trigger a job outside its schedule. Returns `None` if the job is
    /// unknown, already running, or its run failed.
    pub async fn run_now(&self, name: &str) -> Option<SyncReport> {
        let (job, last_report, running) = {
            let jobs = self.jobs.lock();
            let entry = jobs.get(name)?;
            (
                Arc::clone(&entry.job),
                Arc::clone(&entry.last_report),
                Arc::clone(&entry.running),
            )
        };
        Self::execute(name, &job, &last_report, &running).await
    }

    pub fn last_report(&self, name: &str) -> Option<SyncReport> {
        self.jobs
            .lock()
            .get(name)
            .and_then(|entry| entry.last_report.read().clone())
    }

    /// Cancel a job. Returns whether it existed.
    pub fn stop(&self, name: &str) -> bool {
        match self.jobs.lock().remove(name) {
            Some(entry) => {
                entry.task.abort();
                info!(job = name, "stopped scheduled job");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let mut jobs = self.jobs.lock();
        for (name, entry) in jobs.drain() {
            entry.task.abort();
            info!(job = %name, "stopped scheduled job");
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use wl_core::Provider;

    use crate::SyncOutcome;

    fn completed_report() -> SyncReport {
        SyncReport::new(Provider::Slack).complete(SyncOutcome::Completed)
    }

    #[tokio::test]
    async fn runs_repeatedly_and_records_last_report() {
        let scheduler = SyncScheduler::new();
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        scheduler.schedule_repeating("slack", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(completed_report()) }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);
        let report = scheduler.last_report("slack").unwrap();
        assert_eq!(report.outcome, SyncOutcome::Completed);
    }

    #[tokio::test]
    async fn rescheduling_replaces_the_old_job() {
        let scheduler = SyncScheduler::new();
        let old_runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&old_runs);
        scheduler.schedule_repeating("slack", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(completed_report()) }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        scheduler.schedule_repeating("slack", Duration::from_millis(10), || async {
            Ok(completed_report())
        });
        let frozen = old_runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(old_runs.load(Ordering::SeqCst), frozen);
    }

    #[tokio::test]
    async fn overlapping_runs_are_skipped() {
        let scheduler = SyncScheduler::new();
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        scheduler.schedule_repeating("slow", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(completed_report())
            }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        // The first run is still sleeping, so an explicit trigger is refused.
        assert!(scheduler.run_now("slow").await.is_none());
    }

    #[tokio::test]
    async fn failing_job_keeps_its_schedule() {
        let scheduler = SyncScheduler::new();
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        scheduler.schedule_repeating("flaky", Duration::from_millis(10), move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(crate::ConnectorError::Api {
                        provider: Provider::Slack,
                        code: "fatal_error".into(),
                    })
                } else {
                    Ok(completed_report())
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert!(scheduler.last_report("flaky").is_some());
    }

    #[tokio::test]
    async fn run_now_on_unknown_job_is_none() {
        let scheduler = SyncScheduler::new();
        assert!(scheduler.run_now("nope").await.is_none());
        assert!(!scheduler.stop("nope"));
    }
}

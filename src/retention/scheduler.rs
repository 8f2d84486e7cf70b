//! Once-a-day background jobs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{clock::Clock, db::Database, statistics::StatisticsEngine};

use super::RetentionManager;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// Errors are the job's own business; the scheduler just moves on.
    async fn run(&self);
}

#[async_trait]
impl ScheduledJob for RetentionManager {
    fn name(&self) -> &'static str {
        "retention cleanup"
    }

    async fn run(&self) {
        let result = self.run_cleanup().await;
        if !result.success {
            log_warn!("Retention cleanup finished with table errors");
        }
    }
}

/// Finalizes yesterday's statistics for whichever profile is active at fire time.
pub struct StatisticsRecomputeJob {
    pub engine: StatisticsEngine,
    pub db: Database,
}

#[async_trait]
impl ScheduledJob for StatisticsRecomputeJob {
    fn name(&self) -> &'static str {
        "statistics recompute"
    }

    async fn run(&self) {
        let profile = match self.db.get_active_profile().await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                log_info!("No active profile; skipping statistics recompute");
                return;
            }
            Err(err) => {
                log_warn!("Active profile lookup failed: {err:?}");
                return;
            }
        };

        match self.engine.finalize_previous_day(&profile.id).await {
            Ok(snapshots) => log_info!(
                "Finalized {} daily statistics for profile {}",
                snapshots.len(),
                profile.id
            ),
            Err(err) => log_warn!("Statistics recompute for {} failed: {err:?}", profile.id),
        }
    }
}

/// First `hour:00` UTC strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or_default();
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(at));
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

pub struct DailyScheduler {
    hour: u32,
    clock: Arc<dyn Clock>,
    jobs: Vec<Arc<dyn ScheduledJob>>,
}

impl DailyScheduler {
    pub fn new(hour: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            hour,
            clock,
            jobs: Vec::new(),
        }
    }

    pub fn with_job(mut self, job: Arc<dyn ScheduledJob>) -> Self {
        self.jobs.push(job);
        self
    }

    /// Sleeps until each fire time and runs the jobs in order. Returns once
    /// `cancel_token` fires; a job already running is allowed to finish.
    pub async fn run(self, cancel_token: CancellationToken) {
        log_info!(
            "Daily scheduler started ({} jobs at {:02}:00 UTC)",
            self.jobs.len(),
            self.hour
        );

        loop {
            let now = self.clock.now();
            let next = next_run_after(now, self.hour);
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = sleep(wait) => {}
                _ = cancel_token.cancelled() => break,
            }

            for job in &self.jobs {
                log_info!("Running scheduled job: {}", job.name());
                job.run().await;
            }
        }

        log_info!("Daily scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::clock::TokioClock;

    #[test]
    fn next_run_is_strictly_in_the_future() {
        let before = Utc.with_ymd_and_hms(2024, 3, 10, 1, 30, 0).unwrap();
        assert_eq!(
            next_run_after(before, 3),
            Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap()
        );

        let exactly = Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap();
        assert_eq!(
            next_run_after(exactly, 3),
            Utc.with_ymd_and_hms(2024, 3, 11, 3, 0, 0).unwrap()
        );

        let year_end = Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(
            next_run_after(year_end, 3),
            Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap()
        );
    }

    struct CountingJob(Arc<AtomicUsize>);

    #[async_trait]
    impl ScheduledJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_day_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap();
        let scheduler = DailyScheduler::new(3, Arc::new(TokioClock::starting_at(start)))
            .with_job(Arc::new(CountingJob(runs.clone())));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(std::time::Duration::from_secs(30 * 60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(std::time::Duration::from_secs(2 * 24 * 3600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        cancel.cancel();
        task.await.unwrap();
    }
}

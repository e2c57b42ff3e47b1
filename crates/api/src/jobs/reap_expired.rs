//! Expired enroll record reaper.

use std::time::Duration;

use chrono::NaiveTime;
use persistence::repositories::EnrollRepository;
use tracing::info;

use super::scheduler::Job;

/// Deletes pending enroll records that never reached a terminal state
/// within the expiry window. Each run removes at most the configured limit.
pub struct ReapExpiredEnrollsJob {
    enrolls: EnrollRepository,
    expiry_minutes: i64,
    delete_limit: i64,
    every: Duration,
    start_time: Option<NaiveTime>,
}

impl ReapExpiredEnrollsJob {
    pub fn new(
        enrolls: EnrollRepository,
        expiry_minutes: i64,
        delete_limit: i64,
        every: Duration,
        start_time: Option<NaiveTime>,
    ) -> Self {
        Self {
            enrolls,
            expiry_minutes,
            delete_limit,
            every,
            start_time,
        }
    }
}

#[async_trait::async_trait]
impl Job for ReapExpiredEnrollsJob {
    fn name(&self) -> &'static str {
        "delete_expired_enrolls"
    }

    fn every(&self) -> Duration {
        self.every
    }

    fn start_time(&self) -> Option<NaiveTime> {
        self.start_time
    }

    async fn execute(&self) -> Result<(), String> {
        let count = self
            .enrolls
            .delete_expired(self.expiry_minutes * 60, self.delete_limit)
            .await
            .map_err(|e| format!("failed to delete expired enrolls: {e}"))?;

        info!(
            deleted = count,
            expiry_minutes = self.expiry_minutes,
            "Reaped expired enroll records"
        );
        Ok(())
    }
}

//! Pending enroll backlog gauge.

use std::time::Duration;

use metrics::gauge;
use persistence::repositories::EnrollRepository;

use super::scheduler::Job;

/// Publishes the number of records still waiting on the pipeline, for
/// back-pressure dashboards and alerting.
pub struct PendingEnrollGaugeJob {
    enrolls: EnrollRepository,
}

impl PendingEnrollGaugeJob {
    pub fn new(enrolls: EnrollRepository) -> Self {
        Self { enrolls }
    }
}

#[async_trait::async_trait]
impl Job for PendingEnrollGaugeJob {
    fn name(&self) -> &'static str {
        "pending_enroll_gauge"
    }

    fn every(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn execute(&self) -> Result<(), String> {
        let count = self
            .enrolls
            .pending_count()
            .await
            .map_err(|e| format!("failed to count pending enrolls: {e}"))?;
        gauge!("enroll_pending_records").set(count as f64);
        Ok(())
    }
}

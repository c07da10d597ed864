use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Last-run bookkeeping for a scheduled job, per hotel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_name: String,
    pub hotel_id: String,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub success_count: u64,
    pub error_count: u64,
    pub min_interval_secs: u64,
}

impl JobStatus {
    pub fn new(job_name: &str, hotel_id: &str, min_interval_secs: u64) -> Self {
        Self {
            job_name: job_name.to_string(),
            hotel_id: hotel_id.to_string(),
            last_success_at: None,
            last_attempt_at: None,
            last_error: None,
            success_count: 0,
            error_count: 0,
            min_interval_secs,
        }
    }

    /// Due when never succeeded or the minimum interval has elapsed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_success_at {
            None => true,
            Some(last) => now - last >= Duration::seconds(self.min_interval_secs as i64),
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_success_at = Some(now);
        self.last_attempt_at = Some(now);
        self.last_error = None;
        self.success_count += 1;
    }

    pub fn record_error(&mut self, now: DateTime<Utc>, error: &str) {
        self.last_attempt_at = Some(now);
        self.last_error = Some(error.to_string());
        self.error_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_after_min_interval() {
        let now = Utc::now();
        let mut status = JobStatus::new("rate_plan_rollover", "H1", 3600);
        assert!(status.is_due(now));

        status.record_success(now);
        assert!(!status.is_due(now + Duration::seconds(60)));
        assert!(status.is_due(now + Duration::seconds(3600)));
    }
}

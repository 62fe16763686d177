//! Scheduler-owned execution history, one row per `(job_name, provider_id?)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistory {
    pub job_name: String,
    pub provider_id: Option<String>,
    pub status: JobStatus,
    pub last_execution: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub last_result: Option<String>,
    pub last_error: Option<String>,
    pub last_provider_check: Option<DateTime<Utc>>,
    pub last_settings_check: Option<DateTime<Utc>>,
    pub last_policy_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl JobHistory {
    pub fn new(job_name: impl Into<String>, provider_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            job_name: job_name.into(),
            provider_id,
            status: JobStatus::Completed,
            last_execution: None,
            execution_count: 0,
            last_result: None,
            last_error: None,
            last_provider_check: None,
            last_settings_check: None,
            last_policy_check: None,
            created_at: now,
            last_updated: now,
        }
    }
}

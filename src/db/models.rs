//! Database row types used by sqlx for typed queries.

use crate::error::Result;
use crate::types::{JobError, JobResultSummary, JobStatus, JobType, ProcessingJob};

#[derive(Debug, sqlx::FromRow)]
pub struct NodeMetricsRow {
    pub node_id: String,
    pub position: Option<f64>,
    pub impressions: i64,
    pub clicks: i64,
    pub sessions: i64,
    pub revenue: f64,
    pub transactions: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub project_id: String,
    pub status: String,
    pub progress: i64,
    pub total_items: i64,
    pub processed_items: i64,
    pub errors: String,
    pub result: Option<String>,
    pub retry_of: Option<String>,
    pub retry_attempt: i64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl JobRow {
    /// Decode the row into the domain job. Enum columns written by this
    /// process always parse; a mismatch means external tampering and is
    /// surfaced as a database-level error message.
    pub fn into_job(self) -> Result<ProcessingJob> {
        let job_type = JobType::parse(&self.job_type)
            .ok_or_else(|| crate::error::AppError::Config(format!("bad job_type column: {}", self.job_type)))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| crate::error::AppError::Config(format!("bad status column: {}", self.status)))?;
        let errors: Vec<JobError> = serde_json::from_str(&self.errors)?;
        let result: Option<JobResultSummary> = match self.result {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(ProcessingJob {
            id: self.id,
            job_type,
            project_id: self.project_id,
            status,
            progress: self.progress.clamp(0, 100) as u8,
            total_items: self.total_items,
            processed_items: self.processed_items,
            errors,
            result,
            retry_of: self.retry_of,
            retry_attempt: self.retry_attempt.max(0) as u32,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct OpportunityRow {
    pub node_id: String,
    pub project_id: String,
    pub score: i64,
    pub revenue_potential: f64,
    pub combined_value: f64,
    pub priority: String,
    pub factors: String,
    pub computed_at: i64,
}

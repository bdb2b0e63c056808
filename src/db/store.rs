//! Durable storage for jobs, opportunity scores, and revenue projections.
//! The job row is the only shared mutable state across concurrent batches;
//! every update here is a single serialized read-modify-write statement or
//! transaction, so batch tasks never coordinate in memory.

use crate::config::JOB_ERRORS_CAP;
use crate::db::models::{JobRow, OpportunityRow};
use crate::error::Result;
use crate::types::{
    FactorBreakdown, JobError, JobResultSummary, JobStatus, Priority, ProcessingJob,
    RevenueProjection,
};

#[derive(Clone)]
pub struct Store {
    pool: sqlx::SqlitePool,
}

impl Store {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    pub async fn insert_job(&self, job: &ProcessingJob) -> Result<()> {
        let errors = serde_json::to_string(&job.errors)?;
        let result = match &job.result {
            Some(r) => Some(serde_json::to_string(r)?),
            None => None,
        };
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, project_id, status, progress,
                total_items, processed_items, errors, result,
                retry_of, retry_attempt, created_at, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.to_string())
        .bind(&job.project_id)
        .bind(job.status.to_string())
        .bind(job.progress as i64)
        .bind(job.total_items)
        .bind(job.processed_items)
        .bind(errors)
        .bind(result)
        .bind(&job.retry_of)
        .bind(job.retry_attempt as i64)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<ProcessingJob>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.into_job()?)),
            None => Ok(None),
        }
    }

    pub async fn mark_processing(&self, id: &str, started_at: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = ?, started_at = ? WHERE id = ?")
            .bind(JobStatus::Processing.to_string())
            .bind(started_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_total_items(&self, id: &str, total: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET total_items = ? WHERE id = ?")
            .bind(total)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fold one finished batch into the job aggregate: bump processed_items,
    /// append error entries (capped), and recompute progress. Progress is
    /// monotonically non-decreasing and processed_items never exceeds
    /// total_items.
    pub async fn apply_batch_update(
        &self,
        id: &str,
        processed_delta: i64,
        new_errors: &[JobError],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, i64, i64, String)> = sqlx::query_as(
            "SELECT processed_items, total_items, progress, errors FROM jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((processed, total, progress, errors_raw)) = row else {
            return Ok(());
        };

        let mut errors: Vec<JobError> = serde_json::from_str(&errors_raw)?;
        for e in new_errors {
            if errors.len() >= JOB_ERRORS_CAP {
                break;
            }
            errors.push(e.clone());
        }

        let processed = (processed + processed_delta).min(total).max(0);
        let pct = if total > 0 {
            (((processed as f64) / (total as f64)) * 100.0).round() as i64
        } else {
            100
        };
        let progress = progress.max(pct.clamp(0, 100));

        sqlx::query("UPDATE jobs SET processed_items = ?, progress = ?, errors = ? WHERE id = ?")
            .bind(processed)
            .bind(progress)
            .bind(serde_json::to_string(&errors)?)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn complete_job(
        &self,
        id: &str,
        result: &JobResultSummary,
        completed_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = ?, progress = 100, result = ?, completed_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Completed.to_string())
        .bind(serde_json::to_string(result)?)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal failure: append the fatal/synthetic error entry and flip
    /// status. Used for fetch failures and operator cancellation. A no-op on
    /// jobs that already reached a terminal status.
    pub async fn fail_job(&self, id: &str, error: JobError, completed_at: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT status, errors FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((status, errors_raw)) = row else {
            return Ok(());
        };
        if matches!(JobStatus::parse(&status), Some(s) if s.is_terminal()) {
            return Ok(());
        }
        let mut errors: Vec<JobError> = serde_json::from_str(&errors_raw)?;
        if errors.len() < JOB_ERRORS_CAP {
            errors.push(error);
        }

        sqlx::query("UPDATE jobs SET status = ?, errors = ?, completed_at = ? WHERE id = ?")
            .bind(JobStatus::Failed.to_string())
            .bind(serde_json::to_string(&errors)?)
            .bind(completed_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn has_active_job(&self, project_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE project_id = ? AND status IN ('pending', 'processing')",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn job_status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Opportunities & projections
    // -----------------------------------------------------------------------

    /// Upsert keyed by node_id: last write wins, no history.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_opportunity(
        &self,
        project_id: &str,
        node_id: &str,
        score: u8,
        revenue_potential: f64,
        combined_value: f64,
        priority: Priority,
        factors: &FactorBreakdown,
        computed_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO opportunities (
                node_id, project_id, score, revenue_potential,
                combined_value, priority, factors, computed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(node_id) DO UPDATE SET
                project_id = excluded.project_id,
                score = excluded.score,
                revenue_potential = excluded.revenue_potential,
                combined_value = excluded.combined_value,
                priority = excluded.priority,
                factors = excluded.factors,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(node_id)
        .bind(project_id)
        .bind(score as i64)
        .bind(revenue_potential)
        .bind(combined_value)
        .bind(priority.to_string())
        .bind(serde_json::to_string(factors)?)
        .bind(computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_projection(
        &self,
        project_id: &str,
        projection: &RevenueProjection,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projections (
                node_id, project_id, target_position, monthly_revenue_lift,
                annual_revenue_lift, confidence, time_to_impact_weeks,
                detail, calculated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(node_id) DO UPDATE SET
                project_id = excluded.project_id,
                target_position = excluded.target_position,
                monthly_revenue_lift = excluded.monthly_revenue_lift,
                annual_revenue_lift = excluded.annual_revenue_lift,
                confidence = excluded.confidence,
                time_to_impact_weeks = excluded.time_to_impact_weeks,
                detail = excluded.detail,
                calculated_at = excluded.calculated_at
            "#,
        )
        .bind(&projection.node_id)
        .bind(project_id)
        .bind(projection.assumptions.target_position as i64)
        .bind(projection.lift.monthly_revenue_lift)
        .bind(projection.lift.annual_revenue_lift)
        .bind(projection.confidence)
        .bind(projection.time_to_impact_weeks as i64)
        .bind(serde_json::to_string(projection)?)
        .bind(projection.calculated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_opportunities(
        &self,
        project_id: &str,
        limit: i64,
        min_score: i64,
    ) -> Result<Vec<OpportunityRow>> {
        let rows = sqlx::query_as::<_, OpportunityRow>(
            r#"
            SELECT node_id, project_id, score, revenue_potential,
                   combined_value, priority, factors, computed_at
            FROM opportunities
            WHERE project_id = ? AND score >= ?
            ORDER BY combined_value DESC
            LIMIT ?
            "#,
        )
        .bind(project_id)
        .bind(min_score)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn top_opportunities(&self, limit: i64) -> Result<Vec<OpportunityRow>> {
        let rows = sqlx::query_as::<_, OpportunityRow>(
            r#"
            SELECT node_id, project_id, score, revenue_potential,
                   combined_value, priority, factors, computed_at
            FROM opportunities
            ORDER BY combined_value DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_opportunities(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM opportunities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_ns, JobType};

    async fn test_store() -> Store {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
        Store::new(pool)
    }

    fn pending_job(id: &str, total: i64) -> ProcessingJob {
        ProcessingJob {
            id: id.to_string(),
            job_type: JobType::Scoring,
            project_id: "p1".to_string(),
            status: JobStatus::Pending,
            progress: 0,
            total_items: total,
            processed_items: 0,
            errors: Vec::new(),
            result: None,
            retry_of: None,
            retry_attempt: 0,
            created_at: now_ns(),
            started_at: None,
            completed_at: None,
        }
    }

    fn node_error(node_id: &str) -> JobError {
        JobError {
            node_id: node_id.to_string(),
            message: "boom".to_string(),
            timestamp: now_ns(),
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn job_round_trips() {
        let store = test_store().await;
        store.insert_job(&pending_job("j1", 10)).await.unwrap();

        let job = store.get_job("j1").await.unwrap().expect("job exists");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_items, 10);
        assert!(store.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_updates_accumulate_and_progress_never_drops() {
        let store = test_store().await;
        store.insert_job(&pending_job("j1", 10)).await.unwrap();

        store.apply_batch_update("j1", 4, &[]).await.unwrap();
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.processed_items, 4);
        assert_eq!(job.progress, 40);

        store.apply_batch_update("j1", 3, &[node_error("n9")]).await.unwrap();
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.processed_items, 7);
        assert_eq!(job.progress, 70);
        assert_eq!(job.errors.len(), 1);

        // A zero-progress batch (all errors) must not move progress backward.
        store.apply_batch_update("j1", 0, &[node_error("n10")]).await.unwrap();
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.progress, 70);
        assert_eq!(job.errors.len(), 2);
    }

    #[tokio::test]
    async fn processed_items_is_capped_at_total() {
        let store = test_store().await;
        store.insert_job(&pending_job("j1", 5)).await.unwrap();
        store.apply_batch_update("j1", 9, &[]).await.unwrap();
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.processed_items, 5);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn opportunity_upsert_is_last_write_wins() {
        let store = test_store().await;
        let factors = FactorBreakdown::default();
        store
            .upsert_opportunity("p1", "n1", 40, 100.0, 20.0, Priority::Low, &factors, 1)
            .await
            .unwrap();
        store
            .upsert_opportunity("p1", "n1", 75, 9_000.0, 80.0, Priority::High, &factors, 2)
            .await
            .unwrap();

        let rows = store.list_opportunities("p1", 10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 75);
        assert_eq!(rows[0].priority, "high");
        assert_eq!(rows[0].computed_at, 2);
    }

    #[tokio::test]
    async fn active_job_detection() {
        let store = test_store().await;
        store.insert_job(&pending_job("j1", 3)).await.unwrap();
        assert!(store.has_active_job("p1").await.unwrap());
        assert!(!store.has_active_job("p2").await.unwrap());

        store
            .complete_job(
                "j1",
                &JobResultSummary {
                    successful: 3,
                    failed: 0,
                    success_rate: 100.0,
                    top_opportunities: Vec::new(),
                },
                now_ns(),
            )
            .await
            .unwrap();
        assert!(!store.has_active_job("p1").await.unwrap());
    }
}

//! Concurrent batch engine: runs the scorer and/or calculator across every
//! node of a project under bounded concurrency, with per-batch timeouts,
//! per-node failure isolation, incremental progress persistence, cooperative
//! cancellation, and a retry path scoped to failed nodes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::calculator::RevenueCalculator;
use crate::config::{self, ranking, Config};
use crate::db::store::Store;
use crate::error::{AppError, Result};
use crate::metrics::MetricsRepository;
use crate::pipeline::registry::JobRegistry;
use crate::scorer::{BatchContext, OpportunityScorer};
use crate::types::{
    now_ns, JobError, JobOptions, JobResultSummary, JobStatus, JobType, NodeMetrics,
    OpportunityScore, Priority, ProcessingJob, RankedOpportunity, RevenueProjection,
};

/// Per-node output of one analysis pass.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub node_id: String,
    pub score: Option<OpportunityScore>,
    pub projection: Option<RevenueProjection>,
    pub combined_value: f64,
    pub priority: Priority,
}

struct BatchOutcome {
    successes: Vec<NodeOutcome>,
    errors: Vec<JobError>,
}

/// Ranking value combining score and projected lift, scaled by the mean of
/// the two confidence estimates. When a job computes only one of the two,
/// the present confidence stands alone.
pub fn combined_value(
    score: Option<&OpportunityScore>,
    projection: Option<&RevenueProjection>,
) -> f64 {
    let score_fraction = score.map(|s| s.score as f64 / 100.0).unwrap_or(0.0);
    let lift = projection
        .map(|p| p.lift.monthly_revenue_lift)
        .unwrap_or(0.0);
    let lift_fraction = (lift / ranking::LIFT_SCALE).clamp(0.0, 1.0);
    let confidence = match (score, projection) {
        (Some(s), Some(p)) => (s.confidence + p.confidence) / 2.0,
        (Some(s), None) => s.confidence,
        (None, Some(p)) => p.confidence,
        (None, None) => 0.0,
    };
    (ranking::SCORE_SHARE * score_fraction + ranking::LIFT_SHARE * lift_fraction)
        * confidence
        * 100.0
}

pub struct BatchProcessor {
    store: Store,
    metrics: Arc<dyn MetricsRepository>,
    scorer: OpportunityScorer,
    calculator: RevenueCalculator,
    registry: Arc<JobRegistry>,
    latency: Arc<LatencyStats>,
    health: Arc<HealthState>,
    defaults: JobOptions,
}

impl BatchProcessor {
    pub fn new(
        store: Store,
        metrics: Arc<dyn MetricsRepository>,
        registry: Arc<JobRegistry>,
        latency: Arc<LatencyStats>,
        health: Arc<HealthState>,
        cfg: &Config,
    ) -> Self {
        Self {
            store,
            metrics,
            scorer: OpportunityScorer::new(),
            calculator: RevenueCalculator::new(),
            registry,
            latency,
            health,
            defaults: JobOptions {
                batch_size: cfg.batch_size,
                max_concurrent: cfg.max_concurrent_batches,
                batch_timeout_secs: cfg.batch_timeout_secs,
                max_retries: config::DEFAULT_MAX_RETRIES,
                target_position: cfg.target_position,
                node_filter: None,
            },
        }
    }

    pub fn default_options(&self) -> JobOptions {
        self.defaults.clone()
    }

    /// Persist a pending job and spawn its processing task. Returns
    /// immediately; callers poll `get_job_status` for progress.
    pub async fn create_job(
        self: Arc<Self>,
        job_type: JobType,
        project_id: &str,
        options: Option<JobOptions>,
    ) -> Result<ProcessingJob> {
        let options = options.unwrap_or_else(|| self.defaults.clone());
        self.spawn_job(job_type, project_id, options, None, 0).await
    }

    async fn spawn_job(
        self: Arc<Self>,
        job_type: JobType,
        project_id: &str,
        options: JobOptions,
        retry_of: Option<String>,
        retry_attempt: u32,
    ) -> Result<ProcessingJob> {
        let job = ProcessingJob {
            id: Uuid::new_v4().to_string(),
            job_type,
            project_id: project_id.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            total_items: 0,
            processed_items: 0,
            errors: Vec::new(),
            result: None,
            retry_of,
            retry_attempt,
            created_at: now_ns(),
            started_at: None,
            completed_at: None,
        };
        self.store.insert_job(&job).await?;
        info!(
            event = "JOB_CREATED",
            job_id = %job.id,
            job_type = %job_type,
            project_id = %project_id,
            "Created {job_type} job {} for project {project_id}",
            job.id,
        );

        let task_job = job.clone();
        tokio::spawn(async move { self.run_job(task_job, options).await });
        Ok(job)
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<ProcessingJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(job_id.to_string()))
    }

    /// Cooperative cancellation: flips the job to failed with a synthetic
    /// error entry and stops further batch dispatch. In-flight batches are
    /// allowed to finish. Returns false when the job is not processing.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let job = self.get_job_status(job_id).await?;
        if job.status != JobStatus::Processing {
            return Ok(false);
        }
        self.registry.request_cancel(job_id);
        let entry = JobError {
            node_id: String::new(),
            message: "job cancelled by operator".to_string(),
            timestamp: now_ns(),
            retry_count: job.retry_attempt,
        };
        self.store.fail_job(job_id, entry, now_ns()).await?;
        info!(event = "JOB_CANCELLED", job_id = %job_id, "Cancelled job {job_id}");
        Ok(true)
    }

    /// Create a new job scoped to the failed node ids of a previous run,
    /// with smaller batches and a higher retry budget. The original job is
    /// never mutated.
    pub async fn retry_failed_items(self: Arc<Self>, job_id: &str) -> Result<ProcessingJob> {
        let job = self.get_job_status(job_id).await?;
        // Synthetic entries (cancellation, fatal errors) carry no node id.
        let mut failed: Vec<String> = job
            .errors
            .iter()
            .filter(|e| !e.node_id.is_empty())
            .map(|e| e.node_id.clone())
            .collect();
        failed.sort();
        failed.dedup();
        if failed.is_empty() {
            return Err(AppError::NothingToRetry(job_id.to_string()));
        }
        if job.retry_attempt >= config::RETRY_MAX_RETRIES {
            return Err(AppError::RetryExhausted(job_id.to_string()));
        }

        let options = JobOptions {
            batch_size: config::RETRY_BATCH_SIZE,
            max_concurrent: self.defaults.max_concurrent,
            batch_timeout_secs: self.defaults.batch_timeout_secs,
            max_retries: config::RETRY_MAX_RETRIES,
            target_position: self.defaults.target_position,
            node_filter: Some(failed),
        };
        let project_id = job.project_id.clone();
        self.spawn_job(
            job.job_type,
            &project_id,
            options,
            Some(job.id),
            job.retry_attempt + 1,
        )
        .await
    }

    async fn run_job(self: Arc<Self>, job: ProcessingJob, options: JobOptions) {
        let cancel = self.registry.register(&job.id);
        self.health.job_started();

        if let Err(e) = Arc::clone(&self).process(&job, &options, &cancel).await {
            // Fatal path: node-list fetch or persistence bootstrap failed.
            error!(event = "JOB_FATAL", job_id = %job.id, "Job {} failed: {e}", job.id);
            let entry = JobError {
                node_id: String::new(),
                message: e.to_string(),
                timestamp: now_ns(),
                retry_count: job.retry_attempt,
            };
            if let Err(persist_err) = self.store.fail_job(&job.id, entry, now_ns()).await {
                error!("Could not persist failure of job {}: {persist_err}", job.id);
            }
        }

        self.registry.unregister(&job.id);
        self.health.job_finished();
    }

    async fn process(
        self: Arc<Self>,
        job: &ProcessingJob,
        options: &JobOptions,
        cancel: &Arc<AtomicBool>,
    ) -> Result<()> {
        self.store.mark_processing(&job.id, now_ns()).await?;

        let mut nodes = self.metrics.project_nodes(&job.project_id).await?;
        if let Some(filter) = &options.node_filter {
            let keep: HashSet<&str> = filter.iter().map(String::as_str).collect();
            nodes.retain(|n| keep.contains(n.node_id.as_str()));
        }
        let total = nodes.len() as i64;
        self.store.set_total_items(&job.id, total).await?;
        info!(
            event = "JOB_STARTED",
            job_id = %job.id,
            total_items = total,
            batch_size = options.batch_size,
            "Job {} processing {total} nodes",
            job.id,
        );

        if nodes.is_empty() {
            let summary = JobResultSummary {
                successful: 0,
                failed: 0,
                success_rate: 100.0,
                top_opportunities: Vec::new(),
            };
            self.store.complete_job(&job.id, &summary, now_ns()).await?;
            self.health.job_completed();
            return Ok(());
        }

        let ctx = BatchContext::from_nodes(&nodes);
        let batches: Vec<Vec<NodeMetrics>> = nodes
            .chunks(options.batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();

        // Batches are dispatched in index order; at most max_concurrent are
        // in flight. Completion order is whatever the scheduler yields.
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(batches.len());
        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            if cancel.load(Ordering::Relaxed) {
                break;
            }

            let this = Arc::clone(&self);
            let job_id = job.id.clone();
            let job_type = job.job_type;
            let project_id = job.project_id.clone();
            let opts = options.clone();
            let retry_attempt = job.retry_attempt;
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = this
                    .run_batch(job_type, &project_id, index, batch, ctx, &opts, retry_attempt)
                    .await;
                let processed = outcome.successes.len() as i64;
                if let Err(e) = this
                    .store
                    .apply_batch_update(&job_id, processed, &outcome.errors)
                    .await
                {
                    error!("Could not persist batch {index} of job {job_id}: {e}");
                }
                outcome
            }));
        }

        let mut outcomes: Vec<NodeOutcome> = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.extend(outcome.successes),
                Err(e) => error!(job_id = %job.id, "Batch task panicked: {e}"),
            }
        }

        if cancel.load(Ordering::Relaxed) {
            // Status was already flipped to failed by the cancel request;
            // finished batches have recorded their work and we stop here.
            info!(
                event = "JOB_HALTED",
                job_id = %job.id,
                completed_nodes = outcomes.len(),
                "Job {} halted after cancellation",
                job.id,
            );
            return Ok(());
        }

        outcomes.sort_by(|a, b| {
            b.combined_value
                .partial_cmp(&a.combined_value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });

        let successful = outcomes.len() as i64;
        let failed = total - successful;
        let success_rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            100.0
        };
        let top_opportunities = outcomes
            .iter()
            .take(config::RESULT_TOP_N)
            .map(|o| RankedOpportunity {
                node_id: o.node_id.clone(),
                score: o.score.as_ref().map(|s| s.score),
                monthly_revenue_lift: o
                    .projection
                    .as_ref()
                    .map(|p| p.lift.monthly_revenue_lift)
                    .unwrap_or(0.0),
                combined_value: o.combined_value,
                priority: o.priority,
            })
            .collect();
        let summary = JobResultSummary {
            successful,
            failed,
            success_rate,
            top_opportunities,
        };
        self.store.complete_job(&job.id, &summary, now_ns()).await?;
        self.health.job_completed();
        info!(
            event = "JOB_COMPLETED",
            job_id = %job.id,
            successful,
            failed,
            "Job {} completed: {successful}/{total} nodes ({success_rate:.1}%)",
            job.id,
        );
        Ok(())
    }

    /// One batch under its time budget. On timeout, every node in the batch
    /// is recorded as failed; sibling batches are unaffected.
    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        &self,
        job_type: JobType,
        project_id: &str,
        index: usize,
        nodes: Vec<NodeMetrics>,
        ctx: BatchContext,
        options: &JobOptions,
        retry_attempt: u32,
    ) -> BatchOutcome {
        let node_ids: Vec<String> = nodes.iter().map(|n| n.node_id.clone()).collect();
        let budget = Duration::from_secs(options.batch_timeout_secs);

        match tokio::time::timeout(
            budget,
            self.process_nodes(job_type, project_id, nodes, ctx, options, retry_attempt),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    event = "BATCH_TIMEOUT",
                    batch_index = index,
                    nodes = node_ids.len(),
                    "Batch {index} exceeded its {}s budget; recording {} nodes as failed",
                    options.batch_timeout_secs,
                    node_ids.len(),
                );
                let timestamp = now_ns();
                BatchOutcome {
                    successes: Vec::new(),
                    errors: node_ids
                        .into_iter()
                        .map(|node_id| JobError {
                            node_id,
                            message: format!(
                                "batch {index} timed out after {}s",
                                options.batch_timeout_secs
                            ),
                            timestamp,
                            retry_count: retry_attempt,
                        })
                        .collect(),
                }
            }
        }
    }

    /// Fan the batch's nodes out concurrently with allSettled-style
    /// isolation: one node's failure never aborts its siblings.
    async fn process_nodes(
        &self,
        job_type: JobType,
        project_id: &str,
        nodes: Vec<NodeMetrics>,
        ctx: BatchContext,
        options: &JobOptions,
        retry_attempt: u32,
    ) -> BatchOutcome {
        let tasks = nodes.into_iter().map(|node| async move {
            let started = Instant::now();
            let analyzed = self.analyze_node(job_type, &node, &ctx, options);
            self.latency.record(started.elapsed());
            match analyzed {
                Ok(outcome) => match self.persist_outcome(project_id, &outcome).await {
                    Ok(()) => Ok(outcome),
                    Err(e) => Err(JobError {
                        node_id: node.node_id.clone(),
                        message: e.to_string(),
                        timestamp: now_ns(),
                        retry_count: retry_attempt,
                    }),
                },
                Err(e) => Err(JobError {
                    node_id: node.node_id.clone(),
                    message: e.to_string(),
                    timestamp: now_ns(),
                    retry_count: retry_attempt,
                }),
            }
        });

        let mut successes = Vec::new();
        let mut errors = Vec::new();
        for result in join_all(tasks).await {
            match result {
                Ok(outcome) => successes.push(outcome),
                Err(e) => errors.push(e),
            }
        }
        BatchOutcome { successes, errors }
    }

    fn analyze_node(
        &self,
        job_type: JobType,
        node: &NodeMetrics,
        ctx: &BatchContext,
        options: &JobOptions,
    ) -> Result<NodeOutcome> {
        validate_metrics(node)?;

        let score = if job_type.scores() {
            Some(self.scorer.score(node, ctx))
        } else {
            None
        };
        let projection = if job_type.projects() {
            let target = effective_target(options.target_position, node.position);
            Some(self.calculator.project(node, target, None))
        } else {
            None
        };

        let value = combined_value(score.as_ref(), projection.as_ref());
        Ok(NodeOutcome {
            node_id: node.node_id.clone(),
            score,
            projection,
            combined_value: value,
            priority: Priority::from_combined_value(value),
        })
    }

    async fn persist_outcome(&self, project_id: &str, outcome: &NodeOutcome) -> Result<()> {
        if let Some(score) = &outcome.score {
            let revenue_potential = outcome
                .projection
                .as_ref()
                .map(|p| p.lift.monthly_revenue_lift)
                .unwrap_or(0.0);
            self.store
                .upsert_opportunity(
                    project_id,
                    &outcome.node_id,
                    score.score,
                    revenue_potential,
                    outcome.combined_value,
                    outcome.priority,
                    &score.factors,
                    score.computed_at,
                )
                .await?;
        }
        if let Some(projection) = &outcome.projection {
            self.store.upsert_projection(project_id, projection).await?;
        }
        Ok(())
    }
}

/// Never project a node to a worse position than it already holds: the
/// effective target is capped at the node's current (floored) position.
fn effective_target(configured: u32, current_position: f64) -> u32 {
    let current = current_position.floor().max(1.0) as u32;
    configured.min(current).max(1)
}

/// Guard against corrupt sync rows. Rejected nodes are recorded on the job's
/// error list rather than aborting the batch.
fn validate_metrics(node: &NodeMetrics) -> Result<()> {
    if !node.position.is_finite() || !node.revenue.is_finite() {
        return Err(AppError::Node(format!(
            "node {} has non-finite metrics",
            node.node_id
        )));
    }
    if node.impressions < 0
        || node.clicks < 0
        || node.sessions < 0
        || node.transactions < 0
        || node.revenue < 0.0
    {
        return Err(AppError::Node(format!(
            "node {} has negative metrics",
            node.node_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SqliteMetricsRepository;

    async fn test_setup() -> (Arc<BatchProcessor>, Store, sqlx::SqlitePool) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");

        let store = Store::new(pool.clone());
        let cfg = Config {
            log_level: "info".to_string(),
            db_path: String::new(),
            api_port: 0,
            batch_size: 2,
            max_concurrent_batches: 2,
            batch_timeout_secs: 60,
            target_position: 3,
            schedule_projects: Vec::new(),
            schedule_interval_secs: 3600,
        };
        let processor = Arc::new(BatchProcessor::new(
            store.clone(),
            Arc::new(SqliteMetricsRepository::new(pool.clone())),
            Arc::new(JobRegistry::new()),
            Arc::new(LatencyStats::new()),
            Arc::new(HealthState::new()),
            &cfg,
        ));
        (processor, store, pool)
    }

    async fn insert_node(
        pool: &sqlx::SqlitePool,
        node_id: &str,
        position: f64,
        impressions: i64,
        clicks: i64,
        sessions: i64,
        revenue: f64,
        transactions: i64,
    ) {
        sqlx::query(
            r#"
            INSERT INTO node_metrics (node_id, project_id, depth, position, impressions, clicks, sessions, revenue, transactions)
            VALUES (?, 'p1', 0, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(node_id)
        .bind(position)
        .bind(impressions)
        .bind(clicks)
        .bind(sessions)
        .bind(revenue)
        .bind(transactions)
        .execute(pool)
        .await
        .expect("insert node");
    }

    /// Poll until the job reaches a terminal status, asserting that observed
    /// progress never decreases along the way.
    async fn wait_terminal(store: &Store, job_id: &str) -> ProcessingJob {
        let mut last_progress = 0u8;
        for _ in 0..500 {
            if let Some(job) = store.get_job(job_id).await.unwrap() {
                assert!(
                    job.progress >= last_progress,
                    "progress went backwards: {} -> {}",
                    last_progress,
                    job.progress
                );
                last_progress = job.progress;
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} never reached a terminal status");
    }

    #[tokio::test]
    async fn empty_project_completes_immediately() {
        let (processor, store, _pool) = test_setup().await;
        let job = processor
            .clone()
            .create_job(JobType::Scoring, "p1", None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let done = wait_terminal(&store, &job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.total_items, 0);
        assert_eq!(done.result.unwrap().successful, 0);
    }

    #[tokio::test]
    async fn one_bad_node_does_not_abort_the_job() {
        let (processor, store, pool) = test_setup().await;
        insert_node(&pool, "n1", 5.0, 10_000, 200, 180, 9_000.0, 90).await;
        insert_node(&pool, "n2", 12.0, 4_000, 50, 45, 800.0, 12).await;
        insert_node(&pool, "n3", 8.0, 2_500, 60, 55, 1_200.0, 20).await;
        insert_node(&pool, "n4", 18.0, 600, 8, 7, 90.0, 2).await;
        // Corrupt sync row: negative revenue fails validation.
        insert_node(&pool, "bad", 6.0, 1_000, 30, 25, -50.0, 4).await;

        let job = processor
            .clone()
            .create_job(JobType::FullAnalysis, "p1", None)
            .await
            .unwrap();
        let done = wait_terminal(&store, &job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.total_items, 5);
        assert_eq!(done.processed_items, 4);
        assert_eq!(done.errors.len(), 1);
        assert_eq!(done.errors[0].node_id, "bad");
        assert_eq!(done.processed_items + done.errors.len() as i64, 5);

        let summary = done.result.unwrap();
        assert_eq!(summary.successful, 4);
        assert_eq!(summary.failed, 1);
        assert!((summary.success_rate - 80.0).abs() < 1e-9);
        assert!(!summary.top_opportunities.is_empty());

        // Successful nodes were persisted and ranked.
        let rows = store.list_opportunities("p1", 10, 0).await.unwrap();
        assert_eq!(rows.len(), 4);
        for pair in rows.windows(2) {
            assert!(pair[0].combined_value >= pair[1].combined_value);
        }
    }

    #[tokio::test]
    async fn revenue_job_writes_projections_not_opportunities() {
        let (processor, store, pool) = test_setup().await;
        insert_node(&pool, "n1", 9.0, 5_000, 80, 70, 2_000.0, 25).await;

        let job = processor
            .clone()
            .create_job(JobType::Revenue, "p1", None)
            .await
            .unwrap();
        let done = wait_terminal(&store, &job.id).await;
        assert_eq!(done.status, JobStatus::Completed);

        assert_eq!(store.list_opportunities("p1", 10, 0).await.unwrap().len(), 0);
        let lift: f64 = sqlx::query_scalar(
            "SELECT monthly_revenue_lift FROM projections WHERE node_id = 'n1'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(lift > 0.0);
    }

    #[tokio::test]
    async fn cancel_on_completed_job_returns_false_and_changes_nothing() {
        let (processor, store, _pool) = test_setup().await;
        let job = processor
            .clone()
            .create_job(JobType::Scoring, "p1", None)
            .await
            .unwrap();
        let done = wait_terminal(&store, &job.id).await;
        assert_eq!(done.status, JobStatus::Completed);

        assert!(!processor.cancel_job(&job.id).await.unwrap());
        let after = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Completed);
        assert!(after.errors.is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_not_found() {
        let (processor, _store, _pool) = test_setup().await;
        let err = processor.cancel_job("nope").await.unwrap_err();
        assert!(matches!(err, AppError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn retry_without_failures_is_rejected() {
        let (processor, store, pool) = test_setup().await;
        insert_node(&pool, "n1", 9.0, 5_000, 80, 70, 2_000.0, 25).await;

        let job = processor
            .clone()
            .create_job(JobType::Scoring, "p1", None)
            .await
            .unwrap();
        wait_terminal(&store, &job.id).await;

        let err = processor
            .clone()
            .retry_failed_items(&job.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NothingToRetry(_)));
    }

    #[tokio::test]
    async fn retry_targets_only_failed_nodes() {
        let (processor, store, pool) = test_setup().await;
        insert_node(&pool, "good1", 5.0, 10_000, 200, 180, 9_000.0, 90).await;
        insert_node(&pool, "good2", 8.0, 2_500, 60, 55, 1_200.0, 20).await;
        insert_node(&pool, "bad", 6.0, 1_000, 30, 25, -50.0, 4).await;

        let job = processor
            .clone()
            .create_job(JobType::Scoring, "p1", None)
            .await
            .unwrap();
        let done = wait_terminal(&store, &job.id).await;
        assert_eq!(done.errors.len(), 1);

        let retry = processor
            .clone()
            .retry_failed_items(&job.id)
            .await
            .unwrap();
        assert_eq!(retry.retry_of.as_deref(), Some(job.id.as_str()));
        assert_eq!(retry.retry_attempt, 1);

        let retry_done = wait_terminal(&store, &retry.id).await;
        // Scoped to the one failed node, which fails again.
        assert_eq!(retry_done.total_items, 1);
        assert_eq!(retry_done.processed_items, 0);
        assert_eq!(retry_done.errors.len(), 1);
        assert_eq!(retry_done.errors[0].node_id, "bad");
        assert_eq!(retry_done.errors[0].retry_count, 1);
        assert_eq!(retry_done.status, JobStatus::Completed);

        // The original job's history is untouched.
        let original = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(original.errors.len(), 1);
        assert_eq!(original.errors[0].retry_count, 0);
    }

    #[test]
    fn combined_value_blends_score_and_lift() {
        let score = OpportunityScore {
            node_id: "n1".to_string(),
            score: 80,
            factors: Default::default(),
            confidence: 1.0,
            computed_at: 0,
        };
        // Score only: 0.4 × 0.8 × 1.0 × 100
        let v = combined_value(Some(&score), None);
        assert!((v - 32.0).abs() < 1e-9);
        assert_eq!(combined_value(None, None), 0.0);
    }

    #[test]
    fn effective_target_never_projects_downward() {
        assert_eq!(effective_target(3, 15.0), 3);
        assert_eq!(effective_target(3, 2.4), 2);
        assert_eq!(effective_target(3, 1.0), 1);
        assert_eq!(effective_target(3, 0.5), 1);
    }

    #[test]
    fn corrupt_metrics_are_rejected() {
        let mut node = NodeMetrics {
            node_id: "n1".to_string(),
            position: f64::NAN,
            impressions: 10,
            clicks: 1,
            sessions: 1,
            revenue: 5.0,
            transactions: 1,
        };
        assert!(validate_metrics(&node).is_err());
        node.position = 5.0;
        node.revenue = -1.0;
        assert!(validate_metrics(&node).is_err());
        node.revenue = 1.0;
        assert!(validate_metrics(&node).is_ok());
    }
}

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::db::Store;
use crate::error::AppError;
use crate::pipeline::BatchProcessor;
use crate::types::{JobOptions, JobType, ProcessingJob};

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub processor: Arc<BatchProcessor>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/jobs/:id/retry", post(retry_job))
        .route("/projects/:id/opportunities", get(get_opportunities))
        .route("/stats/summary", get(get_stats_summary))
        .route("/stats/latency", get(get_stats_latency))
        .route("/health", get(get_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub job_type: String,
    pub project_id: String,
    #[serde(default)]
    pub options: JobOptionsRequest,
}

/// Per-request processing knobs; unset fields take the engine defaults.
#[derive(Deserialize, Default)]
pub struct JobOptionsRequest {
    pub batch_size: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub batch_timeout_secs: Option<u64>,
    pub target_position: Option<u32>,
}

impl JobOptionsRequest {
    fn merge_into(&self, mut defaults: JobOptions) -> JobOptions {
        if let Some(batch_size) = self.batch_size {
            defaults.batch_size = batch_size.max(1);
        }
        if let Some(max_concurrent) = self.max_concurrent {
            defaults.max_concurrent = max_concurrent.max(1);
        }
        if let Some(timeout) = self.batch_timeout_secs {
            defaults.batch_timeout_secs = timeout.max(1);
        }
        if let Some(target) = self.target_position {
            defaults.target_position = target.max(1);
        }
        defaults
    }
}

#[derive(Deserialize)]
pub struct OpportunitiesQuery {
    pub limit: Option<i64>,
    pub min_score: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Serialize)]
pub struct OpportunityResponse {
    pub node_id: String,
    pub project_id: String,
    pub score: i64,
    pub revenue_potential: f64,
    pub combined_value: f64,
    pub priority: String,
    pub factors: serde_json::Value,
    pub computed_at: i64,
}

#[derive(Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub total_opportunities: i64,
    pub active_jobs: u64,
    pub jobs_by_status: Vec<StatusCount>,
    pub top_opportunities: Vec<OpportunityResponse>,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_jobs: u64,
    pub jobs_completed: u64,
    pub last_completed_at_ns: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_job(
    State(state): State<ApiState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<ProcessingJob>), AppError> {
    let job_type = JobType::parse(&req.job_type)
        .ok_or_else(|| AppError::InvalidJobType(req.job_type.clone()))?;
    let options = req.options.merge_into(state.processor.default_options());
    let job = state
        .processor
        .clone()
        .create_job(job_type, &req.project_id, Some(options))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<ProcessingJob>, AppError> {
    let job = state.processor.get_job_status(&job_id).await?;
    Ok(Json(job))
}

async fn cancel_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled = state.processor.cancel_job(&job_id).await?;
    Ok(Json(CancelResponse { cancelled }))
}

async fn retry_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<ProcessingJob>), AppError> {
    let job = state.processor.clone().retry_failed_items(&job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn get_opportunities(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
    Query(params): Query<OpportunitiesQuery>,
) -> Result<Json<Vec<OpportunityResponse>>, AppError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let min_score = params.min_score.unwrap_or(0);

    let rows = state
        .store
        .list_opportunities(&project_id, limit, min_score)
        .await?;
    Ok(Json(rows.into_iter().map(opportunity_response).collect()))
}

async fn get_stats_summary(
    State(state): State<ApiState>,
) -> Result<Json<SummaryResponse>, AppError> {
    let total_opportunities = state.store.count_opportunities().await?;
    let jobs_by_status = state
        .store
        .job_status_counts()
        .await?
        .into_iter()
        .map(|(status, count)| StatusCount { status, count })
        .collect();
    let top_opportunities = state
        .store
        .top_opportunities(10)
        .await?
        .into_iter()
        .map(opportunity_response)
        .collect();

    Ok(Json(SummaryResponse {
        total_opportunities,
        active_jobs: state.health.active_jobs(),
        jobs_by_status,
        top_opportunities,
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let percentiles = state.latency.percentiles();
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_us: percentiles.as_ref().map(|p| p.p50_us),
        p95_us: percentiles.as_ref().map(|p| p.p95_us),
        p99_us: percentiles.as_ref().map(|p| p.p99_us),
    })
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_jobs: state.health.active_jobs(),
        jobs_completed: state.health.jobs_completed(),
        last_completed_at_ns: state.health.last_completed_at_ns(),
    })
}

fn opportunity_response(row: crate::db::models::OpportunityRow) -> OpportunityResponse {
    let factors =
        serde_json::from_str(&row.factors).unwrap_or(serde_json::Value::Null);
    OpportunityResponse {
        node_id: row.node_id,
        project_id: row.project_id,
        score: row.score,
        revenue_potential: row.revenue_potential,
        combined_value: row.combined_value,
        priority: row.priority,
        factors,
        computed_at: row.computed_at,
    }
}

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::priority_thresholds;

/// Nanosecond UTC epoch timestamp.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

// ---------------------------------------------------------------------------
// Node metrics
// ---------------------------------------------------------------------------

/// Per-node aggregated window of observed search/traffic performance.
/// Produced by the external metrics sync; read-only inside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub node_id: String,
    /// Average search rank. Nodes never seen in search default to 20.
    pub position: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub sessions: i64,
    pub revenue: f64,
    pub transactions: i64,
}

impl NodeMetrics {
    /// Click-through rate. 0.0 when there are no impressions.
    pub fn ctr(&self) -> f64 {
        if self.impressions > 0 {
            self.clicks as f64 / self.impressions as f64
        } else {
            0.0
        }
    }

    /// Transactions per session. 0.0 when there are no sessions.
    pub fn conversion_rate(&self) -> f64 {
        if self.sessions > 0 {
            self.transactions as f64 / self.sessions as f64
        } else {
            0.0
        }
    }

    /// Revenue per transaction. 0.0 when there are no transactions.
    pub fn average_order_value(&self) -> f64 {
        if self.transactions > 0 {
            self.revenue / self.transactions as f64
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Opportunity score
// ---------------------------------------------------------------------------

/// Normalized factor values, each in [0, 1], before weighting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FactorBreakdown {
    pub search_volume: f64,
    pub ctr_gap: f64,
    pub position_potential: f64,
    pub competition: f64,
    pub revenue_impact: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityScore {
    pub node_id: String,
    /// 0–100 composite opportunity score.
    pub score: u8,
    pub factors: FactorBreakdown,
    pub confidence: f64,
    pub computed_at: i64,
}

// ---------------------------------------------------------------------------
// Revenue projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Conservative,
    Moderate,
    Aggressive,
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::Conservative => "conservative",
            Timeframe::Moderate => "moderate",
            Timeframe::Aggressive => "aggressive",
        };
        write!(f, "{s}")
    }
}

/// How the projected improvement would plausibly be achieved.
/// Informational metadata only; no arithmetic depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImprovementMethod {
    /// Jump of at most 3 positions: on-page tweaks usually suffice.
    Organic,
    /// At most 7 positions: content rework required.
    Content,
    /// At most 15 positions: content plus link building.
    Mixed,
    /// Anything larger: structural/technical work.
    Technical,
}

impl std::fmt::Display for ImprovementMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ImprovementMethod::Organic => "organic",
            ImprovementMethod::Content => "content",
            ImprovementMethod::Mixed => "mixed",
            ImprovementMethod::Technical => "technical",
        };
        write!(f, "{s}")
    }
}

/// Fully-resolved projection assumptions. Defaults are derived from the
/// node's own metrics; see `RevenueCalculator::build_assumptions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assumptions {
    pub target_position: u32,
    pub conversion_rate_improvement: f64,
    pub timeframe: Timeframe,
    pub seasonality_factor: f64,
    pub competition_factor: f64,
}

/// Caller-supplied overrides; any field left `None` takes its derived default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssumptionOverrides {
    pub conversion_rate_improvement: Option<f64>,
    pub timeframe: Option<Timeframe>,
    pub seasonality_factor: Option<f64>,
    pub competition_factor: Option<f64>,
}

/// NodeMetrics-shaped projection at the target position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectedMetrics {
    pub position: f64,
    pub ctr: f64,
    pub clicks: f64,
    pub sessions: f64,
    pub conversion_rate: f64,
    pub transactions: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevenueLift {
    pub additional_clicks: f64,
    pub additional_sessions: f64,
    pub additional_transactions: f64,
    pub monthly_revenue_lift: f64,
    pub annual_revenue_lift: f64,
    pub percentage_increase: f64,
    pub return_on_investment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueProjection {
    pub node_id: String,
    pub current: NodeMetrics,
    pub projected: ProjectedMetrics,
    pub lift: RevenueLift,
    pub confidence: f64,
    pub time_to_impact_weeks: u32,
    pub improvement_method: ImprovementMethod,
    pub assumptions: Assumptions,
    pub calculated_at: i64,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Scoring,
    Revenue,
    FullAnalysis,
}

impl JobType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scoring" => Some(JobType::Scoring),
            "revenue" => Some(JobType::Revenue),
            "full_analysis" => Some(JobType::FullAnalysis),
            _ => None,
        }
    }

    pub fn scores(&self) -> bool {
        matches!(self, JobType::Scoring | JobType::FullAnalysis)
    }

    pub fn projects(&self) -> bool {
        matches!(self, JobType::Revenue | JobType::FullAnalysis)
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::Scoring => "scoring",
            JobType::Revenue => "revenue",
            JobType::FullAnalysis => "full_analysis",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One recorded per-node (or synthetic job-level) failure. Synthetic entries
/// (cancellation, fatal fetch errors) carry an empty node_id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub node_id: String,
    pub message: String,
    pub timestamp: i64,
    pub retry_count: u32,
}

/// Priority label persisted on opportunity records, bucketed from the
/// combined ranking value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
    Minimal,
}

impl Priority {
    pub fn from_combined_value(value: f64) -> Self {
        if value >= priority_thresholds::HIGH_MIN {
            Priority::High
        } else if value >= priority_thresholds::MEDIUM_MIN {
            Priority::Medium
        } else if value >= priority_thresholds::LOW_MIN {
            Priority::Low
        } else {
            Priority::Minimal
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::Minimal => "minimal",
        };
        write!(f, "{s}")
    }
}

/// One row of the ranked output embedded in a completed job's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedOpportunity {
    pub node_id: String,
    pub score: Option<u8>,
    pub monthly_revenue_lift: f64,
    pub combined_value: f64,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultSummary {
    pub successful: i64,
    pub failed: i64,
    pub success_rate: f64,
    pub top_opportunities: Vec<RankedOpportunity>,
}

/// Per-job processing knobs, resolved from config defaults and the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub batch_timeout_secs: u64,
    pub max_retries: u32,
    pub target_position: u32,
    /// Restrict processing to these node ids (retry jobs).
    pub node_filter: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingJob {
    pub id: String,
    pub job_type: JobType,
    pub project_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub total_items: i64,
    pub processed_items: i64,
    pub errors: Vec<JobError>,
    pub result: Option<JobResultSummary>,
    /// Original job id when this is a retry job.
    pub retry_of: Option<String>,
    /// 0 for first runs; incremented on each retry job in the chain.
    pub retry_attempt: u32,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_rates_handle_zero_denominators() {
        let node = NodeMetrics {
            node_id: "n1".to_string(),
            position: 20.0,
            impressions: 0,
            clicks: 0,
            sessions: 0,
            revenue: 0.0,
            transactions: 0,
        };
        assert_eq!(node.ctr(), 0.0);
        assert_eq!(node.conversion_rate(), 0.0);
        assert_eq!(node.average_order_value(), 0.0);
    }

    #[test]
    fn derived_rates_compute_from_components() {
        let node = NodeMetrics {
            node_id: "n1".to_string(),
            position: 5.0,
            impressions: 10_000,
            clicks: 200,
            sessions: 180,
            revenue: 9_000.0,
            transactions: 90,
        };
        assert!((node.ctr() - 0.02).abs() < 1e-12);
        assert!((node.conversion_rate() - 0.5).abs() < 1e-12);
        assert!((node.average_order_value() - 100.0).abs() < 1e-12);
    }

    #[test]
    fn job_type_parse_round_trips() {
        for t in [JobType::Scoring, JobType::Revenue, JobType::FullAnalysis] {
            assert_eq!(JobType::parse(&t.to_string()), Some(t));
        }
        assert_eq!(JobType::parse("streaming"), None);
    }

    #[test]
    fn priority_buckets() {
        assert_eq!(Priority::from_combined_value(82.0), Priority::High);
        assert_eq!(Priority::from_combined_value(55.0), Priority::Medium);
        assert_eq!(Priority::from_combined_value(20.0), Priority::Low);
        assert_eq!(Priority::from_combined_value(3.0), Priority::Minimal);
    }
}

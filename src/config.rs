use crate::error::{AppError, Result};

/// Default batch size for a processing job (nodes per batch).
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default maximum number of batches in flight at once.
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 5;

/// Default per-batch time budget (seconds). A batch exceeding this is
/// recorded as failed in full; other batches continue.
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 300;

/// Default retry budget carried on a job's options.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Batch size for retry jobs; smaller so a recurring bad node re-fails cheaply.
pub const RETRY_BATCH_SIZE: usize = 50;

/// Retry budget for retry jobs.
pub const RETRY_MAX_RETRIES: u32 = 5;

/// Default target search position for revenue projections.
pub const DEFAULT_TARGET_POSITION: u32 = 3;

/// Average search position assumed for nodes with no observed position.
pub const DEFAULT_POSITION: f64 = 20.0;

/// Cap on a job's stored error list to bound row growth on pathological runs.
pub const JOB_ERRORS_CAP: usize = 1000;

/// Top-N ranked opportunities embedded in a completed job's result summary.
pub const RESULT_TOP_N: usize = 20;

/// Opportunity score factor weights. Must sum to 1.0.
pub mod weights {
    pub const SEARCH_VOLUME: f64 = 0.25;
    pub const CTR_GAP: f64 = 0.30;
    pub const POSITION_POTENTIAL: f64 = 0.20;
    pub const COMPETITION: f64 = 0.10;
    pub const REVENUE_IMPACT: f64 = 0.15;
}

/// Combined-value ranking: score and projected-lift shares, and the lift
/// normalization scale (monthly lift at which the lift term saturates).
pub mod ranking {
    pub const SCORE_SHARE: f64 = 0.4;
    pub const LIFT_SHARE: f64 = 0.6;
    pub const LIFT_SCALE: f64 = 100_000.0;
}

/// Stepped cost model for reaching a target position, keyed by the size of
/// the position jump. Nodes already in the top 3 pay double.
pub mod cost {
    pub const JUMP_OVER_15: f64 = 5000.0;
    pub const JUMP_OVER_10: f64 = 3000.0;
    pub const JUMP_OVER_5: f64 = 1500.0;
    pub const JUMP_OVER_3: f64 = 1000.0;
    pub const JUMP_BASE: f64 = 500.0;
    pub const TOP_POSITION_MULTIPLIER: f64 = 2.0;
}

/// Combined-value buckets for the persisted priority label.
pub mod priority_thresholds {
    pub const HIGH_MIN: f64 = 70.0;
    pub const MEDIUM_MIN: f64 = 40.0;
    pub const LOW_MIN: f64 = 15.0;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Nodes per batch (BATCH_SIZE)
    pub batch_size: usize,
    /// Max batches in flight (MAX_CONCURRENT_BATCHES)
    pub max_concurrent_batches: usize,
    /// Per-batch timeout in seconds (BATCH_TIMEOUT_SECS)
    pub batch_timeout_secs: u64,
    /// Target position for projections when a request doesn't override it (TARGET_POSITION)
    pub target_position: u32,
    /// Projects to run a scheduled full analysis for (SCHEDULE_PROJECTS,
    /// comma-separated). Empty disables the scheduler.
    pub schedule_projects: Vec<String>,
    /// Scheduled analysis interval in seconds (SCHEDULE_INTERVAL_SECS)
    pub schedule_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "engine.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            batch_size: std::env::var("BATCH_SIZE")
                .unwrap_or_else(|_| DEFAULT_BATCH_SIZE.to_string())
                .parse::<usize>()
                .unwrap_or(DEFAULT_BATCH_SIZE)
                .max(1),
            max_concurrent_batches: std::env::var("MAX_CONCURRENT_BATCHES")
                .unwrap_or_else(|_| DEFAULT_MAX_CONCURRENT_BATCHES.to_string())
                .parse::<usize>()
                .unwrap_or(DEFAULT_MAX_CONCURRENT_BATCHES)
                .max(1),
            batch_timeout_secs: std::env::var("BATCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| DEFAULT_BATCH_TIMEOUT_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(DEFAULT_BATCH_TIMEOUT_SECS)
                .max(1),
            target_position: std::env::var("TARGET_POSITION")
                .unwrap_or_else(|_| DEFAULT_TARGET_POSITION.to_string())
                .parse::<u32>()
                .unwrap_or(DEFAULT_TARGET_POSITION)
                .max(1),
            schedule_projects: std::env::var("SCHEDULE_PROJECTS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            schedule_interval_secs: std::env::var("SCHEDULE_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse::<u64>()
                .unwrap_or(3600)
                .max(60),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::weights;

    #[test]
    fn factor_weights_sum_to_one() {
        let sum = weights::SEARCH_VOLUME
            + weights::CTR_GAP
            + weights::POSITION_POTENTIAL
            + weights::COMPETITION
            + weights::REVENUE_IMPACT;
        assert!((sum - 1.0).abs() < 1e-9, "weights sum to {sum}");
    }
}

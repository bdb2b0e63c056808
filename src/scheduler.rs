use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::config::Config;
use crate::db::Store;
use crate::pipeline::BatchProcessor;
use crate::types::JobType;

/// Background task that kicks off a full analysis for each configured
/// project on a fixed interval. A project with a job still pending or
/// processing is skipped until the next tick.
pub struct AnalysisScheduler {
    cfg: Config,
    store: Store,
    processor: Arc<BatchProcessor>,
}

impl AnalysisScheduler {
    pub fn new(cfg: Config, store: Store, processor: Arc<BatchProcessor>) -> Self {
        Self {
            cfg,
            store,
            processor,
        }
    }

    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.cfg.schedule_interval_secs));
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            for project_id in &self.cfg.schedule_projects {
                match self.store.has_active_job(project_id).await {
                    Ok(true) => {
                        info!("Project {project_id} already has an active job; skipping tick");
                    }
                    Ok(false) => {
                        match Arc::clone(&self.processor)
                            .create_job(JobType::FullAnalysis, project_id, None)
                            .await
                        {
                            Ok(job) => info!(
                                "Scheduled full analysis {} for project {project_id}",
                                job.id
                            ),
                            Err(e) => {
                                error!("Could not schedule analysis for {project_id}: {e}");
                            }
                        }
                    }
                    Err(e) => error!("Active-job check failed for {project_id}: {e}"),
                }
            }
        }
    }
}

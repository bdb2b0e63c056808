//! Read side of the external metrics store. The sync process that populates
//! `node_metrics` is a separate system; the engine only ever reads.

use async_trait::async_trait;

use crate::config::DEFAULT_POSITION;
use crate::db::models::NodeMetricsRow;
use crate::error::Result;
use crate::types::NodeMetrics;

#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// All nodes of a project, ordered by hierarchy depth ascending.
    /// Ordering is a processing preference, not a correctness requirement.
    async fn project_nodes(&self, project_id: &str) -> Result<Vec<NodeMetrics>>;
}

pub struct SqliteMetricsRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteMetricsRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsRepository for SqliteMetricsRepository {
    async fn project_nodes(&self, project_id: &str) -> Result<Vec<NodeMetrics>> {
        let rows = sqlx::query_as::<_, NodeMetricsRow>(
            r#"
            SELECT node_id, position, impressions, clicks, sessions, revenue, transactions
            FROM node_metrics
            WHERE project_id = ?
            ORDER BY depth ASC, node_id ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| NodeMetrics {
                node_id: r.node_id,
                position: r.position.unwrap_or(DEFAULT_POSITION),
                impressions: r.impressions,
                clicks: r.clicks,
                sessions: r.sessions,
                revenue: r.revenue,
                transactions: r.transactions,
            })
            .collect())
    }
}

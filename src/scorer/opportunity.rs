use crate::calculator::sample_size_discount;
use crate::config::weights;
use crate::scorer::ctr_curve::{competition_factor, expected_ctr};
use crate::types::{now_ns, FactorBreakdown, NodeMetrics, OpportunityScore};

/// Position beyond which a node has no realistic ranking upside.
const POSITION_CEILING: f64 = 20.0;

/// Immutable per-run normalization context: reference maxima over the node
/// set being scored. Injected rather than global so the scorer stays pure.
#[derive(Debug, Clone, Copy)]
pub struct BatchContext {
    pub max_impressions: i64,
    pub max_revenue: f64,
}

impl BatchContext {
    pub fn from_nodes(nodes: &[NodeMetrics]) -> Self {
        Self {
            max_impressions: nodes.iter().map(|n| n.impressions).max().unwrap_or(0),
            max_revenue: nodes.iter().map(|n| n.revenue).fold(0.0, f64::max),
        }
    }
}

/// Factor weights injected at construction. Must sum to 1.0.
#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub search_volume: f64,
    pub ctr_gap: f64,
    pub position_potential: f64,
    pub competition: f64,
    pub revenue_impact: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            search_volume: weights::SEARCH_VOLUME,
            ctr_gap: weights::CTR_GAP,
            position_potential: weights::POSITION_POTENTIAL,
            competition: weights::COMPETITION,
            revenue_impact: weights::REVENUE_IMPACT,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.search_volume
            + self.ctr_gap
            + self.position_potential
            + self.competition
            + self.revenue_impact
    }
}

/// Computes a 0–100 opportunity score per node from weighted normalized
/// factors. Pure: no I/O, no shared mutable state.
#[derive(Debug, Clone)]
pub struct OpportunityScorer {
    weights: ScoringWeights,
}

impl Default for OpportunityScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl OpportunityScorer {
    pub fn new() -> Self {
        Self::with_weights(ScoringWeights::default())
    }

    pub fn with_weights(weights: ScoringWeights) -> Self {
        debug_assert!((weights.sum() - 1.0).abs() < 1e-9, "weights must sum to 1.0");
        Self { weights }
    }

    pub fn score(&self, node: &NodeMetrics, ctx: &BatchContext) -> OpportunityScore {
        // Nothing observed at all: a valid zero result, not a fault.
        if node.impressions == 0 && node.sessions == 0 {
            return OpportunityScore {
                node_id: node.node_id.clone(),
                score: 0,
                factors: FactorBreakdown::default(),
                confidence: 0.0,
                computed_at: now_ns(),
            };
        }

        let factors = FactorBreakdown {
            search_volume: search_volume_factor(node.impressions, ctx.max_impressions),
            ctr_gap: ctr_gap_factor(node),
            position_potential: position_potential_factor(node.position),
            competition: competition_factor(node.ctr(), expected_ctr(node.position)),
            revenue_impact: revenue_impact_factor(node.revenue, ctx.max_revenue),
        };

        let weighted = self.weights.search_volume * factors.search_volume
            + self.weights.ctr_gap * factors.ctr_gap
            + self.weights.position_potential * factors.position_potential
            + self.weights.competition * factors.competition
            + self.weights.revenue_impact * factors.revenue_impact;

        let score = (weighted * 100.0).round().clamp(0.0, 100.0) as u8;
        let confidence = sample_size_discount(node.impressions, node.transactions).clamp(0.1, 1.0);

        OpportunityScore {
            node_id: node.node_id.clone(),
            score,
            factors,
            confidence,
            computed_at: now_ns(),
        }
    }
}

/// Logarithmic normalization of impressions against the batch maximum, so
/// large-traffic nodes don't dominate linearly.
fn search_volume_factor(impressions: i64, max_impressions: i64) -> f64 {
    if impressions <= 0 || max_impressions <= 0 {
        return 0.0;
    }
    let normalized = ((impressions as f64) + 1.0).ln() / ((max_impressions as f64) + 1.0).ln();
    normalized.clamp(0.0, 1.0)
}

/// How far the node's observed CTR falls below the expected curve at its
/// position. Positions below 1 are invalid input and contribute no gap.
fn ctr_gap_factor(node: &NodeMetrics) -> f64 {
    if node.position < 1.0 {
        return 0.0;
    }
    let expected = expected_ctr(node.position);
    if expected <= 0.0 {
        return 0.0;
    }
    ((expected - node.ctr()) / expected).clamp(0.0, 1.0)
}

/// Remaining ranking headroom: linear in position within [1, 20], zero outside.
fn position_potential_factor(position: f64) -> f64 {
    if (1.0..=POSITION_CEILING).contains(&position) {
        (POSITION_CEILING - position) / POSITION_CEILING
    } else {
        0.0
    }
}

/// Node revenue normalized against the batch maximum.
fn revenue_impact_factor(revenue: f64, max_revenue: f64) -> f64 {
    if revenue <= 0.0 || max_revenue <= 0.0 {
        return 0.0;
    }
    (revenue / max_revenue).clamp(0.0, 1.0)
}

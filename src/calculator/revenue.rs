//! Revenue projection model: given a node's current metrics and a target
//! search position, projects clicks/sessions/transactions/revenue and derives
//! a lift estimate with a bounded confidence value. Heuristic, not a forecast.

use crate::config::cost;
use crate::scorer::ctr_curve::{competition_factor, expected_ctr};
use crate::types::{
    now_ns, Assumptions, AssumptionOverrides, ImprovementMethod, NodeMetrics, ProjectedMetrics,
    RevenueLift, RevenueProjection, Timeframe,
};

/// Below both thresholds a node is treated as having no usable data.
const MIN_IMPRESSIONS: i64 = 10;
const MIN_SESSIONS: i64 = 5;

/// Sessions-per-click ratio assumed when a node has impressions but no
/// recorded clicks yet.
const FALLBACK_SESSION_RATIO: f64 = 0.9;

/// Shared sample-size confidence policy: multiplicative discounts for thin
/// impression and transaction counts. Reused by the opportunity scorer.
pub fn sample_size_discount(impressions: i64, transactions: i64) -> f64 {
    let mut discount = 1.0;
    if impressions < 100 {
        discount *= 0.5;
    } else if impressions < 1000 {
        discount *= 0.75;
    }
    if transactions < 5 {
        discount *= 0.5;
    } else if transactions < 20 {
        discount *= 0.75;
    }
    discount
}

/// Projects node metrics at a target position. Pure given its inputs:
/// default assumptions are derived from the node itself, so behavior is
/// deterministic per input.
#[derive(Debug, Clone, Default)]
pub struct RevenueCalculator;

impl RevenueCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn project(
        &self,
        node: &NodeMetrics,
        target_position: u32,
        overrides: Option<&AssumptionOverrides>,
    ) -> RevenueProjection {
        let assumptions = build_assumptions(node, target_position, overrides);
        let position_jump = node.position - target_position as f64;

        // Too thin to project from. A valid zero result, never a fault.
        if node.impressions <= MIN_IMPRESSIONS && node.sessions <= MIN_SESSIONS {
            return RevenueProjection {
                node_id: node.node_id.clone(),
                current: node.clone(),
                projected: ProjectedMetrics {
                    position: target_position as f64,
                    ..ProjectedMetrics::default()
                },
                lift: RevenueLift::default(),
                confidence: 0.0,
                time_to_impact_weeks: time_to_impact_weeks(position_jump),
                improvement_method: improvement_method(position_jump),
                assumptions,
                calculated_at: now_ns(),
            };
        }

        let projected_ctr = expected_ctr(target_position as f64) * assumptions.competition_factor;
        let projected_clicks = node.impressions as f64 * projected_ctr;
        let session_ratio = if node.clicks > 0 {
            node.sessions as f64 / node.clicks as f64
        } else {
            FALLBACK_SESSION_RATIO
        };
        let projected_sessions = projected_clicks * session_ratio;
        let projected_conversion_rate =
            node.conversion_rate() * (1.0 + assumptions.conversion_rate_improvement);
        let projected_transactions = projected_sessions * projected_conversion_rate;
        // AOV held constant: the model does not assume price changes.
        let projected_revenue = projected_transactions * node.average_order_value();

        let monthly_revenue_lift =
            (projected_revenue - node.revenue) * assumptions.seasonality_factor;
        let annual_revenue_lift = monthly_revenue_lift * 12.0;
        let percentage_increase = if node.revenue > 0.0 {
            (projected_revenue - node.revenue) / node.revenue * 100.0
        } else if projected_revenue > 0.0 {
            100.0
        } else {
            0.0
        };
        let estimated_cost = estimated_cost(node.position, position_jump);
        let return_on_investment = annual_revenue_lift / estimated_cost * 100.0;

        let lift = RevenueLift {
            additional_clicks: projected_clicks - node.clicks as f64,
            additional_sessions: projected_sessions - node.sessions as f64,
            additional_transactions: projected_transactions - node.transactions as f64,
            monthly_revenue_lift,
            annual_revenue_lift,
            percentage_increase,
            return_on_investment,
        };

        let confidence = confidence(node, position_jump, assumptions.timeframe);

        RevenueProjection {
            node_id: node.node_id.clone(),
            current: node.clone(),
            projected: ProjectedMetrics {
                position: target_position as f64,
                ctr: projected_ctr,
                clicks: projected_clicks,
                sessions: projected_sessions,
                conversion_rate: projected_conversion_rate,
                transactions: projected_transactions,
                revenue: projected_revenue,
            },
            lift,
            confidence,
            time_to_impact_weeks: time_to_impact_weeks(position_jump),
            improvement_method: improvement_method(position_jump),
            assumptions,
            calculated_at: now_ns(),
        }
    }
}

/// Resolve assumptions from overrides, falling back to values derived from
/// the node's own metrics.
fn build_assumptions(
    node: &NodeMetrics,
    target_position: u32,
    overrides: Option<&AssumptionOverrides>,
) -> Assumptions {
    let conversion_rate_improvement = overrides
        .and_then(|o| o.conversion_rate_improvement)
        .unwrap_or_else(|| conversion_headroom(node.conversion_rate()));
    let competition = overrides
        .and_then(|o| o.competition_factor)
        .unwrap_or_else(|| competition_factor(node.ctr(), expected_ctr(node.position)));
    Assumptions {
        target_position,
        conversion_rate_improvement,
        timeframe: overrides.and_then(|o| o.timeframe).unwrap_or(Timeframe::Moderate),
        seasonality_factor: overrides.and_then(|o| o.seasonality_factor).unwrap_or(1.0),
        competition_factor: competition,
    }
}

/// Assumed conversion-rate headroom: very low rates get larger assumed upside.
fn conversion_headroom(conversion_rate: f64) -> f64 {
    if conversion_rate < 0.005 {
        0.50
    } else if conversion_rate < 0.01 {
        0.30
    } else if conversion_rate < 0.02 {
        0.15
    } else {
        0.05
    }
}

/// Stepped cost of reaching the target, keyed by the position jump.
/// Nodes already in the top 3 pay double.
fn estimated_cost(current_position: f64, position_jump: f64) -> f64 {
    let base = if position_jump > 15.0 {
        cost::JUMP_OVER_15
    } else if position_jump > 10.0 {
        cost::JUMP_OVER_10
    } else if position_jump > 5.0 {
        cost::JUMP_OVER_5
    } else if position_jump > 3.0 {
        cost::JUMP_OVER_3
    } else {
        cost::JUMP_BASE
    };
    if current_position <= 3.0 {
        base * cost::TOP_POSITION_MULTIPLIER
    } else {
        base
    }
}

/// Multiplicative confidence discounts, clamped to [0.1, 1.0].
fn confidence(node: &NodeMetrics, position_jump: f64, timeframe: Timeframe) -> f64 {
    let mut c = 1.0;
    if position_jump > 15.0 {
        c *= 0.5;
    } else if position_jump > 10.0 {
        c *= 0.7;
    } else if position_jump > 5.0 {
        c *= 0.85;
    }
    c *= sample_size_discount(node.impressions, node.transactions);
    match timeframe {
        Timeframe::Aggressive => c *= 0.7,
        Timeframe::Conservative => c *= 1.1,
        Timeframe::Moderate => {}
    }
    c.clamp(0.1, 1.0)
}

fn time_to_impact_weeks(position_jump: f64) -> u32 {
    if position_jump <= 0.0 {
        0
    } else if position_jump <= 3.0 {
        2
    } else if position_jump <= 7.0 {
        4
    } else if position_jump <= 15.0 {
        8
    } else {
        12
    }
}

fn improvement_method(position_jump: f64) -> ImprovementMethod {
    if position_jump <= 3.0 {
        ImprovementMethod::Organic
    } else if position_jump <= 7.0 {
        ImprovementMethod::Content
    } else if position_jump <= 15.0 {
        ImprovementMethod::Mixed
    } else {
        ImprovementMethod::Technical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(position: f64, impressions: i64, clicks: i64, sessions: i64, revenue: f64, transactions: i64) -> NodeMetrics {
        NodeMetrics {
            node_id: "n1".to_string(),
            position,
            impressions,
            clicks,
            sessions,
            revenue,
            transactions,
        }
    }

    #[test]
    fn no_data_projection_is_zero_valued() {
        let calc = RevenueCalculator::new();
        let p = calc.project(&node(20.0, 5, 0, 2, 0.0, 0), 3, None);
        assert_eq!(p.confidence, 0.0);
        assert_eq!(p.lift.monthly_revenue_lift, 0.0);
        assert_eq!(p.lift.annual_revenue_lift, 0.0);
        assert_eq!(p.projected.revenue, 0.0);
        assert_eq!(p.projected.position, 3.0);
    }

    #[test]
    fn projected_position_always_equals_target() {
        let calc = RevenueCalculator::new();
        for target in [1, 3, 5, 10, 15] {
            let p = calc.project(&node(12.0, 5_000, 40, 35, 700.0, 10), target, None);
            assert_eq!(p.projected.position, target as f64);
            assert_eq!(p.assumptions.target_position, target);
        }
    }

    #[test]
    fn annual_lift_is_exactly_twelve_months() {
        let calc = RevenueCalculator::new();
        let p = calc.project(&node(8.0, 20_000, 300, 280, 14_000.0, 120), 2, None);
        assert_eq!(p.lift.annual_revenue_lift, p.lift.monthly_revenue_lift * 12.0);
    }

    #[test]
    fn worked_projection_scenario() {
        // position 5 → target 3: expected CTR 0.094, competition bucket 0.7
        let calc = RevenueCalculator::new();
        let p = calc.project(&node(5.0, 10_000, 200, 180, 9_000.0, 90), 3, None);

        assert!((p.projected.ctr - 0.094 * 0.7).abs() < 1e-12);
        assert!((p.projected.clicks - 658.0).abs() < 1e-9);
        assert!((p.projected.sessions - 592.2).abs() < 1e-9);
        // conversion 0.5 → 5% headroom tier
        assert!((p.assumptions.conversion_rate_improvement - 0.05).abs() < 1e-12);
        assert!((p.projected.conversion_rate - 0.525).abs() < 1e-12);
        assert!((p.projected.revenue - 31_090.5).abs() < 1e-6);
        assert!((p.lift.monthly_revenue_lift - 22_090.5).abs() < 1e-6);
        assert_eq!(p.confidence, 1.0);
        assert_eq!(p.time_to_impact_weeks, 2);
        assert_eq!(p.improvement_method, ImprovementMethod::Organic);
        // jump of 2 costs the base 500; ROI = annual / 500 × 100
        assert!((p.lift.return_on_investment - 22_090.5 * 12.0 / 500.0 * 100.0).abs() < 1e-6);
    }

    #[test]
    fn conversion_headroom_tiers() {
        assert_eq!(conversion_headroom(0.001), 0.50);
        assert_eq!(conversion_headroom(0.007), 0.30);
        assert_eq!(conversion_headroom(0.015), 0.15);
        assert_eq!(conversion_headroom(0.05), 0.05);
    }

    #[test]
    fn top_positions_cost_double() {
        assert_eq!(estimated_cost(2.0, 1.0), 1000.0);
        assert_eq!(estimated_cost(5.0, 2.0), 500.0);
        assert_eq!(estimated_cost(20.0, 17.0), 5000.0);
        assert_eq!(estimated_cost(14.0, 11.0), 3000.0);
        assert_eq!(estimated_cost(9.0, 6.0), 1500.0);
        assert_eq!(estimated_cost(8.0, 4.0), 1000.0);
    }

    #[test]
    fn confidence_stays_clamped() {
        let calc = RevenueCalculator::new();
        // Huge jump, thin data, aggressive timeframe: many discounts stack.
        let overrides = AssumptionOverrides {
            timeframe: Some(Timeframe::Aggressive),
            ..AssumptionOverrides::default()
        };
        let p = calc.project(&node(20.0, 50, 2, 40, 30.0, 1), 1, Some(&overrides));
        assert!(p.confidence >= 0.1 && p.confidence <= 1.0);
        assert!((p.confidence - 0.1).abs() < 1e-12, "confidence={}", p.confidence);

        // Conservative bonus never pushes past 1.0.
        let conservative = AssumptionOverrides {
            timeframe: Some(Timeframe::Conservative),
            ..AssumptionOverrides::default()
        };
        let p = calc.project(&node(4.0, 50_000, 900, 850, 90_000.0, 400), 3, Some(&conservative));
        assert_eq!(p.confidence, 1.0);
    }

    #[test]
    fn time_to_impact_steps() {
        assert_eq!(time_to_impact_weeks(-2.0), 0);
        assert_eq!(time_to_impact_weeks(0.0), 0);
        assert_eq!(time_to_impact_weeks(2.5), 2);
        assert_eq!(time_to_impact_weeks(6.0), 4);
        assert_eq!(time_to_impact_weeks(12.0), 8);
        assert_eq!(time_to_impact_weeks(16.0), 12);
    }

    #[test]
    fn improvement_method_classification() {
        assert_eq!(improvement_method(2.0), ImprovementMethod::Organic);
        assert_eq!(improvement_method(5.0), ImprovementMethod::Content);
        assert_eq!(improvement_method(10.0), ImprovementMethod::Mixed);
        assert_eq!(improvement_method(18.0), ImprovementMethod::Technical);
    }

    #[test]
    fn zero_click_nodes_use_fallback_session_ratio() {
        let calc = RevenueCalculator::new();
        let p = calc.project(&node(15.0, 2_000, 0, 10, 0.0, 0), 5, None);
        assert!((p.projected.sessions - p.projected.clicks * 0.9).abs() < 1e-9);
    }

    #[test]
    fn zero_revenue_with_projected_gain_reports_full_percentage() {
        let calc = RevenueCalculator::new();
        // Sessions and conversions exist but revenue was never attributed.
        let n = node(12.0, 5_000, 80, 70, 0.0, 3);
        let p = calc.project(&n, 3, None);
        // AOV is 0 here, so projected revenue is 0 and percentage stays 0.
        assert_eq!(p.lift.percentage_increase, 0.0);
    }
}

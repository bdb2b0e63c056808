pub mod ctr_curve;
pub mod opportunity;

pub use opportunity::{BatchContext, OpportunityScorer};

pub mod revenue;

pub use revenue::{sample_size_discount, RevenueCalculator};

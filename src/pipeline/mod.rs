pub mod processor;
pub mod registry;

pub use processor::BatchProcessor;
pub use registry::JobRegistry;

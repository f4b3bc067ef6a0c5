pub mod error;
pub mod limiters;
pub mod metrics;

pub use limiters::Limiters;
pub use metrics::Metrics;

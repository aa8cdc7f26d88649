pub mod comparator;
pub mod config;
pub mod images;
pub mod metrics;
pub mod orchestrator;
pub mod outcome;
pub mod packager;
pub mod pool;
pub mod runtime;

mod docker_tests;

pub use comparator::compare;
pub use config::EngineConfig;
pub use metrics::{MetricsRecorder, MetricsStore};
pub use orchestrator::Orchestrator;
pub use pool::WarmPool;

pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod scheduler;

pub use executor::{spawn_executor, DryRunExecutor, ExecutionPlan, ExecutorHandle, OpportunityExecutor};
pub use metrics::SearchMetrics;
pub use orchestrator::Searcher;
pub use pipeline::{BlockPipeline, PipelineSettings};
pub use scheduler::{BlockScheduler, PassEvent, PassSummary};

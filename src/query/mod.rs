pub mod client;
pub mod pipeline;

pub use client::{QueryHandle, QueryResponse, QuerySink};
pub use pipeline::{PipelineConfig, QueryPipeline};

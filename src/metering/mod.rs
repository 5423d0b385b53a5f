//! Usage metering: access-log ingestion, batching and flush scheduling

pub mod buffer;
pub mod ingest;
pub mod scheduler;
pub mod stats;

pub use buffer::BatchBuffer;
pub use ingest::{decode_ndjson, extract_usage_event, IngestError, IngestSummary, Ingestor, LogBatch};
pub use scheduler::{FlushScheduler, MeteringPipeline};
pub use stats::{PipelineStats, PipelineStatsSnapshot};

//! Trace Ingest
//!
//! A two-phase tokenize/sort/parse ingestion core for binary trace streams
//! produced by many independent sources.
//!
//! The tokenize phase runs in arrival order: it decodes packet envelopes,
//! maintains per-sequence incremental state as a chain of copy-on-write
//! generations, and dispatches payload fields to registered modules. Units
//! are compacted into a bump-allocated token buffer while they wait in the
//! sorter. The parse phase runs in global timestamp order, fanning each
//! unit out to every interested module with the generation snapshot that
//! was current when it was tokenized.
//!
//! Malformed input never aborts ingestion: recoverable anomalies increment
//! named diagnostic counters and the run continues.

pub mod modules;
pub mod pipeline;
pub mod sequence;
pub mod sorter;
pub mod stats;
pub mod streams;
pub mod token_buffer;
pub mod trackers;
pub mod utils;
pub mod wire;

pub use modules::{ModuleResult, TraceModule};
pub use pipeline::{IngestPipeline, PipelineConfig};
pub use wire::TraceBlob;

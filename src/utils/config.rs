//! Configuration and constants for the ingestion core.

/// Size of one token buffer arena chunk.
pub const TOKEN_BUFFER_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound on an entry's encoded size. Used to decide when the current
/// arena chunk must be sealed before an append.
pub const TOKEN_BUFFER_MAX_ENTRY_SIZE: usize = 96;

/// Maximum number of extra counter values a tokenized packet may carry.
/// The descriptor encodes the count in 3 bits; exceeding this cap is a
/// producer bug, not representable input.
pub const MAX_EXTRA_COUNTERS: usize = 4;

/// How many recently interned generations the token buffer scans before
/// appending a new owned generation reference.
pub const GENERATION_LOOKBACK: usize = 16;

/// Widest backing-buffer offset delta that can be stored against an already
/// interned buffer. Larger deltas fall back to a new owned reference.
pub const MAX_INTERNED_OFFSET_DELTA: u64 = u16::MAX as u64;

/// Field numbers at or above this threshold are dynamically registered
/// extensions rather than statically known envelope fields.
pub const MIN_DYNAMIC_FIELD_ID: u32 = 64;

/// Default out-of-order window for the bounded-latency sorter flush, in
/// nanoseconds. Events older than (max seen timestamp - window) may be
/// flushed to the parse phase before end of file.
pub const DEFAULT_SORTER_WINDOW_NS: i64 = 500_000_000;

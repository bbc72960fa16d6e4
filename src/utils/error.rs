//! Error types for the ingestion core.
//!
//! We use `thiserror` for library-style errors with custom types.
//! Recoverable trace-content anomalies are *not* modeled as errors at the
//! API boundary: they increment a named diagnostic counter and ingestion
//! continues. Only wire framing failures surface as values, and the
//! drivers degrade those to counters too.

use thiserror::Error;

/// Errors that can occur while decoding the tag-length-value wire format
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("varint does not fit in 64 bits")]
    VarintOverflow,

    #[error("truncated varint at offset {0}")]
    TruncatedVarint(usize),

    #[error("field payload runs past end of message (need {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    #[error("unsupported wire type {0}")]
    UnsupportedWireType(u8),

    #[error("field id zero is reserved")]
    ZeroFieldId,
}

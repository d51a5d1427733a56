//! Output types for a single receipt extraction.

use crate::pipeline::normalize::Strategy;
use crate::record::ReceiptRecord;
use serde::Serialize;

/// Result of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionOutput {
    /// Canonical record.
    pub record: ReceiptRecord,
    /// Model reply exactly as received, for diagnostics.
    pub raw_text: String,
    /// Which normalizer strategy produced the candidate mapping.
    pub strategy: Strategy,
    pub stats: ExtractionStats,
}

/// Timing and token bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    /// Endpoint or provider that answered.
    pub endpoint: String,
    /// Prompt tokens, when the upstream reports usage.
    pub input_tokens: Option<u64>,
    /// Completion tokens, when the upstream reports usage.
    pub output_tokens: Option<u64>,
    /// Size of the base64 payload sent.
    pub encoded_bytes: usize,
    pub transport_duration_ms: u64,
    pub total_duration_ms: u64,
}

//! Error types for the edgequake-receipt library.
//!
//! Every failure of the extraction pipeline is surfaced as a distinct
//! [`ReceiptError`] variant. None of them is ever folded into an empty
//! [`crate::record::ReceiptRecord`]: an all-absent record returned as success
//! would be indistinguishable from a receipt that genuinely lacks those fields.
//!
//! The variants follow the pipeline stages:
//!
//! * configuration: caught before any I/O
//! * encoding: the image could not be read or is not a supported format
//! * transport: connection, timeout, and classified non-2xx HTTP replies
//! * normalization: the model replied, but nothing structured was in it
//!
//! Messages are diagnostic, not user-facing prose. Callers (the `receipt2json`
//! binary included) translate variants into their own wording.

use thiserror::Error;

/// All errors returned by the edgequake-receipt library.
#[derive(Debug, Error)]
pub enum ReceiptError {
    // ── Configuration ─────────────────────────────────────────────────────
    /// Missing credentials, empty endpoint list, malformed URL, or an
    /// out-of-range builder value. Always raised before a network call.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // ── Encoding ──────────────────────────────────────────────────────────
    /// The image could not be read, or its bytes are not a supported format.
    #[error("Cannot encode image '{input}': {reason}")]
    Encoding { input: String, reason: String },

    // ── Transport ─────────────────────────────────────────────────────────
    /// Connection-level failure (DNS, refused, TLS, relay down).
    #[error("Transport failure talking to {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    /// The call exceeded the configured bound and was cancelled.
    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// HTTP 401 / 403.
    #[error("Authentication rejected by {endpoint} (HTTP {status}): {body}")]
    Auth {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// HTTP 429. `retry_after_secs` comes from the `Retry-After` header.
    #[error("Rate limited by {endpoint} (HTTP {status}): {body}")]
    RateLimit {
        endpoint: String,
        status: u16,
        body: String,
        retry_after_secs: Option<u64>,
    },

    /// Any other non-2xx reply, or a 2xx body that is not the expected shape.
    #[error("Upstream error from {endpoint} (HTTP {status}): {body}")]
    Upstream {
        endpoint: String,
        status: u16,
        body: String,
    },

    // ── Normalization ─────────────────────────────────────────────────────
    /// The model reply contains no extractable field.
    #[error("Model reply contains no extractable fields: {reason}")]
    Normalization { reason: String, excerpt: String },
}

impl ReceiptError {
    /// Whether re-invoking the whole pipeline might succeed.
    ///
    /// The library itself never retries; this is a hint for callers.
    pub fn is_transient(&self) -> bool {
        match self {
            ReceiptError::Transport { .. }
            | ReceiptError::Timeout { .. }
            | ReceiptError::RateLimit { .. } => true,
            ReceiptError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Build a `Normalization` error keeping a bounded excerpt of the reply.
    pub(crate) fn normalization(reason: impl Into<String>, raw: &str) -> Self {
        ReceiptError::Normalization {
            reason: reason.into(),
            excerpt: excerpt(raw, 200),
        }
    }
}

/// First `max_chars` characters of `text`, with an ellipsis if cut.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}

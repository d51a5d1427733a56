//! # edgequake-receipt
//!
//! Extract structured fields from photographed bank-transfer receipts with a
//! Vision Language Model.
//!
//! One image in, one [`ReceiptRecord`] out: amount, deposit identifier,
//! tracking code, reference number, bank name, date and time. Digits are
//! carried through exactly as the model read them (no numeric parsing, no
//! transliteration), and a field the receipt does not show stays
//! [`FieldValue::Absent`] instead of being guessed.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image bytes
//!  │
//!  ├─ 1. Encode     sniff media type, base64 (data URI or bare)
//!  ├─ 2. Request    extraction instruction + image + generation params
//!  ├─ 3. Transport  one bounded call: HTTP endpoints or edgequake-llm provider
//!  ├─ 4. Normalize  JSON object first, labelled lines as fallback
//!  └─ 5. Reconcile  aliases, digit cleanup, identifier tie-break, modes
//! ```
//!
//! Every failure is a typed [`ReceiptError`]; an all-absent record is never
//! used to signal an error.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_receipt::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .api_key(std::env::var("RECEIPT_API_KEY")?)
//!         .build()?;
//!     let output = extract("receipt.jpg", &config).await?;
//!     println!("amount: {}", output.record.amount());
//!     println!("reference: {}", output.record.reference_number());
//!     Ok(())
//! }
//! ```
//!
//! To go through a named `edgequake-llm` provider instead of a raw HTTP
//! endpoint, set `.provider_name("anthropic")` (key read from the provider's
//! usual environment variable).
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt2json` binary (clap + anyhow + indicatif + futures + tracing-subscriber) |
//!
//! ```toml
//! edgequake-receipt = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Endpoint, ExtractionConfig, ExtractionConfigBuilder, FailoverPolicy, WireFormat,
};
pub use error::ReceiptError;
pub use extract::{extract, extract_from_bytes, extract_sync, Extractor};
pub use output::{ExtractionOutput, ExtractionStats};
pub use pipeline::normalize::{normalize, Strategy};
pub use pipeline::reconcile::reconcile;
pub use pipeline::request::ExtractionRequest;
pub use pipeline::transport::{HttpTransport, ProviderTransport, Transport, TransportReply};
pub use record::{CandidateFields, FieldValue, ReceiptRecord};
pub use schema::{BankMode, DepositMode, FieldSchema, OutputFormat, PresenceTokens, ReceiptField};

//! Pipeline stages for receipt extraction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own. Only [`transport`] performs network I/O.
//!
//! ## Data Flow
//!
//! ```text
//! encode ──▶ request ──▶ transport ──▶ normalize ──▶ reconcile
//! (base64)   (prompt)    (VLM call)    (candidates)  (ReceiptRecord)
//! ```
//!
//! 1. [`encode`]: sniff the media type and base64-wrap the image bytes
//! 2. [`request`]: instruction + image + generation parameters, rendered
//!    per wire dialect
//! 3. [`transport`]: one bounded call against the configured endpoints or
//!    an `edgequake-llm` provider
//! 4. [`normalize`]: JSON strategy first, labelled lines as fallback
//! 5. [`reconcile`]: aliases, digit cleanup, identifier tie-break, modes

pub mod encode;
pub mod normalize;
pub mod reconcile;
pub mod request;
pub mod transport;

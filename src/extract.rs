//! Extraction entry points.
//!
//! [`Extractor`] resolves its transport once and can then be reused for any
//! number of images; every call is an independent pipeline invocation with no
//! shared mutable state, so one `Extractor` may be driven concurrently. The
//! free functions are one-shot conveniences that build an `Extractor` per call.

use crate::config::ExtractionConfig;
use crate::error::ReceiptError;
use crate::output::{ExtractionOutput, ExtractionStats};
use crate::pipeline::encode::{self, EncodedImage};
use crate::pipeline::normalize::normalize_detailed;
use crate::pipeline::reconcile::reconcile;
use crate::pipeline::request::ExtractionRequest;
use crate::pipeline::transport::{resolve_transport, Transport};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A configured, reusable extraction pipeline.
#[derive(Clone)]
pub struct Extractor {
    config: ExtractionConfig,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Extractor {
    /// Build an extractor, resolving the transport from `config`.
    ///
    /// Fails with [`ReceiptError::Configuration`] before any network I/O when
    /// credentials or endpoints are unusable.
    pub fn new(config: ExtractionConfig) -> Result<Self, ReceiptError> {
        let transport = resolve_transport(&config)?;
        Ok(Self { config, transport })
    }

    /// Build an extractor around a caller-supplied transport.
    pub fn with_transport(config: ExtractionConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Read, encode and extract one image file.
    pub async fn extract_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ExtractionOutput, ReceiptError> {
        let path = path.as_ref();
        info!("Extracting receipt: {}", path.display());
        let image = encode::encode_file(path).await?;
        self.extract_encoded(image).await
    }

    /// Extract from in-memory image bytes. `label` names the input in errors.
    pub async fn extract_bytes(
        &self,
        bytes: &[u8],
        label: &str,
    ) -> Result<ExtractionOutput, ReceiptError> {
        let image = encode::encode_bytes(bytes, label)?;
        self.extract_encoded(image).await
    }

    /// Run the remaining stages on an already-encoded image.
    pub async fn extract_encoded(
        &self,
        image: EncodedImage,
    ) -> Result<ExtractionOutput, ReceiptError> {
        let total_start = Instant::now();
        let encoded_bytes = image.base64().len();

        // ── Step 1: Compose request ──────────────────────────────────────
        let request = ExtractionRequest::build(image, &self.config);

        // ── Step 2: One bounded model call ───────────────────────────────
        let transport_start = Instant::now();
        let reply = self.transport.send(&request).await?;
        let transport_duration_ms = transport_start.elapsed().as_millis() as u64;
        debug!(
            "Reply from {} in {}ms ({} chars)",
            reply.endpoint,
            transport_duration_ms,
            reply.text.chars().count()
        );

        // ── Step 3: Normalize ────────────────────────────────────────────
        let normalized = normalize_detailed(&reply.text)?;

        // ── Step 4: Reconcile ────────────────────────────────────────────
        let record = reconcile(&normalized.fields, &self.config.schema);
        if record.is_empty() {
            warn!("Reply parsed but every field is absent");
        }

        let stats = ExtractionStats {
            endpoint: reply.endpoint,
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            encoded_bytes,
            transport_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Extraction complete via {:?} strategy, {}ms total",
            normalized.strategy, stats.total_duration_ms
        );

        Ok(ExtractionOutput {
            record,
            raw_text: reply.text,
            strategy: normalized.strategy,
            stats,
        })
    }
}

/// Extract a receipt from an image file.
///
/// ```rust,no_run
/// use edgequake_receipt::{extract, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::builder().api_key("sk-...").build()?;
/// let output = extract("receipt.jpg", &config).await?;
/// println!("{}", output.record.amount());
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ReceiptError> {
    Extractor::new(config.clone())?.extract_file(path).await
}

/// Extract a receipt from image bytes already in memory.
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ReceiptError> {
    Extractor::new(config.clone())?
        .extract_bytes(bytes, "<bytes>")
        .await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally; do not call from async code.
pub fn extract_sync(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ReceiptError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ReceiptError::Configuration(format!("failed to create tokio runtime: {e}")))?
        .block_on(extract(path, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::Strategy;
    use crate::pipeline::transport::TransportReply;
    use crate::record::FieldValue;
    use async_trait::async_trait;

    const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

    struct Canned(&'static str);

    #[async_trait]
    impl Transport for Canned {
        async fn send(&self, _: &ExtractionRequest) -> Result<TransportReply, ReceiptError> {
            Ok(TransportReply {
                text: self.0.to_string(),
                endpoint: "canned".into(),
                input_tokens: Some(10),
                output_tokens: None,
            })
        }
    }

    fn extractor(reply: &'static str) -> Extractor {
        Extractor::with_transport(ExtractionConfig::default(), Arc::new(Canned(reply)))
    }

    #[tokio::test]
    async fn runs_every_stage() {
        let out = extractor(r#"{"amount": "250,000", "date": "1403/02/01"}"#)
            .extract_bytes(GIF, "r.gif")
            .await
            .unwrap();
        assert_eq!(out.strategy, Strategy::Json);
        assert_eq!(out.record.amount(), &FieldValue::found("250000"));
        assert_eq!(out.stats.endpoint, "canned");
        assert_eq!(out.stats.input_tokens, Some(10));
        assert!(out.stats.encoded_bytes > 0);
    }

    #[tokio::test]
    async fn encoding_failure_stops_before_transport() {
        let err = extractor("{}").extract_bytes(b"", "empty").await.unwrap_err();
        assert!(matches!(err, ReceiptError::Encoding { .. }));
    }

    #[tokio::test]
    async fn unstructured_reply_is_an_error() {
        let err = extractor("I cannot help with that.")
            .extract_bytes(GIF, "r.gif")
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiptError::Normalization { .. }));
    }

    #[test]
    fn missing_credentials_fail_at_construction() {
        let err = Extractor::new(ExtractionConfig::default()).unwrap_err();
        assert!(matches!(err, ReceiptError::Configuration(_)));
    }
}

//! Image encoding: raw receipt bytes → base64 `EncodedImage`.
//!
//! Different transport targets want the payload in different shapes: the
//! OpenAI chat dialect takes a `data:` URI, Gemini's `inline_data` and
//! `edgequake-llm`'s `ImageData` take the bare base64 plus a separate media
//! type. [`EncodedImage`] carries both.
//!
//! The bytes are sent as-is. Re-encoding a photographed receipt would only
//! add compression artefacts on exactly the digits we need to read. Size and
//! resolution checks are a caller concern.

use crate::error::ReceiptError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use std::path::Path;
use tracing::debug;

/// A transport-ready image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    media_type: &'static str,
    base64: String,
}

impl EncodedImage {
    /// IANA media type, e.g. `image/jpeg`.
    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    /// Bare base64 payload, no prefix.
    pub fn base64(&self) -> &str {
        &self.base64
    }

    /// `data:<media-type>;base64,<payload>`.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64)
    }

    /// `edgequake-llm` attachment. `detail: "high"` keeps small print legible
    /// on tiling models.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.base64.clone(), self.media_type).with_detail("high")
    }
}

/// Map sniffed formats onto media types every vision API accepts.
fn supported_media_type(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

/// Encode in-memory image bytes. `label` names the input in errors.
pub fn encode_bytes(bytes: &[u8], label: &str) -> Result<EncodedImage, ReceiptError> {
    if bytes.is_empty() {
        return Err(ReceiptError::Encoding {
            input: label.to_string(),
            reason: "input is empty".into(),
        });
    }

    let format = image::guess_format(bytes).map_err(|_| ReceiptError::Encoding {
        input: label.to_string(),
        reason: "unrecognised image format".into(),
    })?;

    let media_type = supported_media_type(format).ok_or_else(|| ReceiptError::Encoding {
        input: label.to_string(),
        reason: format!("unsupported media type {format:?}"),
    })?;

    let b64 = STANDARD.encode(bytes);
    debug!(
        "Encoded {} ({}) → {} bytes base64",
        label,
        media_type,
        b64.len()
    );

    Ok(EncodedImage {
        media_type,
        base64: b64,
    })
}

/// Read and encode an image file.
pub async fn encode_file(path: &Path) -> Result<EncodedImage, ReceiptError> {
    let label = path.display().to_string();
    let bytes = tokio::fs::read(path).await.map_err(|e| ReceiptError::Encoding {
        input: label.clone(),
        reason: match e.kind() {
            std::io::ErrorKind::NotFound => "file not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
            _ => e.to_string(),
        },
    })?;
    encode_bytes(&bytes, &label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("png encode");
        buf
    }

    #[test]
    fn encode_png_both_forms() {
        let bytes = png_bytes();
        let enc = encode_bytes(&bytes, "receipt.png").expect("encode should succeed");
        assert_eq!(enc.media_type(), "image/png");
        assert!(enc.data_uri().starts_with("data:image/png;base64,"));
        assert!(enc.data_uri().ends_with(enc.base64()));
        let decoded = STANDARD.decode(enc.base64()).expect("valid base64");
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn jpeg_is_sniffed_from_magic() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .expect("jpeg encode");
        // Misleading label: format comes from the bytes, not the name.
        let enc = encode_bytes(&buf, "scan.png").unwrap();
        assert_eq!(enc.media_type(), "image/jpeg");
    }

    #[test]
    fn rejects_non_image() {
        let err = encode_bytes(b"%PDF-1.7 not an image", "x.pdf").unwrap_err();
        assert!(matches!(err, ReceiptError::Encoding { .. }));
    }

    #[test]
    fn rejects_unsupported_format() {
        // BMP magic is recognised but not accepted by vision APIs.
        let err = encode_bytes(b"BM\x00\x00\x00\x00\x00\x00\x00\x00", "x.bmp").unwrap_err();
        match err {
            ReceiptError::Encoding { reason, .. } => assert!(reason.contains("unsupported")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            encode_bytes(&[], "empty"),
            Err(ReceiptError::Encoding { .. })
        ));
    }

    #[tokio::test]
    async fn missing_file_is_encoding_error() {
        let err = encode_file(Path::new("/definitely/not/here.jpg"))
            .await
            .unwrap_err();
        match err {
            ReceiptError::Encoding { reason, .. } => assert_eq!(reason, "file not found"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn encode_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipt.png");
        std::fs::write(&path, png_bytes()).unwrap();
        let enc = encode_file(&path).await.unwrap();
        assert_eq!(enc.media_type(), "image/png");
    }
}

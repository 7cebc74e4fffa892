//! Upload decoding. Every image handed to a model is re-encoded as RGB PNG.

use std::io::Cursor;

use image::ImageOutputFormat;

use crate::errors::AppError;
use crate::llm_client::InlineImage;

/// Content types `/search` accepts for the query image.
pub const ACCEPTED_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

pub fn is_accepted_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ACCEPTED_CONTENT_TYPES.contains(&ct))
}

/// Decodes any supported format, drops alpha, and re-encodes as PNG.
pub fn normalize_to_png(bytes: &[u8]) -> Result<InlineImage, image::ImageError> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let mut encoded = Vec::new();
    image::DynamicImage::ImageRgb8(rgb)
        .write_to(&mut Cursor::new(&mut encoded), ImageOutputFormat::Png)?;
    Ok(InlineImage::new("image/png", encoded))
}

/// `normalize_to_png` on the blocking pool; decode failures become 400s.
pub async fn decode_upload(bytes: bytes::Bytes, what: &str) -> Result<InlineImage, AppError> {
    let label = what.to_string();
    tokio::task::spawn_blocking(move || normalize_to_png(&bytes))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(|e| AppError::Validation(format!("Could not read {label}: {e}")))
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([120, 120, 120, 255]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
        .unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_content_types() {
        assert!(is_accepted_content_type(Some("image/webp")));
        assert!(!is_accepted_content_type(Some("application/pdf")));
        assert!(!is_accepted_content_type(None));
    }

    #[test]
    fn test_normalize_to_png_drops_alpha() {
        let png = sample_png(4, 3);
        let normalized = normalize_to_png(&png).unwrap();
        assert_eq!(normalized.mime, "image/png");
        let decoded = image::load_from_memory(&normalized.data).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_to_png(b"definitely not an image").is_err());
    }

    #[tokio::test]
    async fn test_decode_upload_maps_to_validation() {
        let err = decode_upload(bytes::Bytes::from_static(b"nope"), "image")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}

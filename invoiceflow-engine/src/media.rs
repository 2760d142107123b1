/// Media preparation for extraction
///
/// Images get re-encoded so the vision model receives something legible:
/// RGB JPEG, small scans upscaled, huge photos capped. PDFs get their text
/// pulled out so they can go through the cheaper text extraction path.
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};

/// Minimum size of the smaller image dimension after optimization
const MIN_DIMENSION: u32 = 400;

/// Maximum size of the larger image dimension
const MAX_DIMENSION: u32 = 2048;

const JPEG_QUALITY: u8 = 95;

/// Upload types we accept, by file extension
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "pdf"];

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to read PDF: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("PDF contains no extractable text")]
    EmptyPdfText,

    #[error("invalid base64 media payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// How a file will be routed through extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Pdf,
}

/// Lowercased extension of a filename, if any.
pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Classifies an upload by extension, rejecting anything off the whitelist.
pub fn classify(filename: &str) -> Result<MediaKind, MediaError> {
    let ext = file_extension(filename)
        .ok_or_else(|| MediaError::UnsupportedType(filename.to_string()))?;

    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(MediaError::UnsupportedType(ext));
    }

    Ok(if ext == "pdf" {
        MediaKind::Pdf
    } else {
        MediaKind::Image
    })
}

fn target_dimensions(width: u32, height: u32) -> (u32, u32) {
    let min_side = width.min(height);
    let max_side = width.max(height);

    let scale = if min_side < MIN_DIMENSION {
        MIN_DIMENSION as f64 / min_side as f64
    } else if max_side > MAX_DIMENSION {
        MAX_DIMENSION as f64 / max_side as f64
    } else {
        return (width, height);
    };

    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

/// Re-encodes an image as an RGB JPEG sized for the vision model.
pub fn optimize_image(bytes: &[u8]) -> Result<Vec<u8>, MediaError> {
    let decoded = image::load_from_memory(bytes)?;
    let (width, height) = (decoded.width(), decoded.height());
    let (target_w, target_h) = target_dimensions(width, height);

    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let resized = if (target_w, target_h) == (width, height) {
        rgb
    } else {
        rgb.resize_exact(target_w, target_h, FilterType::Lanczos3)
    };

    let mut out = Vec::new();
    resized.write_to(
        &mut Cursor::new(&mut out),
        ImageOutputFormat::Jpeg(JPEG_QUALITY),
    )?;

    Ok(out)
}

/// Optimizes an image and returns it base64 encoded for the API payload.
pub fn optimize_image_base64(bytes: &[u8]) -> Result<String, MediaError> {
    Ok(BASE64.encode(optimize_image(bytes)?))
}

/// Decodes a base64 media payload, as delivered by the WhatsApp gateway.
pub fn decode_base64_media(payload: &str) -> Result<Vec<u8>, MediaError> {
    Ok(BASE64.decode(payload.trim())?)
}

/// Longest PDF text sent to the model. Invoices fit well under this; the
/// cap keeps token spend bounded for oversized documents.
pub const MAX_PDF_TEXT_CHARS: usize = 4000;

/// Pulls the text layer out of a PDF across all pages, capped at
/// [`MAX_PDF_TEXT_CHARS`].
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, MediaError> {
    let document = lopdf::Document::load_mem(bytes)?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    let mut text = document.extract_text(&pages)?;

    if text.trim().is_empty() {
        return Err(MediaError::EmptyPdfText);
    }

    if text.chars().count() > MAX_PDF_TEXT_CHARS {
        text = text.chars().take(MAX_PDF_TEXT_CHARS).collect();
    }

    Ok(text)
}

/// Storage filename for media received over WhatsApp. The extension comes
/// from the message mimetype so PDFs keep their text-extraction path.
pub fn whatsapp_filename(phone: &str, received_at: DateTime<Utc>, extension: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    format!(
        "whatsapp_{}_{}.{}",
        digits,
        received_at.format("%Y%m%d%H%M%S"),
        extension,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::RgbImage;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("scan.JPG").unwrap(), MediaKind::Image);
        assert_eq!(classify("factura.pdf").unwrap(), MediaKind::Pdf);
        assert!(matches!(
            classify("run.exe"),
            Err(MediaError::UnsupportedType(_))
        ));
        assert!(matches!(
            classify("noextension"),
            Err(MediaError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_target_dimensions() {
        // small scan gets upscaled until the short side hits 400
        assert_eq!(target_dimensions(100, 150), (400, 600));
        // oversized photo gets capped at 2048 on the long side
        assert_eq!(target_dimensions(3000, 1000), (2048, 683));
        // already in range stays untouched
        assert_eq!(target_dimensions(800, 600), (800, 600));
    }

    #[test]
    fn test_optimize_image_upscales_and_reencodes() {
        let optimized = optimize_image(&png_bytes(100, 150)).unwrap();
        let decoded = image::load_from_memory(&optimized).unwrap();

        assert_eq!(decoded.width(), 400);
        assert_eq!(decoded.height(), 600);
        // JPEG magic bytes
        assert_eq!(&optimized[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_optimize_image_rejects_garbage() {
        assert!(matches!(
            optimize_image(b"not an image"),
            Err(MediaError::Image(_))
        ));
    }

    #[test]
    fn test_whatsapp_filename() {
        let at = Utc.with_ymd_and_hms(2025, 3, 15, 14, 30, 0).unwrap();
        assert_eq!(
            whatsapp_filename("+1 809-555-1234", at, "jpg"),
            "whatsapp_18095551234_20250315143000.jpg",
        );
        assert_eq!(
            whatsapp_filename("18095551234", at, "pdf"),
            "whatsapp_18095551234_20250315143000.pdf",
        );
    }
}

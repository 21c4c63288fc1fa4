//! Render pairing codes as scannable PNG images

use crate::error::{Error, Result};
use crate::registry::CachedPairingCode;
use base64::Engine;
use image::{ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

/// Encode `code` as a QR code PNG of at least `size` pixels per edge
pub fn render_qr_png(code: &str, size: u32) -> Result<CachedPairingCode> {
    let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::M)
        .map_err(|e| Error::Protocol(format!("Failed to encode pairing code: {}", e)))?;
    let image = qr
        .render::<Luma<u8>>()
        .min_dimensions(size, size)
        .build();

    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| Error::Protocol(format!("Failed to render pairing code: {}", e)))?;

    Ok(CachedPairingCode::png(
        base64::engine::general_purpose::STANDARD.encode(png.into_inner()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_produces_png() {
        let rendered = render_qr_png("2@AbCdEf,ghIjK,lmNoP", 256).unwrap();
        assert_eq!(rendered.content_type, "image/png");

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&rendered.data)
            .unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(decoded.width() >= 256);
        assert_eq!(decoded.width(), decoded.height());
    }

    #[test]
    fn test_distinct_codes_render_differently() {
        let a = render_qr_png("code-a", 128).unwrap();
        let b = render_qr_png("code-b", 128).unwrap();
        assert_ne!(a.data, b.data);
    }
}

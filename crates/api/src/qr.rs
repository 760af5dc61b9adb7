//! Solana pay-style QR codes for the disposable address.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, Luma};
use qrcode::QrCode;
use rust_decimal::Decimal;

use crate::error::{ApiError, ApiResult};

/// `solana:<address>?amount=<amount>` with the amount at nine decimals.
pub fn payment_uri(address: &str, amount: Decimal) -> String {
    format!("solana:{}?amount={:.9}", address, amount)
}

/// Render `data` as a QR code and return the PNG bytes, base64 encoded.
pub fn encode_png_base64(data: &str) -> ApiResult<String> {
    let qr = QrCode::new(data.as_bytes())
        .map_err(|e| ApiError::InternalError(format!("Failed to generate QR code: {}", e)))?;
    let image = qr.render::<Luma<u8>>().build();

    let mut png_data = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut std::io::Cursor::new(&mut png_data), image::ImageFormat::Png)
        .map_err(|e| ApiError::InternalError(format!("Failed to encode PNG: {}", e)))?;

    Ok(STANDARD.encode(png_data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const ADDRESS: &str = "DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK";

    #[test]
    fn test_payment_uri_has_nine_decimals() {
        assert_eq!(
            payment_uri(ADDRESS, Decimal::from_str("1.5").unwrap()),
            format!("solana:{}?amount=1.500000000", ADDRESS)
        );
        assert_eq!(
            payment_uri(ADDRESS, Decimal::from_str("0.000000001").unwrap()),
            format!("solana:{}?amount=0.000000001", ADDRESS)
        );
    }

    #[test]
    fn test_qr_is_base64_png() {
        let encoded = encode_png_base64(&payment_uri(ADDRESS, Decimal::ONE)).unwrap();
        let png = STANDARD.decode(encoded).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}

use crate::image_validator::{ImageValidationError, ImageValidator, ImageValidatorConfig};
use crate::tests::support::{png_base64, png_bytes};
use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;

fn validator() -> ImageValidator {
    ImageValidator::new(ImageValidatorConfig::default())
}

#[test]
fn test_valid_png() {
    let result = validator().validate("img1", &png_base64()).unwrap();
    assert_eq!(result.id, "img1");
    assert_eq!(result.format, ImageFormat::Png);
    assert_eq!(result.bytes, png_bytes());
}

#[test]
fn test_data_url_prefix_stripped() {
    let payload = format!("data:image/png;base64,{}", png_base64());
    let result = validator().validate("img1", &payload).unwrap();
    assert_eq!(result.format, ImageFormat::Png);
}

#[test]
fn test_jpeg_gif_bmp_webp_magic_bytes() {
    let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];
    let gif = b"GIF89a\x01\x00\x01\x00".to_vec();
    let bmp = b"BM\x3E\x00\x00\x00\x00\x00\x00\x00".to_vec();
    let mut webp = b"RIFF".to_vec();
    webp.extend_from_slice(&[0x20, 0x00, 0x00, 0x00]);
    webp.extend_from_slice(b"WEBPVP8 ");

    let cases = [
        (jpeg.to_vec(), ImageFormat::Jpeg),
        (gif, ImageFormat::Gif),
        (bmp, ImageFormat::Bmp),
        (webp, ImageFormat::WebP),
    ];

    for (bytes, expected) in cases {
        let encoded = general_purpose::STANDARD.encode(&bytes);
        let result = validator().validate("img", &encoded).unwrap();
        assert_eq!(result.format, expected);
    }
}

#[test]
fn test_invalid_base64_rejected() {
    let err = validator().validate("img1", "not-valid-base64!!!").unwrap_err();
    assert!(matches!(err, ImageValidationError::InvalidBase64(_)));
}

#[test]
fn test_empty_payload_rejected() {
    let err = validator().validate("img1", "").unwrap_err();
    assert!(matches!(err, ImageValidationError::EmptyImage));
}

#[test]
fn test_oversized_payload_rejected() {
    let small = ImageValidator::new(ImageValidatorConfig { max_bytes: 16 });
    let err = small.validate("img1", &png_base64()).unwrap_err();
    assert!(matches!(err, ImageValidationError::TooLarge { .. }));
}

#[test]
fn test_unknown_magic_bytes_rejected() {
    let junk = general_purpose::STANDARD.encode([0u8; 32]);
    let err = validator().validate("img1", &junk).unwrap_err();
    assert!(matches!(err, ImageValidationError::UnsupportedFormat(_)));
}

#[test]
fn test_recognized_but_unsupported_format_rejected() {
    // TIFF sniffs fine but is not in the accepted set
    let tiff = general_purpose::STANDARD.encode(b"II\x2A\x00\x08\x00\x00\x00");
    let err = validator().validate("img1", &tiff).unwrap_err();
    assert!(matches!(err, ImageValidationError::UnsupportedFormat(_)));
}

#[test]
fn test_whitespace_in_base64_tolerated() {
    let encoded = png_base64();
    let (head, tail) = encoded.split_at(8);
    let wrapped = format!("{head}\n{tail}  ");
    let result = validator().validate("img1", &wrapped).unwrap();
    assert_eq!(result.format, ImageFormat::Png);
}

#[test]
fn test_validation_is_idempotent() {
    let v = validator();
    let first = v.validate("img1", &png_base64()).unwrap();
    let second = v.validate("img1", &png_base64()).unwrap();
    assert_eq!(first.bytes, second.bytes);
    assert_eq!(first.format, second.format);

    let bad_first = v.validate("img1", "%%%").unwrap_err();
    let bad_second = v.validate("img1", "%%%").unwrap_err();
    assert!(matches!(bad_first, ImageValidationError::InvalidBase64(_)));
    assert!(matches!(bad_second, ImageValidationError::InvalidBase64(_)));
}

#[test]
fn test_malformed_data_url_rejected() {
    let err = validator().validate("img1", "data:image/png;base64").unwrap_err();
    assert!(matches!(err, ImageValidationError::InvalidBase64(_)));
}

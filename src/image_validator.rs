use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;
use std::error::Error;
use std::fmt;

pub const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug)]
pub enum ImageValidationError {
    InvalidBase64(String),
    EmptyImage,
    TooLarge { size: usize, max: usize },
    UnsupportedFormat(String),
}

impl fmt::Display for ImageValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageValidationError::InvalidBase64(msg) => write!(f, "Invalid base64 payload: {msg}"),
            ImageValidationError::EmptyImage => write!(f, "Image payload decoded to zero bytes"),
            ImageValidationError::TooLarge { size, max } => {
                write!(f, "Image too large: {size} bytes (max {max})")
            }
            ImageValidationError::UnsupportedFormat(msg) => {
                write!(f, "Unsupported image format: {msg}")
            }
        }
    }
}

impl Error for ImageValidationError {}

/// A decoded, format-checked image. Owned by the validation phase and
/// dropped once the moderation call for it completes.
#[derive(Debug)]
pub struct ValidatedImage {
    pub id: String,
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

#[derive(Debug, Clone)]
pub struct ImageValidatorConfig {
    /// Maximum decoded size in bytes
    pub max_bytes: usize,
}

impl Default for ImageValidatorConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// Decodes and validates a single image payload.
///
/// Pure: no I/O, no shared state. Failures come back as data so the
/// caller can keep processing the rest of the batch.
pub struct ImageValidator {
    config: ImageValidatorConfig,
}

impl ImageValidator {
    pub fn new(config: ImageValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImageValidatorConfig {
        &self.config
    }

    pub fn validate(
        &self,
        id: &str,
        payload: &str,
    ) -> Result<ValidatedImage, ImageValidationError> {
        let trimmed = payload.trim();

        // Strip an optional data URL prefix: data:image/png;base64,AAAA...
        let encoded = if trimmed.starts_with("data:") {
            match trimmed.find(',') {
                Some(idx) => &trimmed[idx + 1..],
                None => {
                    return Err(ImageValidationError::InvalidBase64(
                        "data URL has no comma separator".to_string(),
                    ))
                }
            }
        } else {
            trimmed
        };

        // Base64 payloads from mobile clients often carry line breaks
        let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();

        let bytes = general_purpose::STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| ImageValidationError::InvalidBase64(e.to_string()))?;

        if bytes.is_empty() {
            return Err(ImageValidationError::EmptyImage);
        }

        if bytes.len() > self.config.max_bytes {
            return Err(ImageValidationError::TooLarge {
                size: bytes.len(),
                max: self.config.max_bytes,
            });
        }

        let format = image::guess_format(&bytes).map_err(|_| {
            ImageValidationError::UnsupportedFormat("no known magic bytes".to_string())
        })?;

        match format {
            ImageFormat::Jpeg
            | ImageFormat::Png
            | ImageFormat::Gif
            | ImageFormat::WebP
            | ImageFormat::Bmp => Ok(ValidatedImage {
                id: id.to_string(),
                bytes,
                format,
            }),
            other => Err(ImageValidationError::UnsupportedFormat(format!("{other:?}"))),
        }
    }
}

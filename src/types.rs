//! Wire types for the moderation endpoint

use serde::{Deserialize, Serialize};

/// One image inside a batch request
#[derive(Debug, Clone, Deserialize)]
pub struct ImagePayload {
    pub image_id: String,
    pub image_base64: String,
}

/// Per-request overrides for the moderation pipeline
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModerationSettings {
    /// Minimum label confidence (0-100) for an image to be flagged
    pub confidence_threshold: Option<f32>,
    /// Label names / parent names that count as NSFW
    pub categories: Option<Vec<String>>,
    /// Upper bound on in-flight moderation calls for this batch
    pub max_concurrent: Option<usize>,
}

/// Legacy single-image request shape, kept for older app builds
#[derive(Debug, Deserialize)]
pub struct SingleModerationRequest {
    pub image_base64: String,
    pub image_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchModerationRequest {
    pub images: Vec<ImagePayload>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub settings: Option<ModerationSettings>,
}

/// Inbound body: batch shape or the legacy single-image shape.
///
/// Batch is tried first; the legacy shape has no `images` field so the
/// two cannot be confused.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ModerationRequestBody {
    Batch(BatchModerationRequest),
    Single(SingleModerationRequest),
}

/// One moderation label returned by the external dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationLabel {
    pub name: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<u32>,
}

/// Outcome for a single image. Failures are carried in `error`; a batch
/// always yields exactly one of these per input image.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationResult {
    pub image_id: String,
    pub is_nsfw: bool,
    pub labels: Vec<ModerationLabel>,
    pub confidence_score: f32,
    pub processing_time_ms: u64,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModerationResult {
    /// Synthesized failure result carrying zero confidence
    pub fn failure(image_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            is_nsfw: false,
            labels: Vec::new(),
            confidence_score: 0.0,
            processing_time_ms: 0,
            retry_count: 0,
            error: Some(error.into()),
        }
    }
}

/// Local rate limiter snapshot exposed to callers
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitInfo {
    pub remaining_requests: usize,
    /// RFC 3339 instant at which the oldest in-window call expires
    pub reset_time: String,
}

#[derive(Debug, Serialize)]
pub struct BatchModerationResponse {
    pub batch_id: String,
    pub total_images: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<ModerationResult>,
    pub total_processing_time_ms: u64,
    pub average_processing_time_ms: f64,
    pub throughput_images_per_second: f64,
    pub rate_limit_info: RateLimitInfo,
}

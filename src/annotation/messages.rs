//! Message types exchanged with annotation services.
//!
//! Two protocols are covered:
//! - The Vision `images:annotate` JSON request and response bodies
//! - The Edge Impulse model process protocol (newline delimited JSON over a
//!   Unix socket): `HelloMessage`, `ClassifyMessage`, `ModelInfo` and
//!   `InferenceResponse`

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of an `images:annotate` request.
#[derive(Serialize, Debug)]
pub struct AnnotateRequest {
    pub requests: Vec<AnnotateImageRequest>,
}

#[derive(Serialize, Debug)]
pub struct AnnotateImageRequest {
    pub image: ImageContent,
    pub features: Vec<Feature>,
}

/// Base64 encoded image bytes
#[derive(Serialize, Debug)]
pub struct ImageContent {
    pub content: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub max_results: u32,
}

/// Body of an `images:annotate` response.
#[derive(Deserialize, Debug, Default)]
pub struct AnnotateResponse {
    #[serde(default)]
    pub responses: Vec<AnnotateImageResponse>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnnotateImageResponse {
    #[serde(default)]
    pub localized_object_annotations: Vec<LocalizedObjectAnnotation>,
    #[serde(default)]
    pub label_annotations: Vec<EntityAnnotation>,
    #[serde(default)]
    pub error: Option<Status>,
}

/// An object found by object localization.
#[derive(Deserialize, Debug)]
pub struct LocalizedObjectAnnotation {
    pub name: String,
    #[serde(default)]
    pub score: f32,
}

/// A label found by label detection.
#[derive(Deserialize, Debug)]
pub struct EntityAnnotation {
    pub description: String,
    #[serde(default)]
    pub score: f32,
}

/// Per-image error reported inside a successful HTTP response.
#[derive(Deserialize, Debug)]
pub struct Status {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Initial handshake message sent to the model process.
#[derive(Serialize, Debug)]
pub struct HelloMessage {
    /// Protocol version number
    pub hello: u32,
    /// Unique message identifier
    pub id: u32,
}

/// Message containing features for classification.
#[derive(Serialize, Debug)]
pub struct ClassifyMessage {
    pub classify: Vec<f32>,
    pub id: u32,
}

/// Model information received in reply to the hello message.
#[derive(Deserialize, Debug)]
pub struct ModelInfo {
    pub success: bool,
    pub id: u32,
    pub model_parameters: ModelParameters,
}

/// The subset of model parameters needed to feed it frames.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct ModelParameters {
    /// Number of color channels in input images (1 = grayscale, 3 = RGB)
    #[serde(default)]
    pub image_channel_count: u32,
    /// Required height of input images in pixels
    #[serde(default)]
    pub image_input_height: u32,
    /// Required width of input images in pixels
    #[serde(default)]
    pub image_input_width: u32,
    /// Type of model ("classification", "object-detection", etc.)
    #[serde(default)]
    pub model_type: String,
    /// Optional confidence threshold for detections (0.0 to 1.0)
    #[serde(default)]
    pub threshold: Option<f32>,
}

/// Different shapes of inference result.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum InferenceResult {
    ObjectDetection {
        bounding_boxes: Vec<BoundingBox>,
        #[serde(default)]
        classification: HashMap<String, f32>,
    },
    Classification {
        classification: HashMap<String, f32>,
    },
}

#[derive(Deserialize, Debug)]
pub struct InferenceResponse {
    pub success: bool,
    pub id: u32,
    pub result: InferenceResult,
}

#[derive(Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// A detected object's location and classification.
#[derive(Deserialize, Debug)]
pub struct BoundingBox {
    pub label: String,
    pub value: f32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

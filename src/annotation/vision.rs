//! Vision REST backend.
//!
//! Frames are encoded as JPEG, base64 encoded and posted to
//! `{endpoint}/v1/images:annotate`. Object localization results are reported
//! by object name; label detection results by label description.

use super::messages::{AnnotateImageRequest, AnnotateRequest, AnnotateResponse, Feature, ImageContent};
use super::{Annotation, AnnotationBackend};
use crate::config::AnnotationFeature;
use crate::error::AnnotationError;
use base64::Engine;
use futures_util::future::BoxFuture;
use hmac::{Hmac, Mac};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_VISION_HOST: &str = "https://vision.googleapis.com";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct VisionBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    hmac_key: Option<String>,
    feature: AnnotationFeature,
    max_results: u32,
    jpeg_quality: u8,
    timeout: Duration,
}

impl VisionBackend {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_VISION_HOST.to_string())
    }

    pub fn with_endpoint(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: None,
            hmac_key: None,
            feature: AnnotationFeature::ObjectLocalization,
            max_results: 10,
            jpeg_quality: 90,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sign request bodies with HMAC-SHA256 in an `x-signature` header.
    pub fn with_hmac(mut self, hmac_key: String) -> Self {
        self.hmac_key = Some(hmac_key);
        self
    }

    pub fn with_feature(mut self, feature: AnnotationFeature) -> Self {
        self.feature = feature;
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    /// Give up on a request, response body included, after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    fn create_signature(&self, data: &[u8]) -> Result<Option<String>, AnnotationError> {
        let Some(hmac_key) = &self.hmac_key else {
            return Ok(None);
        };
        let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key.as_bytes())
            .map_err(|e| AnnotationError::Config(e.to_string()))?;
        mac.update(data);
        Ok(Some(hex::encode(mac.finalize().into_bytes())))
    }

    /// Encode a frame the way it is sent to the service.
    pub fn encode_jpeg(&self, frame: &RgbImage) -> Result<Vec<u8>, AnnotationError> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality).encode_image(frame)?;
        Ok(jpeg)
    }

    fn feature_name(&self) -> &'static str {
        match self.feature {
            AnnotationFeature::ObjectLocalization => "OBJECT_LOCALIZATION",
            AnnotationFeature::LabelDetection => "LABEL_DETECTION",
        }
    }

    /// Annotate an already encoded image.
    pub async fn annotate_encoded(&self, image: &[u8]) -> Result<Vec<Annotation>, AnnotationError> {
        debug!("Creating annotate request for {} bytes", image.len());
        let request = AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: ImageContent {
                    content: base64::engine::general_purpose::STANDARD.encode(image),
                },
                features: vec![Feature {
                    kind: self.feature_name(),
                    max_results: self.max_results,
                }],
            }],
        };
        let body = serde_json::to_vec(&request)?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, "application/json".parse()?);
        if let Some(signature) = self.create_signature(&body)? {
            debug!("Generated signature: {}", signature);
            headers.insert("x-signature", signature.parse()?);
        }

        let mut url = format!("{}/v1/images:annotate", self.endpoint);
        if let Some(key) = &self.api_key {
            url = format!("{}?key={}", url, urlencoding::encode(key));
        }

        debug!("Sending request to {}", self.endpoint);
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        debug!("Response status: {}", status);
        let response_text = response.text().await?;

        if !status.is_success() {
            error!("Annotate request failed: {}", response_text);
            return Err(AnnotationError::Server {
                status_code: status.as_u16(),
                message: response_text,
            });
        }

        let parsed: AnnotateResponse = serde_json::from_str(&response_text)?;
        let Some(result) = parsed.responses.into_iter().next() else {
            return Ok(Vec::new());
        };
        if let Some(status) = result.error {
            return Err(AnnotationError::Server {
                status_code: status.code.clamp(0, u16::MAX as i32) as u16,
                message: status.message,
            });
        }

        let annotations = match self.feature {
            AnnotationFeature::ObjectLocalization => result
                .localized_object_annotations
                .into_iter()
                .map(|object| Annotation::new(object.name, object.score))
                .collect(),
            AnnotationFeature::LabelDetection => result
                .label_annotations
                .into_iter()
                .map(|label| Annotation::new(label.description, label.score))
                .collect(),
        };
        Ok(annotations)
    }
}

impl Default for VisionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationBackend for VisionBackend {
    fn name(&self) -> &str {
        "vision"
    }

    fn annotate<'a>(
        &'a self,
        frame: &'a RgbImage,
    ) -> BoxFuture<'a, Result<Vec<Annotation>, AnnotationError>> {
        Box::pin(async move {
            let jpeg = self.encode_jpeg(frame)?;
            self.annotate_encoded(&jpeg).await
        })
    }
}

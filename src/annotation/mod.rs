//! Annotation backends.
//!
//! The classification extractor does not recognise anything itself. It sends
//! the triggering frame to an annotation backend and gets back labelled
//! objects with confidence scores. Backends are interchangeable behind the
//! [`AnnotationBackend`] trait:
//!
//! - **Vision backend**: the Cloud Vision `images:annotate` REST endpoint
//!   (object localization or label detection), or any gateway that speaks it
//! - **EIM backend**: a local Edge Impulse object detection model driven over
//!   its Unix socket protocol (feature `eim`)
//!
//! Use [`create_backend`] to build the backend selected in the configuration.

use crate::config::{AnnotationConfig, BackendKind};
use crate::error::AnnotationError;
use futures_util::future::BoxFuture;
use image::RgbImage;

#[cfg(all(feature = "eim", unix))]
pub mod eim;
pub mod messages;
pub mod vision;

pub use vision::VisionBackend;

/// One labelled object returned by an annotation backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Label as reported by the backend, e.g. "Apple"
    pub label: String,
    /// Confidence score from 0.0 to 1.0
    pub score: f32,
}

impl Annotation {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Trait for annotation backends
pub trait AnnotationBackend: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Annotate a frame.
    ///
    /// The backend is responsible for serialising the frame into whatever
    /// form its service expects.
    fn annotate<'a>(
        &'a self,
        frame: &'a RgbImage,
    ) -> BoxFuture<'a, Result<Vec<Annotation>, AnnotationError>>;
}

/// Factory function to create the configured backend
pub fn create_backend(
    config: &AnnotationConfig,
) -> Result<Box<dyn AnnotationBackend>, AnnotationError> {
    match config.backend {
        BackendKind::Vision => {
            let mut backend = VisionBackend::with_endpoint(config.endpoint.clone())
                .with_feature(config.feature)
                .with_max_results(config.max_results)
                .with_jpeg_quality(config.jpeg_quality)
                .with_timeout(config.request_timeout());
            if let Some(key) = &config.api_key {
                backend = backend.with_api_key(key.clone());
            }
            if let Some(key) = &config.hmac_key {
                backend = backend.with_hmac(key.clone());
            }
            if config.api_key.is_none() && config.hmac_key.is_none() {
                tracing::warn!("Vision backend configured without credentials");
            }
            Ok(Box::new(backend))
        }
        #[cfg(all(feature = "eim", unix))]
        BackendKind::Eim => {
            let path = config.model_path.clone().ok_or_else(|| {
                AnnotationError::Config("annotation.model_path is required for the eim backend".to_string())
            })?;
            Ok(Box::new(eim::EimBackend::new(path)?))
        }
        #[cfg(not(all(feature = "eim", unix)))]
        BackendKind::Eim => Err(AnnotationError::Config(
            "EIM backend not enabled. Enable the 'eim' feature.".to_string(),
        )),
    }
}

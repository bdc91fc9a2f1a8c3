//! EIM backend implementation
//!
//! Runs a local Edge Impulse model binary (`.eim`) and talks to it over a
//! Unix socket with newline delimited JSON. Frames are resized to the model
//! input and packed as RGB888 features; bounding boxes (or class scores
//! above the model threshold) become annotations.

use super::messages::{
    ClassifyMessage, ErrorResponse, HelloMessage, InferenceResponse, InferenceResult, ModelInfo,
    ModelParameters,
};
use super::{Annotation, AnnotationBackend};
use crate::error::AnnotationError;
use futures_util::future::BoxFuture;
use image::{imageops, RgbImage};
use rand::Rng;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};
use tracing::debug;

/// Confidence used for classification models that do not report a threshold
const DEFAULT_CLASS_THRESHOLD: f32 = 0.5;

struct EimSession {
    socket: UnixStream,
    message_id: AtomicU32,
    process: Child,
    /// Keeps the socket directory alive while the model runs
    _tempdir: TempDir,
}

pub struct EimBackend {
    path: PathBuf,
    parameters: ModelParameters,
    session: Arc<Mutex<EimSession>>,
}

impl EimBackend {
    /// Start the model process and perform the hello handshake.
    pub fn new(path: PathBuf) -> Result<Self, AnnotationError> {
        if path.extension().and_then(|ext| ext.to_str()) != Some("eim") {
            return Err(AnnotationError::Config(format!(
                "model path {} does not have an .eim extension",
                path.display()
            )));
        }

        let tempdir = tempdir()?;
        let socket_name = format!("eim_socket_{}", rand::thread_rng().gen::<u64>());
        let socket_path = tempdir.path().join(socket_name);

        debug!(
            "Starting EIM process: {} {}",
            path.display(),
            socket_path.display()
        );
        let process = std::process::Command::new(&path)
            .arg(&socket_path)
            .spawn()
            .map_err(|e| AnnotationError::Backend(format!("Failed to start model process: {e}")))?;

        let socket = Self::connect_with_retry(&socket_path, Duration::from_secs(10))?;

        let mut session = EimSession {
            socket,
            message_id: AtomicU32::new(1),
            process,
            _tempdir: tempdir,
        };
        let info = session.hello()?;
        debug!("Model parameters: {:?}", info.model_parameters);

        Ok(Self {
            path,
            parameters: info.model_parameters,
            session: Arc::new(Mutex::new(session)),
        })
    }

    /// Path to the model binary
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect_with_retry(socket_path: &Path, timeout: Duration) -> Result<UnixStream, AnnotationError> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            match UnixStream::connect(socket_path) {
                Ok(socket) => return Ok(socket),
                Err(_) => std::thread::sleep(Duration::from_millis(100)),
            }
        }
        Err(AnnotationError::Backend(format!(
            "Timeout waiting for socket {} to become available",
            socket_path.display()
        )))
    }

    /// Resize and pack a frame into the feature layout the model expects.
    fn features(parameters: &ModelParameters, frame: &RgbImage) -> Vec<f32> {
        let resized = if parameters.image_input_width > 0 && parameters.image_input_height > 0 {
            imageops::resize(
                frame,
                parameters.image_input_width,
                parameters.image_input_height,
                imageops::FilterType::Triangle,
            )
        } else {
            frame.clone()
        };

        resized
            .pixels()
            .map(|p| {
                if parameters.image_channel_count == 1 {
                    let gray = (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32) as u32;
                    ((gray << 16) | (gray << 8) | gray) as f32
                } else {
                    (((p[0] as u32) << 16) | ((p[1] as u32) << 8) | (p[2] as u32)) as f32
                }
            })
            .collect()
    }

    fn to_annotations(parameters: &ModelParameters, result: InferenceResult) -> Vec<Annotation> {
        match result {
            InferenceResult::ObjectDetection { bounding_boxes, .. } => bounding_boxes
                .into_iter()
                .map(|bbox| Annotation::new(bbox.label, bbox.value))
                .collect(),
            InferenceResult::Classification { classification } => {
                let threshold = parameters.threshold.unwrap_or(DEFAULT_CLASS_THRESHOLD);
                classification
                    .into_iter()
                    .filter(|(_, score)| *score >= threshold)
                    .map(|(label, score)| Annotation::new(label, score))
                    .collect()
            }
        }
    }
}

impl EimSession {
    fn next_message_id(&self) -> u32 {
        self.message_id.fetch_add(1, Ordering::SeqCst)
    }

    fn roundtrip(&mut self, message: &str) -> Result<String, AnnotationError> {
        self.socket.write_all(message.as_bytes())?;
        self.socket.write_all(b"\n")?;

        let mut reader = BufReader::new(&self.socket);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.is_empty() {
            return Err(AnnotationError::Backend("Model process closed the socket".to_string()));
        }
        Ok(line)
    }

    fn check_error(line: &str) -> Option<AnnotationError> {
        match serde_json::from_str::<ErrorResponse>(line) {
            Ok(error) if !error.success => Some(AnnotationError::Backend(
                error.error.unwrap_or_else(|| "Unknown error".to_string()),
            )),
            _ => None,
        }
    }

    fn hello(&mut self) -> Result<ModelInfo, AnnotationError> {
        let hello = HelloMessage {
            hello: 1,
            id: self.next_message_id(),
        };
        let line = self.roundtrip(&serde_json::to_string(&hello)?)?;
        if let Some(error) = Self::check_error(&line) {
            return Err(error);
        }
        let info: ModelInfo = serde_json::from_str(&line)?;
        if !info.success {
            return Err(AnnotationError::Backend("Model initialization failed".to_string()));
        }
        Ok(info)
    }

    fn classify(&mut self, features: Vec<f32>) -> Result<InferenceResult, AnnotationError> {
        let message = ClassifyMessage {
            classify: features,
            id: self.next_message_id(),
        };
        let line = self.roundtrip(&serde_json::to_string(&message)?)?;
        if let Some(error) = Self::check_error(&line) {
            return Err(error);
        }
        let response: InferenceResponse = serde_json::from_str(&line)?;
        if !response.success {
            return Err(AnnotationError::Backend("Inference failed".to_string()));
        }
        Ok(response.result)
    }
}

impl Drop for EimSession {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

impl AnnotationBackend for EimBackend {
    fn name(&self) -> &str {
        "eim"
    }

    fn annotate<'a>(
        &'a self,
        frame: &'a RgbImage,
    ) -> BoxFuture<'a, Result<Vec<Annotation>, AnnotationError>> {
        let features = Self::features(&self.parameters, frame);
        let session = Arc::clone(&self.session);
        let parameters = self.parameters.clone();

        Box::pin(async move {
            let result = tokio::task::spawn_blocking(move || {
                let mut session = session
                    .lock()
                    .map_err(|_| AnnotationError::Backend("Model session poisoned".to_string()))?;
                session.classify(features)
            })
            .await
            .map_err(|e| AnnotationError::Backend(format!("Model task failed: {e}")))??;

            Ok(Self::to_annotations(&parameters, result))
        })
    }
}

//! Sensor relay: sample a device, detect changes, extract a payload and
//! deliver it over a reconnecting websocket.
//!
//! Two pipelines are assembled from the same parts:
//!
//! - **vision**: [`DirectorySampler`] frames, [`MotionDetector`],
//!   classification through an [`annotation`] backend
//! - **scale**: [`PolledSampler`] over a serial or simulated scale,
//!   [`PollDetector`], weight parsing
//!
//! Both feed a single [`Dispatcher`] through a [`DispatcherHandle`].

pub mod annotation;
pub mod config;
pub mod detector;
pub mod dispatch;
mod error;
pub mod extractor;
pub mod pipeline;
pub mod sampler;
pub mod types;

pub use config::RelayConfig;
pub use detector::{ChangeDetector, DetectionState, MotionDetector, PollDetector};
pub use dispatch::{ConnectionState, Dispatcher, DispatcherHandle, WebSocketTransport};
pub use error::{
    AnnotationError, ConfigError, DispatchError, ExtractionError, RelayError, SamplerError,
    WeightParseError,
};
pub use extractor::Extractor;
pub use pipeline::{Pipeline, PipelineReport};
pub use sampler::{DirectorySampler, PolledDevice, PolledSampler, Sampler, SimulatedScale};
pub use types::{Event, Payload, PayloadKind, Sample, SampleData};

#[cfg(test)]
mod tests;

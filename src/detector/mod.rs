//! Change detection.
//!
//! A [`ChangeDetector`] looks at every sample in order and decides whether it
//! represents a state change worth reporting. Detectors carry their
//! [`DetectionState`] explicitly and are owned by the single detection loop,
//! so no state is shared with the extraction tasks they feed.

use crate::types::{Event, Sample};
use chrono::{DateTime, Local};
use image::GrayImage;

pub mod motion;
pub mod poll;

pub use motion::{mask_sum, MotionDetector};
pub use poll::PollDetector;

/// Decides event / no event for each new sample.
pub trait ChangeDetector: Send {
    /// Observe the next sample.
    ///
    /// The sample is moved in. When it triggers an event it is moved on into
    /// the returned [`Event`]; otherwise it is dropped.
    fn observe(&mut self, sample: Sample) -> Option<Event>;

    /// State carried between samples
    fn state(&self) -> &DetectionState;
}

/// State carried between loop iterations.
#[derive(Debug, Clone, Default)]
pub struct DetectionState {
    /// Preprocessed previous frame, the comparison baseline
    pub previous: Option<GrayImage>,
    /// Time of the last accepted event, or of the first frame before any event
    pub last_trigger: Option<DateTime<Local>>,
    /// Magnitude computed for the most recent sample
    pub last_magnitude: u64,
    /// Number of events emitted so far
    pub events: u64,
}

//! Event detection for polled devices.

use super::{ChangeDetector, DetectionState};
use crate::extractor::weight::WeightParser;
use crate::types::{Event, Sample, SampleData};
use tracing::trace;

/// Treats every parseable device reply as an event.
///
/// The polling cadence already spaces readings out, so there is no
/// thresholding or debounce here. Replies that do not parse are dropped
/// without an error.
pub struct PollDetector {
    parser: WeightParser,
    state: DetectionState,
}

impl PollDetector {
    pub fn new(parser: WeightParser) -> Self {
        Self {
            parser,
            state: DetectionState::default(),
        }
    }
}

impl ChangeDetector for PollDetector {
    fn observe(&mut self, sample: Sample) -> Option<Event> {
        let SampleData::Bytes(bytes) = &sample.data else {
            trace!("Poll detector ignoring frame sample");
            return None;
        };

        if let Err(reason) = self.parser.parse(bytes) {
            trace!(%reason, "No reading in device reply");
            return None;
        }

        let triggered_at = sample.captured_at;
        self.state.last_trigger = Some(triggered_at);
        self.state.events += 1;

        Some(Event {
            sample,
            triggered_at,
            magnitude: 0,
        })
    }

    fn state(&self) -> &DetectionState {
        &self.state
    }
}

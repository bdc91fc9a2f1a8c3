//! Payload extraction.
//!
//! An extractor turns a triggering [`Event`] into a [`Payload`]. Extraction
//! is a pure function of the event: running it twice on the same event gives
//! the same payload, and it never touches sampler or detector state.

use crate::error::ExtractionError;
use crate::types::{Event, Payload};

pub mod classify;
pub mod weight;

pub use classify::ClassificationExtractor;
pub use weight::{parse_weight, WeightExtractor, WeightParser};

/// The extraction strategy for a pipeline.
pub enum Extractor {
    /// Annotate a frame and report the single recognised item.
    Classification(ClassificationExtractor),
    /// Parse a framed scale response.
    Weight(WeightExtractor),
}

impl Extractor {
    /// Extract a payload from an event.
    ///
    /// Takes the event by value so it can be moved into a spawned task.
    pub async fn extract(&self, event: Event) -> Result<Payload, ExtractionError> {
        match self {
            Extractor::Classification(extractor) => extractor.extract(&event).await,
            Extractor::Weight(extractor) => extractor.extract(&event),
        }
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Extractor::Classification(_) => "classification",
            Extractor::Weight(_) => "weight",
        }
    }
}

impl From<ClassificationExtractor> for Extractor {
    fn from(extractor: ClassificationExtractor) -> Self {
        Extractor::Classification(extractor)
    }
}

impl From<WeightExtractor> for Extractor {
    fn from(extractor: WeightExtractor) -> Self {
        Extractor::Weight(extractor)
    }
}

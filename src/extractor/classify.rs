//! Item classification from annotated frames.

use crate::annotation::{Annotation, AnnotationBackend};
use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::types::{Event, Payload, SampleData};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Turns a triggering frame into a single recognised item.
///
/// Annotations are filtered to the configured categories, optionally
/// translated, and counted by label. The frame must show exactly one kind of
/// item: several distinct labels are rejected as ambiguous rather than
/// resolved by picking one.
pub struct ClassificationExtractor {
    backend: Box<dyn AnnotationBackend>,
    categories: BTreeMap<String, String>,
    translate: bool,
    min_confidence: f32,
}

impl ClassificationExtractor {
    pub fn new(backend: Box<dyn AnnotationBackend>, config: &ExtractionConfig) -> Self {
        let categories = config
            .categories()
            .into_iter()
            .map(|(label, translation)| (label.to_lowercase(), translation))
            .collect();

        Self {
            backend,
            categories,
            translate: config.translate,
            min_confidence: config.min_confidence,
        }
    }

    /// Canonical label for an annotation, or `None` if it is not a recognised category.
    fn canonical_label(&self, annotation: &Annotation) -> Option<String> {
        if annotation.score < self.min_confidence {
            return None;
        }
        let key = annotation.label.to_lowercase();
        let translation = self.categories.get(&key)?;
        Some(if self.translate {
            translation.clone()
        } else {
            key
        })
    }

    /// Reduce annotations to one `(label, count)` pair.
    ///
    /// Pure function of the annotations and the configuration.
    pub fn summarize(&self, annotations: &[Annotation]) -> Result<(String, usize), ExtractionError> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for label in annotations.iter().filter_map(|a| self.canonical_label(a)) {
            match counts.iter_mut().find(|(seen, _)| *seen == label) {
                Some((_, count)) => *count += 1,
                None => counts.push((label, 1)),
            }
        }

        match counts.len() {
            0 => {
                info!("No recognised item in frame");
                Err(ExtractionError::NothingRecognized)
            }
            1 => Ok(counts.remove(0)),
            _ => {
                let labels: Vec<String> = counts.into_iter().map(|(label, _)| label).collect();
                warn!(
                    labels = %labels.join(", "),
                    "Several kinds of item recognised, only one may be present"
                );
                Err(ExtractionError::Ambiguous { labels })
            }
        }
    }

    pub async fn extract(&self, event: &Event) -> Result<Payload, ExtractionError> {
        let SampleData::Frame(frame) = &event.sample.data else {
            return Err(ExtractionError::UnsupportedSample(
                "classification needs a frame sample",
            ));
        };

        let annotations = self.backend.annotate(frame).await?;
        debug!(
            backend = self.backend.name(),
            "Received {} annotations",
            annotations.len()
        );

        let (label, count) = self.summarize(&annotations)?;
        info!(label = %label, count, "Item recognised");
        Ok(Payload::classification(label, count, event.triggered_at))
    }
}

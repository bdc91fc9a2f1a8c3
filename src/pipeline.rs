//! The detection loop.
//!
//! [`Pipeline::run`] is a blocking loop: it pulls samples, runs them through
//! the change detector and, for every event, spawns an extraction task on a
//! tokio runtime. Extraction results go to the dispatcher. The loop never
//! waits for extraction, so a slow annotation service cannot stall sampling;
//! when more than `max_in_flight` extractions are running, new events are
//! dropped with a warning instead of queueing without bound.

use crate::detector::ChangeDetector;
use crate::dispatch::DispatcherHandle;
use crate::error::{ExtractionError, RelayError};
use crate::extractor::Extractor;
use crate::sampler::Sampler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Counters for one run of the detection loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Samples read from the sampler
    pub samples: u64,
    /// Events raised by the detector
    pub events: u64,
    /// Events dropped because the extraction pool was full
    pub dropped: u64,
}

pub struct Pipeline<S: Sampler, D: ChangeDetector> {
    sampler: S,
    detector: D,
    extractor: Arc<Extractor>,
    dispatcher: DispatcherHandle,
    runtime: Handle,
    permits: Arc<Semaphore>,
    stop: Arc<AtomicBool>,
}

impl<S: Sampler, D: ChangeDetector> Pipeline<S, D> {
    /// # Arguments
    ///
    /// * `runtime` - Runtime the extraction tasks are spawned on
    /// * `max_in_flight` - Upper bound on concurrently running extractions
    pub fn new(
        sampler: S,
        detector: D,
        extractor: Extractor,
        dispatcher: DispatcherHandle,
        runtime: Handle,
        max_in_flight: usize,
    ) -> Self {
        Self {
            sampler,
            detector,
            extractor: Arc::new(extractor),
            dispatcher,
            runtime,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an externally owned stop flag, e.g. one set by a signal handler.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Flag that ends the loop after the current sample when set.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run until the sampler is exhausted, the stop flag is set or the
    /// sampler fails.
    ///
    /// Consumes the pipeline, so the sampler and its device are released on
    /// every way out. Extraction tasks still running keep their own
    /// dispatcher handles and finish on the runtime.
    pub fn run(self) -> Result<PipelineReport, RelayError> {
        let Pipeline {
            mut sampler,
            mut detector,
            extractor,
            dispatcher,
            runtime,
            permits,
            stop,
        } = self;

        info!(
            sampler = sampler.name(),
            extractor = extractor.name(),
            "Detection loop started"
        );
        let mut report = PipelineReport::default();

        let outcome = loop {
            if stop.load(Ordering::SeqCst) {
                info!("Stop requested");
                break Ok(());
            }

            let sample = match sampler.next_sample() {
                Ok(Some(sample)) => sample,
                Ok(None) => {
                    info!("{} has no more samples", sampler.name());
                    break Ok(());
                }
                Err(e) => {
                    error!("Sampler {} failed: {}", sampler.name(), e);
                    break Err(e);
                }
            };
            report.samples += 1;

            let Some(event) = detector.observe(sample) else {
                continue;
            };
            report.events += 1;

            let permit = match Arc::clone(&permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        magnitude = event.magnitude,
                        "Extraction pool is full, dropping event"
                    );
                    report.dropped += 1;
                    continue;
                }
            };

            let extractor = Arc::clone(&extractor);
            let dispatcher = dispatcher.clone();
            runtime.spawn(async move {
                let _permit = permit;
                match extractor.extract(event).await {
                    Ok(payload) => {
                        if let Err(e) = dispatcher.send(payload).await {
                            error!("Failed to queue payload: {}", e);
                        }
                    }
                    Err(e) => log_extraction_failure(&e),
                }
            });
        };

        drop(sampler);
        info!(
            samples = report.samples,
            events = report.events,
            dropped = report.dropped,
            "Detection loop stopped"
        );
        outcome.map(|()| report).map_err(RelayError::from)
    }
}

/// Extraction failures are expected now and then; their level depends on
/// how interesting they are to an operator.
fn log_extraction_failure(err: &ExtractionError) {
    match err {
        ExtractionError::Weight(e) => debug!("Scale response skipped: {}", e),
        ExtractionError::NothingRecognized => info!("{}", err),
        ExtractionError::Ambiguous { .. } => warn!("{}", err),
        ExtractionError::Annotation(_) | ExtractionError::UnsupportedSample(_) => {
            error!("{}", err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::detector::{DetectionState, PollDetector};
    use crate::dispatch::{Dispatcher, LegacyLabelCodec, WebSocketTransport};
    use crate::error::SamplerError;
    use crate::extractor::{WeightExtractor, WeightParser};
    use crate::types::{Event, Sample};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use tokio::runtime::Runtime;
    use tracing_test::traced_test;

    /// Replays fixed byte blocks, then ends or fails.
    struct ScriptedSampler {
        replies: VecDeque<Vec<u8>>,
        fail_at_end: bool,
        released: Arc<AtomicBool>,
    }

    impl ScriptedSampler {
        fn new(replies: &[&[u8]]) -> Self {
            Self {
                replies: replies.iter().map(|r| r.to_vec()).collect(),
                fail_at_end: false,
                released: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Sampler for ScriptedSampler {
        fn next_sample(&mut self) -> Result<Option<Sample>, SamplerError> {
            match self.replies.pop_front() {
                Some(bytes) => Ok(Some(Sample::bytes(bytes))),
                None if self.fail_at_end => Err(SamplerError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "device unplugged",
                ))),
                None => Ok(None),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    impl Drop for ScriptedSampler {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Raises an event for every sample.
    struct EveryDetector {
        state: DetectionState,
        seen: Arc<AtomicUsize>,
    }

    impl ChangeDetector for EveryDetector {
        fn observe(&mut self, sample: Sample) -> Option<Event> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Some(Event {
                triggered_at: sample.captured_at,
                sample,
                magnitude: 1,
            })
        }

        fn state(&self) -> &DetectionState {
            &self.state
        }
    }

    fn weight_extractor() -> Extractor {
        WeightExtractor::new(WeightParser::default()).into()
    }

    /// A dispatcher that is never run; payloads just sit in its queue.
    fn idle_dispatcher() -> (
        Dispatcher<WebSocketTransport, LegacyLabelCodec>,
        DispatcherHandle,
    ) {
        Dispatcher::new(
            WebSocketTransport::new("ws://127.0.0.1:9"),
            LegacyLabelCodec,
            &DispatchConfig::default(),
        )
    }

    #[test]
    fn test_counts_samples_and_events() {
        let runtime = Runtime::new().unwrap();
        let (_dispatcher, handle) = idle_dispatcher();
        let sampler = ScriptedSampler::new(&[b"\x02000100g", b"noise", b"\x02000200g"]);
        let released = Arc::clone(&sampler.released);

        let pipeline = Pipeline::new(
            sampler,
            PollDetector::new(WeightParser::default()),
            weight_extractor(),
            handle,
            runtime.handle().clone(),
            4,
        );
        let report = pipeline.run().unwrap();

        assert_eq!(
            report,
            PipelineReport {
                samples: 3,
                events: 2,
                dropped: 0
            }
        );
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_sampler_error_is_fatal_and_releases_device() {
        let runtime = Runtime::new().unwrap();
        let (_dispatcher, handle) = idle_dispatcher();
        let mut sampler = ScriptedSampler::new(&[b"\x02000100g"]);
        sampler.fail_at_end = true;
        let released = Arc::clone(&sampler.released);

        let pipeline = Pipeline::new(
            sampler,
            PollDetector::new(WeightParser::default()),
            weight_extractor(),
            handle,
            runtime.handle().clone(),
            4,
        );

        match pipeline.run() {
            Err(RelayError::Sampler(SamplerError::Io(e))) => {
                assert_eq!(e.kind(), io::ErrorKind::BrokenPipe)
            }
            other => panic!("Expected sampler error, got {:?}", other),
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_flag_ends_loop_before_sampling() {
        let runtime = Runtime::new().unwrap();
        let (_dispatcher, handle) = idle_dispatcher();
        let seen = Arc::new(AtomicUsize::new(0));
        let detector = EveryDetector {
            state: DetectionState::default(),
            seen: Arc::clone(&seen),
        };

        let pipeline = Pipeline::new(
            ScriptedSampler::new(&[b"a", b"b"]),
            detector,
            weight_extractor(),
            handle,
            runtime.handle().clone(),
            4,
        );
        pipeline.stop_flag().store(true, Ordering::SeqCst);

        assert_eq!(pipeline.run().unwrap(), PipelineReport::default());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[traced_test]
    fn test_full_pool_drops_events() {
        let runtime = Runtime::new().unwrap();
        let (_dispatcher, handle) = idle_dispatcher();
        let seen = Arc::new(AtomicUsize::new(0));
        let detector = EveryDetector {
            state: DetectionState::default(),
            seen: Arc::clone(&seen),
        };

        let pipeline = Pipeline::new(
            ScriptedSampler::new(&[b"\x02000001g", b"\x02000002g", b"\x02000003g"]),
            detector,
            weight_extractor(),
            handle,
            runtime.handle().clone(),
            1,
        );
        // hold the only permit, as a stuck extraction would
        let held = Arc::clone(&pipeline.permits).try_acquire_owned().unwrap();
        let report = pipeline.run().unwrap();
        drop(held);

        assert_eq!(report.events, 3);
        assert_eq!(report.dropped, 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert!(logs_contain("Extraction pool is full"));
    }
}

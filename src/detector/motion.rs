//! Frame differencing motion detector.

use super::{ChangeDetector, DetectionState};
use crate::config::MotionConfig;
use crate::types::{Event, Sample, SampleData};
use image::{imageops, GrayImage, RgbImage};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Value written into the binary mask for a changed pixel.
const MASK_VALUE: u64 = 255;

/// Detects a change between consecutive frames.
///
/// Each frame is converted to grayscale and smoothed, then compared with the
/// previous frame. Pixels whose absolute difference exceeds the pixel
/// threshold count as changed, each contributing 255 to the mask sum. An
/// event fires when the mask sum exceeds the magnitude threshold and the
/// debounce interval has elapsed since the last event. The baseline is always
/// replaced by the current frame.
pub struct MotionDetector {
    blur_sigma: f32,
    pixel_threshold: u8,
    magnitude_threshold: u64,
    debounce: Duration,
    state: DetectionState,
}

impl MotionDetector {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            blur_sigma: config.blur_sigma,
            pixel_threshold: config.pixel_threshold,
            magnitude_threshold: config.magnitude_threshold,
            debounce: config.debounce(),
            state: DetectionState::default(),
        }
    }

    /// Grayscale and smooth a frame the way every frame is compared.
    pub fn preprocess(&self, frame: &RgbImage) -> GrayImage {
        let gray = imageops::grayscale(frame);
        if self.blur_sigma > 0.0 {
            imageops::blur(&gray, self.blur_sigma)
        } else {
            gray
        }
    }
}

/// Sum of the binary change mask between two preprocessed frames.
///
/// Frames of different sizes are not comparable and yield zero.
pub fn mask_sum(previous: &GrayImage, current: &GrayImage, pixel_threshold: u8) -> u64 {
    if previous.dimensions() != current.dimensions() {
        return 0;
    }
    previous
        .as_raw()
        .iter()
        .zip(current.as_raw())
        .filter(|(a, b)| a.abs_diff(**b) > pixel_threshold)
        .count() as u64
        * MASK_VALUE
}

impl ChangeDetector for MotionDetector {
    fn observe(&mut self, sample: Sample) -> Option<Event> {
        let SampleData::Frame(frame) = &sample.data else {
            warn!("Motion detector ignoring non-frame sample");
            return None;
        };

        let current = self.preprocess(frame);
        let Some(previous) = self.state.previous.replace(current) else {
            // first frame: becomes the baseline and arms the debounce clock
            self.state.last_trigger = Some(sample.captured_at);
            return None;
        };
        let current = self.state.previous.as_ref()?;

        let magnitude = mask_sum(&previous, current, self.pixel_threshold);
        self.state.last_magnitude = magnitude;
        if magnitude <= self.magnitude_threshold {
            return None;
        }

        let settled = match self.state.last_trigger {
            Some(last) => (sample.captured_at - last)
                .to_std()
                .map(|elapsed| elapsed >= self.debounce)
                .unwrap_or(false),
            None => true,
        };
        if !settled {
            debug!(magnitude, "Change within debounce window, ignored");
            return None;
        }

        let triggered_at = sample.captured_at;
        self.state.last_trigger = Some(triggered_at);
        self.state.events += 1;
        info!(magnitude, "Motion detected, capturing frame");

        Some(Event {
            sample,
            triggered_at,
            magnitude,
        })
    }

    fn state(&self) -> &DetectionState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration, Local};
    use image::{Luma, Rgb};

    fn config() -> MotionConfig {
        MotionConfig {
            blur_sigma: 0.0,
            ..MotionConfig::default()
        }
    }

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(64, 64, Rgb([value, value, value]))
    }

    fn at(start: DateTime<Local>, millis: i64) -> DateTime<Local> {
        start + ChronoDuration::milliseconds(millis)
    }

    #[test]
    fn test_mask_sum_counts_changed_pixels() {
        let a = GrayImage::from_pixel(10, 10, Luma([0]));
        let mut b = a.clone();
        b.put_pixel(0, 0, Luma([31]));
        b.put_pixel(1, 0, Luma([30]));
        b.put_pixel(2, 0, Luma([200]));

        // 30 is not above the threshold of 30
        assert_eq!(mask_sum(&a, &b, 30), 2 * 255);
        assert_eq!(mask_sum(&a, &a, 30), 0);
    }

    #[test]
    fn test_mask_sum_size_mismatch_is_zero() {
        let a = GrayImage::from_pixel(10, 10, Luma([0]));
        let b = GrayImage::from_pixel(5, 5, Luma([255]));
        assert_eq!(mask_sum(&a, &b, 30), 0);
    }

    #[test]
    fn test_first_frame_only_sets_baseline() {
        let mut detector = MotionDetector::new(&config());
        let start = Local::now();

        assert!(detector.observe(Sample::frame_at(solid(0), start)).is_none());
        assert!(detector.state().previous.is_some());
        assert_eq!(detector.state().last_trigger, Some(start));
    }

    #[test]
    fn test_below_threshold_never_fires() {
        let mut detector = MotionDetector::new(&config());
        let start = Local::now();
        detector.observe(Sample::frame_at(solid(0), start));

        // 196 changed pixels * 255 = 49980, just under the threshold
        let mut frame = solid(0);
        for i in 0..196 {
            frame.put_pixel(i % 64, i / 64, Rgb([255, 255, 255]));
        }
        let event = detector.observe(Sample::frame_at(frame, at(start, 10_000)));
        assert!(event.is_none());
        assert_eq!(detector.state().last_magnitude, 49_980);
    }

    #[test]
    fn test_fires_after_debounce_and_resets_clock() {
        let mut detector = MotionDetector::new(&config());
        let start = Local::now();
        detector.observe(Sample::frame_at(solid(0), start));

        // large change but too soon after the baseline frame
        assert!(detector
            .observe(Sample::frame_at(solid(255), at(start, 1_000)))
            .is_none());

        // baseline moved to the white frame, so change back to black
        let event = detector
            .observe(Sample::frame_at(solid(0), at(start, 3_000)))
            .expect("event after debounce");
        assert_eq!(event.triggered_at, at(start, 3_000));
        assert_eq!(event.magnitude, 64 * 64 * 255);
        assert_eq!(detector.state().last_trigger, Some(at(start, 3_000)));

        // the clock restarted at the trigger
        assert!(detector
            .observe(Sample::frame_at(solid(255), at(start, 5_999)))
            .is_none());
        assert!(detector
            .observe(Sample::frame_at(solid(0), at(start, 6_000)))
            .is_some());
        assert_eq!(detector.state().events, 2);
    }

    #[test]
    fn test_baseline_is_previous_frame_not_reference() {
        let mut detector = MotionDetector::new(&config());
        let start = Local::now();
        detector.observe(Sample::frame_at(solid(0), start));
        detector.observe(Sample::frame_at(solid(255), at(start, 100)));

        // identical to the previous frame: no change even though it differs from the first
        assert!(detector
            .observe(Sample::frame_at(solid(255), at(start, 10_000)))
            .is_none());
        assert_eq!(detector.state().last_magnitude, 0);
    }

    #[test]
    fn test_smoothing_suppresses_single_pixel_noise() {
        let mut detector = MotionDetector::new(&MotionConfig::default());
        let start = Local::now();
        detector.observe(Sample::frame_at(solid(0), start));

        let mut noisy = solid(0);
        noisy.put_pixel(32, 32, Rgb([255, 255, 255]));
        assert!(detector
            .observe(Sample::frame_at(noisy, at(start, 10_000)))
            .is_none());
        assert!(detector.state().last_magnitude <= 50_000);
    }

    #[test]
    fn test_event_carries_triggering_frame() {
        let mut detector = MotionDetector::new(&config());
        let start = Local::now();
        detector.observe(Sample::frame_at(solid(0), start));

        let event = detector
            .observe(Sample::frame_at(solid(128), at(start, 4_000)))
            .unwrap();
        assert_eq!(event.sample.data, SampleData::Frame(solid(128)));
    }
}

//! Core data types that flow through the relay pipeline.
//!
//! A [`Sample`] is produced by a sampler, judged by a change detector, and
//! when it represents a state change it is wrapped in an [`Event`] and moved
//! into an extraction task. Extraction produces an immutable [`Payload`] that
//! is handed to the dispatcher by value.

use chrono::{DateTime, Local};
use image::RgbImage;

/// Raw sensor data carried by a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    /// A colour camera frame.
    Frame(RgbImage),
    /// A raw byte block read from a polled device.
    Bytes(Vec<u8>),
}

/// One unit of sensor input together with its capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// The captured data
    pub data: SampleData,
    /// Wall-clock time at which the data was captured
    pub captured_at: DateTime<Local>,
}

impl Sample {
    /// Create a frame sample captured now.
    pub fn frame(frame: RgbImage) -> Self {
        Self::frame_at(frame, Local::now())
    }

    /// Create a frame sample with an explicit capture time.
    pub fn frame_at(frame: RgbImage, captured_at: DateTime<Local>) -> Self {
        Self {
            data: SampleData::Frame(frame),
            captured_at,
        }
    }

    /// Create a byte block sample captured now.
    pub fn bytes(bytes: Vec<u8>) -> Self {
        Self::bytes_at(bytes, Local::now())
    }

    /// Create a byte block sample with an explicit capture time.
    pub fn bytes_at(bytes: Vec<u8>, captured_at: DateTime<Local>) -> Self {
        Self {
            data: SampleData::Bytes(bytes),
            captured_at,
        }
    }
}

/// A sample judged to represent a state change worth reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The sample that triggered the event
    pub sample: Sample,
    /// When the trigger condition was met
    pub triggered_at: DateTime<Local>,
    /// Size of the change that caused the trigger (mask sum for frames, zero for polled reads)
    pub magnitude: u64,
}

/// The structured result of an extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadKind {
    /// A scale reading in grams.
    Weight { grams: u64 },
    /// A single recognised item category and how many instances were seen.
    Classification { label: String, count: usize },
}

/// An extracted payload ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub kind: PayloadKind,
    /// Trigger time of the event the payload was extracted from
    pub timestamp: DateTime<Local>,
}

impl Payload {
    pub fn weight(grams: u64, timestamp: DateTime<Local>) -> Self {
        Self {
            kind: PayloadKind::Weight { grams },
            timestamp,
        }
    }

    pub fn classification(label: impl Into<String>, count: usize, timestamp: DateTime<Local>) -> Self {
        Self {
            kind: PayloadKind::Classification {
                label: label.into(),
                count,
            },
            timestamp,
        }
    }

    /// Envelope tag used on the wire for this payload kind.
    pub fn tag(&self) -> &'static str {
        match self.kind {
            PayloadKind::Weight { .. } => "peso",
            PayloadKind::Classification { .. } => "fruta",
        }
    }
}

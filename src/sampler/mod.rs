//! Sensor samplers.
//!
//! A [`Sampler`] hands out one [`Sample`] at a time to the detection loop.
//! Two kinds of source are supported:
//!
//! - **Frame sources** such as [`DirectorySampler`], which replays image files
//!   in name order
//! - **Polled devices** through [`PolledSampler`], which drives any
//!   [`PolledDevice`] with a request/settle/read cycle on a fixed cadence
//!
//! Any error returned by a sampler is fatal to the pipeline. Device handles
//! are owned by the sampler and released when it is dropped.

use crate::error::SamplerError;
use crate::types::Sample;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[cfg(feature = "serial")]
pub mod serial;
pub mod simulated;

#[cfg(feature = "serial")]
pub use serial::SerialScale;
pub use simulated::SimulatedScale;

/// A source of samples.
pub trait Sampler: Send {
    /// Produce the next sample.
    ///
    /// Returns `Ok(None)` when the source is exhausted. May block for at most
    /// one sample interval.
    fn next_sample(&mut self) -> Result<Option<Sample>, SamplerError>;

    /// Human readable name used in logs
    fn name(&self) -> &str;
}

/// Replays the image files of a directory as camera frames.
pub struct DirectorySampler {
    name: String,
    frames: Vec<PathBuf>,
    position: usize,
    interval: Duration,
    resize: Option<(u32, u32)>,
    last_frame: Option<Instant>,
}

impl DirectorySampler {
    /// Open a directory of frames.
    ///
    /// Only files whose extension maps to an `image/*` MIME type are used.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory holding the frames
    /// * `interval` - Minimum time between two frames
    /// * `resize` - Optional `(width, height)` every frame is resized to
    pub fn open<P: AsRef<Path>>(
        dir: P,
        interval: Duration,
        resize: Option<(u32, u32)>,
    ) -> Result<Self, SamplerError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| SamplerError::Open {
            device: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut frames = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                frames.push(path);
            }
        }
        frames.sort();

        debug!("Found {} frames in {}", frames.len(), dir.display());

        Ok(Self {
            name: format!("frames:{}", dir.display()),
            frames,
            position: 0,
            interval,
            resize,
            last_frame: None,
        })
    }

    /// Number of frames left to replay
    pub fn remaining(&self) -> usize {
        self.frames.len() - self.position
    }
}

fn is_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .unwrap_or(false)
}

impl Sampler for DirectorySampler {
    fn next_sample(&mut self) -> Result<Option<Sample>, SamplerError> {
        let Some(path) = self.frames.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;

        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());

        let image = image::open(path).map_err(|e| SamplerError::Decode {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let image = match self.resize {
            Some((width, height)) if image.width() != width || image.height() != height => {
                image.resize_exact(width, height, image::imageops::FilterType::Triangle)
            }
            _ => image,
        };

        trace!("Replaying frame {}", path.display());
        Ok(Some(Sample::frame(image.to_rgb8())))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A device that answers a single-byte request with a block of bytes.
pub trait PolledDevice: Send {
    /// Discard anything already waiting in the input buffer.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Send the request code.
    fn write_request(&mut self, code: u8) -> io::Result<()>;

    /// Read whatever bytes are currently available, possibly none.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;

    fn name(&self) -> &str;
}

/// Polls a [`PolledDevice`] on a fixed cadence.
///
/// Each call to [`Sampler::next_sample`] waits until the cadence has elapsed
/// since the previous poll, clears the input, writes the request code, waits
/// the settle interval and returns the bytes that arrived.
pub struct PolledSampler<D: PolledDevice> {
    device: D,
    request_code: u8,
    settle: Duration,
    cadence: Duration,
    last_poll: Option<Instant>,
}

impl<D: PolledDevice> PolledSampler<D> {
    pub fn new(device: D, request_code: u8, settle: Duration, cadence: Duration) -> Self {
        Self {
            device,
            request_code,
            settle,
            cadence,
            last_poll: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn poll(&mut self) -> io::Result<Vec<u8>> {
        self.device.clear_input()?;
        self.device.write_request(self.request_code)?;
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        self.device.read_available()
    }
}

impl<D: PolledDevice> Sampler for PolledSampler<D> {
    fn next_sample(&mut self) -> Result<Option<Sample>, SamplerError> {
        if let Some(last) = self.last_poll {
            let elapsed = last.elapsed();
            if elapsed < self.cadence {
                std::thread::sleep(self.cadence - elapsed);
            }
        }
        self.last_poll = Some(Instant::now());

        let bytes = self.poll()?;
        trace!("{} answered with {} bytes", self.device.name(), bytes.len());
        Ok(Some(Sample::bytes(bytes)))
    }

    fn name(&self) -> &str {
        self.device.name()
    }
}

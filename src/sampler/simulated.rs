//! A software stand-in for a serial scale.
//!
//! Answers the request code with the same framing a real scale uses
//! (`STX`, six digits, unit, `CR LF`) and occasionally with line noise, so
//! the whole scale pipeline can be exercised without hardware.

use super::PolledDevice;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;

pub struct SimulatedScale {
    rng: StdRng,
    pending: Option<Vec<u8>>,
    grams: u64,
    noise_ratio: f64,
}

impl SimulatedScale {
    /// Create a simulated scale with a fixed seed, for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            pending: None,
            grams: 0,
            noise_ratio: 0.1,
        }
    }

    /// Create a simulated scale seeded from the OS.
    pub fn new() -> Self {
        Self::with_seed(rand::thread_rng().gen())
    }

    /// Fraction of replies that are garbage instead of a framed reading
    pub fn with_noise_ratio(mut self, ratio: f64) -> Self {
        self.noise_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    fn next_reply(&mut self) -> Vec<u8> {
        if self.rng.gen_bool(self.noise_ratio) {
            let len = self.rng.gen_range(0..8);
            return (0..len).map(|_| self.rng.gen_range(0x20..0x7f)).collect();
        }

        // items are placed and removed now and then; the reading drifts a little
        if self.rng.gen_bool(0.2) {
            self.grams = self.rng.gen_range(0..5_000);
        } else if self.grams > 0 {
            let drift: i64 = self.rng.gen_range(-2..=2);
            self.grams = self.grams.saturating_add_signed(drift);
        }

        format!("\x02{:06}g\r\n", self.grams).into_bytes()
    }
}

impl Default for SimulatedScale {
    fn default() -> Self {
        Self::new()
    }
}

impl PolledDevice for SimulatedScale {
    fn clear_input(&mut self) -> io::Result<()> {
        self.pending = None;
        Ok(())
    }

    fn write_request(&mut self, code: u8) -> io::Result<()> {
        if code == 0x05 {
            self.pending = Some(self.next_reply());
        }
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.pending.take().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "simulated-scale"
    }
}

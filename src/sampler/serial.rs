//! Serial scale access through the `serialport` crate.

use super::PolledDevice;
use crate::config::{Parity, ScaleConfig};
use crate::error::SamplerError;
use serialport::{ClearBuffer, DataBits, SerialPort, StopBits};
use std::io::{self, Read, Write};
use tracing::{debug, info};

/// A weighing scale on an RS-232 line.
///
/// The port is closed when the value is dropped.
pub struct SerialScale {
    port_name: String,
    port: Box<dyn SerialPort>,
}

impl SerialScale {
    /// Open the port described by `config`.
    pub fn open(config: &ScaleConfig) -> Result<Self, SamplerError> {
        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(config.timeout())
            .open()
            .map_err(|e| SamplerError::Open {
                device: config.port.clone(),
                reason: e.to_string(),
            })?;

        info!(
            "Serial port '{}' opened at {} baud",
            config.port, config.baud_rate
        );

        Ok(Self {
            port_name: config.port.clone(),
            port,
        })
    }
}

impl PolledDevice for SerialScale {
    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn write_request(&mut self, code: u8) -> io::Result<()> {
        self.port.write_all(&[code])?;
        self.port.flush()
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let waiting = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        if waiting == 0 {
            return Ok(Vec::new());
        }
        let mut buffer = vec![0u8; waiting];
        let read = self.port.read(&mut buffer)?;
        buffer.truncate(read);
        Ok(buffer)
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

impl Drop for SerialScale {
    fn drop(&mut self) {
        debug!("Serial port '{}' closed", self.port_name);
    }
}

//! Weight extraction from framed scale responses.
//!
//! A scale answers a poll with text such as `"\x02012345g\r\n"`: a start
//! marker, a fixed-width numeric field and a unit. Responses are frequently
//! truncated or mixed with line noise, so a failed parse is an ordinary
//! outcome rather than an error worth surfacing.

use crate::config::ScaleConfig;
use crate::error::{ExtractionError, WeightParseError};
use crate::types::{Event, Payload, SampleData};
use tracing::info;

/// Parses the numeric field that follows the last framing marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightParser {
    marker: u8,
    max_chars: usize,
}

impl Default for WeightParser {
    fn default() -> Self {
        Self {
            marker: 0x02,
            max_chars: 6,
        }
    }
}

impl WeightParser {
    /// # Arguments
    ///
    /// * `marker` - ASCII byte that precedes the numeric field
    /// * `max_chars` - Characters after the marker that may hold digits
    pub fn new(marker: u8, max_chars: usize) -> Self {
        Self { marker, max_chars }
    }

    pub fn from_config(config: &ScaleConfig) -> Self {
        Self::new(config.marker, config.max_digits)
    }

    /// Parse a raw response.
    ///
    /// Bytes that are not valid UTF-8 are dropped. The text after the last
    /// marker is cut to `max_chars` characters, every non-digit is removed and
    /// the rest is read as an unsigned integer.
    pub fn parse(&self, raw: &[u8]) -> Result<u64, WeightParseError> {
        let text: String = String::from_utf8_lossy(raw)
            .chars()
            .filter(|c| *c != char::REPLACEMENT_CHARACTER)
            .collect();

        let (_, tail) = text
            .rsplit_once(char::from(self.marker))
            .ok_or(WeightParseError::NoMarker)?;

        let digits: String = tail
            .chars()
            .take(self.max_chars)
            .filter(char::is_ascii_digit)
            .collect();
        if digits.is_empty() {
            return Err(WeightParseError::NoDigits);
        }

        digits
            .parse::<u64>()
            .map_err(|_| WeightParseError::Invalid(digits))
    }
}

/// Parse a response with the default framing, returning `None` on any failure.
pub fn parse_weight(raw: &[u8]) -> Option<u64> {
    WeightParser::default().parse(raw).ok()
}

/// Turns scale reply events into weight payloads.
#[derive(Debug, Clone)]
pub struct WeightExtractor {
    parser: WeightParser,
}

impl WeightExtractor {
    pub fn new(parser: WeightParser) -> Self {
        Self { parser }
    }

    pub fn extract(&self, event: &Event) -> Result<Payload, ExtractionError> {
        let SampleData::Bytes(raw) = &event.sample.data else {
            return Err(ExtractionError::UnsupportedSample(
                "weight extraction needs a byte sample",
            ));
        };
        let grams = self.parser.parse(raw)?;
        info!(grams, "Weight read");
        Ok(Payload::weight(grams, event.triggered_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PayloadKind, Sample};
    use image::RgbImage;

    #[test]
    fn test_parse_framed_reading() {
        let parser = WeightParser::default();
        assert_eq!(parser.parse(b"\x02012345g\r\n"), Ok(12345));
        assert_eq!(parse_weight(b"\x02012345g\r\n"), Some(12345));
    }

    #[test]
    fn test_truncates_to_leading_characters() {
        // only "012345" is considered, the trailing digits are ignored
        assert_eq!(parse_weight(b"\x0201234599\r\n"), Some(12345));
        // non-digits inside the window are stripped, not treated as terminators
        assert_eq!(parse_weight(b"\x02 1 2 3 4"), Some(123));
    }

    #[test]
    fn test_uses_last_marker() {
        assert_eq!(parse_weight(b"\x02000999g\r\n\x02000120g\r\n"), Some(120));
    }

    #[test]
    fn test_no_marker_is_no_value() {
        let parser = WeightParser::default();
        assert_eq!(parser.parse(b"012345g\r\n"), Err(WeightParseError::NoMarker));
        assert_eq!(parse_weight(b""), None);
        assert_eq!(parse_weight(b"000000"), None);
    }

    #[test]
    fn test_no_digits_is_no_value() {
        let parser = WeightParser::default();
        assert_eq!(parser.parse(b"\x02g\r\n"), Err(WeightParseError::NoDigits));
        assert_eq!(parser.parse(b"\x02"), Err(WeightParseError::NoDigits));
    }

    #[test]
    fn test_invalid_utf8_is_dropped() {
        assert_eq!(parse_weight(b"\xff\x02\xfe000250g"), Some(250));
    }

    #[test]
    fn test_overflow_is_invalid() {
        let parser = WeightParser::new(0x02, 30);
        assert!(matches!(
            parser.parse(b"\x0299999999999999999999999"),
            Err(WeightParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_extract_weight_payload() {
        let extractor = WeightExtractor::new(WeightParser::default());
        let sample = Sample::bytes(b"\x02000480g\r\n".to_vec());
        let event = Event {
            triggered_at: sample.captured_at,
            sample,
            magnitude: 0,
        };

        let payload = extractor.extract(&event).unwrap();
        assert_eq!(payload.kind, PayloadKind::Weight { grams: 480 });
        assert_eq!(payload.timestamp, event.triggered_at);
        assert_eq!(extractor.extract(&event).unwrap(), payload);
    }

    #[test]
    fn test_extract_rejects_frames() {
        let extractor = WeightExtractor::new(WeightParser::default());
        let sample = Sample::frame(RgbImage::new(1, 1));
        let event = Event {
            triggered_at: sample.captured_at,
            sample,
            magnitude: 1,
        };
        assert!(matches!(
            extractor.extract(&event),
            Err(ExtractionError::UnsupportedSample(_))
        ));
    }
}

//! Relay configuration.
//!
//! Configuration is layered with figment:
//! 1. Built-in defaults ([`RelayConfig::default`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `SENSOR_RELAY_`, using `__` to
//!    separate sections
//!
//! ```text
//! SENSOR_RELAY_DISPATCH__URI=ws://broker.local:3000
//! SENSOR_RELAY_MOTION__DEBOUNCE_MS=5000
//! SENSOR_RELAY_ANNOTATION__API_KEY=...
//! ```

use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SENSOR_RELAY_";

/// Top-level relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub dispatch: DispatchConfig,
    pub motion: MotionConfig,
    pub frames: FrameSourceConfig,
    pub scale: ScaleConfig,
    pub annotation: AnnotationConfig,
    pub extraction: ExtractionConfig,
}

/// Wire format used for outgoing messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    /// Tagged JSON envelope
    #[default]
    Envelope,
    /// Bare label or number, for consumers that predate the envelope
    Legacy,
}

/// Websocket delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub uri: String,
    /// First backoff delay after a failure, in milliseconds
    pub backoff_floor_ms: u64,
    /// Upper bound for the backoff delay, in milliseconds
    pub backoff_ceiling_ms: u64,
    /// Payloads that may wait for delivery before senders are made to wait
    pub queue_capacity: usize,
    pub codec: CodecKind,
    /// Limit on the TCP connect plus websocket handshake, in milliseconds
    pub connect_timeout_ms: u64,
    /// How long shutdown waits for queued payloads to go out, in milliseconds
    pub drain_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            uri: "ws://localhost:3000".to_string(),
            backoff_floor_ms: 5_000,
            backoff_ceiling_ms: 60_000,
            queue_capacity: 64,
            codec: CodecKind::Envelope,
            connect_timeout_ms: 10_000,
            drain_timeout_ms: 15_000,
        }
    }
}

impl DispatchConfig {
    pub fn backoff_floor(&self) -> Duration {
        Duration::from_millis(self.backoff_floor_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Frame differencing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Gaussian blur sigma applied before differencing (0 disables smoothing)
    pub blur_sigma: f32,
    /// Per-pixel difference above which a pixel counts as changed
    pub pixel_threshold: u8,
    /// Mask sum above which a frame pair counts as a change
    pub magnitude_threshold: u64,
    /// Minimum time between accepted events, in milliseconds
    pub debounce_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            // Matches a 21x21 kernel with automatic sigma
            blur_sigma: 3.5,
            pixel_threshold: 30,
            magnitude_threshold: 50_000,
            debounce_ms: 3_000,
        }
    }
}

impl MotionConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Directory replay frame source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSourceConfig {
    pub dir: Option<PathBuf>,
    /// Delay between frames in milliseconds (0 replays as fast as possible)
    pub interval_ms: u64,
    pub width: u32,
    pub height: u32,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            dir: None,
            interval_ms: 33,
            width: 640,
            height: 480,
        }
    }
}

impl FrameSourceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Frame size, or `None` to keep frames as stored
    pub fn resolution(&self) -> Option<(u32, u32)> {
        (self.width > 0 && self.height > 0).then_some((self.width, self.height))
    }
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Polled serial scale settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub timeout_ms: u64,
    /// Byte written to request a reading
    pub request_code: u8,
    /// Wait between the request and the read, in milliseconds
    pub settle_ms: u64,
    /// Time between polls, in milliseconds
    pub cadence_ms: u64,
    /// Byte that precedes the numeric field in a response
    pub marker: u8,
    /// Leading characters after the marker considered for the weight
    pub max_digits: usize,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            timeout_ms: 1_000,
            request_code: 0x05,
            settle_ms: 300,
            cadence_ms: 1_000,
            marker: 0x02,
            max_digits: 6,
        }
    }
}

impl ScaleConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which annotation backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Vision,
    Eim,
}

/// Kind of annotation requested from the Vision API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationFeature {
    #[default]
    ObjectLocalization,
    LabelDetection,
}

/// Annotation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub backend: BackendKind,
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Key used to sign request bodies when talking to a signing gateway
    pub hmac_key: Option<String>,
    pub feature: AnnotationFeature,
    pub max_results: u32,
    pub jpeg_quality: u8,
    /// Limit on one annotate request, response body included, in milliseconds
    pub request_timeout_ms: u64,
    /// Path to a local `.eim` model, for the `eim` backend
    pub model_path: Option<PathBuf>,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Vision,
            endpoint: "https://vision.googleapis.com".to_string(),
            api_key: None,
            hmac_key: None,
            feature: AnnotationFeature::ObjectLocalization,
            max_results: 10,
            jpeg_quality: 90,
            request_timeout_ms: 10_000,
            model_path: None,
        }
    }
}

impl AnnotationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Classification filtering and extraction pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Upper bound on concurrently running extraction tasks
    pub max_in_flight: usize,
    /// Recognised categories, keyed by annotation label, with their translation.
    /// A configured table replaces the built-in one entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<BTreeMap<String, String>>,
    /// Report translated labels instead of the annotation labels
    pub translate: bool,
    /// Annotations scoring below this are ignored
    pub min_confidence: f32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            categories: None,
            translate: true,
            min_confidence: 0.0,
        }
    }
}

impl ExtractionConfig {
    /// The configured categories, or the built-in produce table.
    pub fn categories(&self) -> BTreeMap<String, String> {
        if let Some(categories) = &self.categories {
            return categories.clone();
        }
        [
            ("apple", "manzana"),
            ("banana", "banana"),
            ("orange", "naranja"),
            ("lemon", "limon"),
            ("tomato", "tomate"),
            ("pear", "pera"),
            ("kiwi", "kiwi"),
            ("avocado", "palta"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

impl RelayConfig {
    /// Load configuration from defaults, an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(RelayConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: RelayConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string layered over the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = Figment::from(Serialized::defaults(RelayConfig::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but make no sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.to_string()));

        if self.dispatch.uri.trim().is_empty() {
            return invalid("dispatch.uri must not be empty");
        }
        if !self.dispatch.uri.starts_with("ws://") && !self.dispatch.uri.starts_with("wss://") {
            return invalid("dispatch.uri must use the ws:// or wss:// scheme");
        }
        if self.dispatch.backoff_floor_ms == 0 {
            return invalid("dispatch.backoff_floor_ms must be positive");
        }
        if self.dispatch.backoff_floor_ms > self.dispatch.backoff_ceiling_ms {
            return invalid("dispatch.backoff_floor_ms must not exceed backoff_ceiling_ms");
        }
        if self.dispatch.queue_capacity == 0 {
            return invalid("dispatch.queue_capacity must be positive");
        }
        if self.extraction.max_in_flight == 0 {
            return invalid("extraction.max_in_flight must be positive");
        }
        if self.extraction.categories.as_ref().is_some_and(BTreeMap::is_empty) {
            return invalid("extraction.categories must list at least one category");
        }
        if self.scale.max_digits == 0 {
            return invalid("scale.max_digits must be positive");
        }
        // responses are decoded as text before the marker is searched for
        if !self.scale.marker.is_ascii() {
            return invalid("scale.marker must be an ASCII byte");
        }
        if self.dispatch.connect_timeout_ms == 0 || self.annotation.request_timeout_ms == 0 {
            return invalid("dispatch.connect_timeout_ms and annotation.request_timeout_ms must be positive");
        }
        if self.annotation.jpeg_quality == 0 || self.annotation.jpeg_quality > 100 {
            return invalid("annotation.jpeg_quality must be between 1 and 100");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observed_constants() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.backoff_floor(), Duration::from_secs(5));
        assert_eq!(config.dispatch.backoff_ceiling(), Duration::from_secs(60));
        assert_eq!(config.motion.magnitude_threshold, 50_000);
        assert_eq!(config.motion.debounce(), Duration::from_secs(3));
        assert_eq!(config.scale.request_code, 0x05);
        assert_eq!(config.scale.marker, 0x02);
        assert_eq!(config.scale.max_digits, 6);
        assert_eq!(
            config.extraction.categories().get("avocado").map(String::as_str),
            Some("palta")
        );
        assert_eq!(config.dispatch.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.annotation.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_category_table_replaces_builtin() {
        let config = RelayConfig::from_toml_str(
            r#"
            [extraction.categories]
            apple = "manzana"
            "#,
        )
        .unwrap();

        let categories = config.extraction.categories();
        assert_eq!(categories.keys().collect::<Vec<_>>(), vec!["apple"]);
        assert_eq!(categories["apple"], "manzana");
    }

    #[test]
    fn test_empty_category_table_rejected() {
        let result = RelayConfig::from_toml_str("[extraction.categories]\n");
        assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("categories")));
    }

    #[test]
    fn test_non_ascii_marker_rejected() {
        let result = RelayConfig::from_toml_str(
            r#"
            [scale]
            marker = 200
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("marker")));
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = RelayConfig::from_toml_str(
            r#"
            [dispatch]
            uri = "ws://broker:9000"
            codec = "legacy"

            [motion]
            debounce_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatch.uri, "ws://broker:9000");
        assert_eq!(config.dispatch.codec, CodecKind::Legacy);
        assert_eq!(config.motion.debounce_ms, 1500);
        // untouched sections keep their defaults
        assert_eq!(config.motion.pixel_threshold, 30);
        assert_eq!(config.scale.baud_rate, 9600);
    }

    #[test]
    fn test_floor_above_ceiling_rejected() {
        let result = RelayConfig::from_toml_str(
            r#"
            [dispatch]
            backoff_floor_ms = 90000
            backoff_ceiling_ms = 60000
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("ceiling")));
    }

    #[test]
    fn test_non_websocket_uri_rejected() {
        let result = RelayConfig::from_toml_str(
            r#"
            [dispatch]
            uri = "http://localhost:3000"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}

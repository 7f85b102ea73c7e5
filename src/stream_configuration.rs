//! Configuration types for the readable and writable adapters

use serde::{Deserialize, Serialize};

/// Default high-water-mark, in chunks, for object-mode endpoints
pub const DEFAULT_OBJECT_HIGH_WATER_MARK: usize = 16;

/// Default high-water-mark for byte-mode endpoints
pub const DEFAULT_BYTE_HIGH_WATER_MARK: usize = 16 * 1024;

/// Buffering options recognized by `readable` and `writeable`.
///
/// Only the buffering thresholds depend on these values; the protocol
/// behaviour of an endpoint is the same for every configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamOptions {
    /// Whether chunks are arbitrary values rather than byte buffers
    pub object_mode: bool,
    /// Buffered depth at which backpressure is reported
    pub high_water_mark: Option<usize>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            object_mode: true,
            high_water_mark: None,
        }
    }
}

impl StreamOptions {
    /// Create the default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set object mode
    pub fn object_mode(mut self, object_mode: bool) -> Self {
        self.object_mode = object_mode;
        self
    }

    /// Set an explicit high-water-mark
    pub fn high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    /// The threshold actually used by an endpoint.
    ///
    /// An explicit mark wins; otherwise the default depends on the mode.
    pub fn effective_high_water_mark(&self) -> usize {
        match self.high_water_mark {
            Some(mark) => mark,
            None if self.object_mode => DEFAULT_OBJECT_HIGH_WATER_MARK,
            None => DEFAULT_BYTE_HIGH_WATER_MARK,
        }
    }

    /// Parse options from a JSON document such as `{"highWaterMark": 1}`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

//! Capture filters applied to extracted payloads before they reach history
use regex::RegexSet;

use crate::clipboard::ContentPayload;
use crate::config::CaptureConfig;

/// Why a payload was not captured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Larger than the configured limit
    TooLarge { size: usize, limit: usize },
    /// Text matched the ignore pattern at this index
    IgnoredPattern(usize),
}

/// Size limit plus user-configured ignore patterns.
///
/// Built from [`CaptureConfig`]; the engine rebuilds it whenever the capture
/// section of the configuration changes.
#[derive(Debug, Clone)]
pub struct CaptureFilter {
    max_payload_bytes: usize,
    patterns: RegexSet,
}

impl CaptureFilter {
    pub fn from_config(config: &CaptureConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            max_payload_bytes: config.max_payload_bytes,
            patterns: RegexSet::new(&config.ignore_patterns)?,
        })
    }

    /// Whether this filter was built from `config`
    pub fn is_current(&self, config: &CaptureConfig) -> bool {
        self.max_payload_bytes == config.max_payload_bytes
            && self.patterns.patterns() == config.ignore_patterns.as_slice()
    }

    pub fn check(&self, payload: &ContentPayload) -> Result<(), Rejection> {
        let size = payload.approximate_size();
        if size > self.max_payload_bytes {
            return Err(Rejection::TooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }

        if let Some(text) = payload.as_text() {
            if let Some(index) = self.patterns.matches(text).into_iter().next() {
                return Err(Rejection::IgnoredPattern(index));
            }
        }

        Ok(())
    }
}

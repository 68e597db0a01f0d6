//! Search bounds and presentation settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Settings shared by the index and search services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Page size used when a caller does not care.
    #[serde(default = "default_page_size")]
    pub default_page_size: i32,

    /// Largest page size a caller may request.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i32,

    /// Upper bound for a single space's answer during fan-out, in milliseconds.
    #[serde(default = "default_space_timeout_ms")]
    pub space_timeout_ms: u64,

    /// Maximum snippet length in bytes.
    #[serde(default = "default_snippet_length")]
    pub snippet_length: usize,
}

fn default_page_size() -> i32 {
    20
}

fn default_max_page_size() -> i32 {
    200
}

fn default_space_timeout_ms() -> u64 {
    5_000
}

fn default_snippet_length() -> usize {
    160
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            space_timeout_ms: default_space_timeout_ms(),
            snippet_length: default_snippet_length(),
        }
    }
}

impl SearchSettings {
    /// Per-space fan-out timeout.
    pub fn space_timeout(&self) -> Duration {
        Duration::from_millis(self.space_timeout_ms)
    }

    /// Reject page sizes outside `1..=max_page_size`.
    pub fn validate_page_size(&self, page_size: i32) -> Result<usize> {
        if page_size <= 0 {
            return Err(Error::invalid_argument(format!(
                "page_size must be positive, got {page_size}"
            )));
        }
        if page_size > self.max_page_size {
            return Err(Error::invalid_argument(format!(
                "page_size {page_size} exceeds the maximum of {}",
                self.max_page_size
            )));
        }
        Ok(page_size as usize)
    }
}

//! Tracker configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the progress tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Number of random symbols in a verification code
    pub verification_code_length: usize,
    /// Text placed before the random part, e.g. `VA` in `VA-7KQ2-M9XD-3HTR`
    pub verification_code_prefix: String,
    /// How many fresh codes to try before giving up on a collision
    pub max_code_attempts: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            verification_code_length: 12,
            verification_code_prefix: "VA".to_string(),
            max_code_attempts: 8,
        }
    }
}

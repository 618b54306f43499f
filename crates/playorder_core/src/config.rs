//! Ordering engine configuration.
//!
//! # Invariants
//! - `step >= 2`, otherwise a fresh renumber could not leave room for a
//!   midpoint and the single-retry policy would not hold.

use crate::ordering::position::STEP;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;
const MIN_STEP: i64 = 2;

/// Tunables for [`crate::OrderingService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderingConfig {
    /// Spacing between consecutive positions on append and renumber.
    pub step: i64,
    /// Extra attempts after a write conflict before giving up.
    pub max_conflict_retries: u32,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            step: STEP,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl OrderingConfig {
    /// Checks config invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step < MIN_STEP {
            return Err(ConfigError::StepTooSmall(self.step));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    StepTooSmall(i64),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepTooSmall(step) => {
                write!(f, "position step must be at least {MIN_STEP}, got {step}")
            }
        }
    }
}

impl Error for ConfigError {}

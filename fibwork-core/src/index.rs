//! Requested index and the policy bounding it.

use serde::Serialize;
use std::fmt;

use crate::error::{ConfigError, FibError};

/// Upper bound used when no policy is configured.
pub const DEFAULT_MAX_INDEX: u32 = 40;

/// Largest index whose value fits in a `u64`.
pub const MAX_REPRESENTABLE_INDEX: u32 = 92;

/// A validated Fibonacci argument.
///
/// Only [`IndexPolicy::check`] constructs one, so holding an `Index` means the
/// value was inside the policy's range when it was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(transparent)]
pub struct Index(u32);

impl Index {
    pub fn get(self) -> u32 {
        self.0
    }

    /// Cache key and Event Channel payload for this index.
    pub fn as_key(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepted index range: `0..=max_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPolicy {
    max_index: u32,
}

impl Default for IndexPolicy {
    fn default() -> Self {
        Self {
            max_index: DEFAULT_MAX_INDEX,
        }
    }
}

impl IndexPolicy {
    /// Build a policy, rejecting bounds whose results would overflow `u64`.
    pub fn new(max_index: u32) -> Result<Self, ConfigError> {
        if max_index > MAX_REPRESENTABLE_INDEX {
            return Err(ConfigError::InvalidValue {
                field: "max_index".to_string(),
                value: max_index.to_string(),
                reason: format!("must be at most {MAX_REPRESENTABLE_INDEX}"),
            });
        }
        Ok(Self { max_index })
    }

    pub fn max_index(&self) -> u32 {
        self.max_index
    }

    /// Accept `value` if it lies in `0..=max_index`.
    pub fn check(&self, value: i64) -> Result<Index, FibError> {
        match u32::try_from(value) {
            Ok(v) if v <= self.max_index => Ok(Index(v)),
            _ => Err(FibError::OutOfRange {
                index: value,
                max: self.max_index,
            }),
        }
    }
}

//! Task group configuration with environment overrides

use crate::constants::{
    DEFAULT_GROUP_CAPACITY, DEFAULT_GROUP_NAME, UTILZ_GROUP_CAPACITY_VAR, UTILZ_GROUP_NAME_VAR,
};
use crate::errors::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};

/// Largest capacity a group can be configured with.
///
/// Mirrors `tokio::sync::Semaphore::MAX_PERMITS` so configs can be validated
/// without depending on the runtime.
pub const MAX_GROUP_CAPACITY: usize = usize::MAX >> 3;

/// Settings a task group is built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Maximum number of tasks running at the same time
    pub capacity: usize,
    /// Name recorded on the group's tracing span
    pub name: String,
}

impl Default for GroupConfig {
    fn default() -> Self {
        let capacity = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(DEFAULT_GROUP_CAPACITY);
        Self {
            capacity,
            name: DEFAULT_GROUP_NAME.to_string(),
        }
    }
}

impl GroupConfig {
    /// Create a config with the given capacity and the default name
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Load defaults and apply `UTILZ_GROUP_*` overrides from the environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(capacity_str) = std::env::var(UTILZ_GROUP_CAPACITY_VAR) {
            config.capacity = capacity_str
                .trim()
                .parse::<usize>()
                .env_context(UTILZ_GROUP_CAPACITY_VAR, || {
                    format!("expected a positive integer, got '{capacity_str}'")
                })?;
            ::tracing::debug!(capacity = config.capacity, "group capacity set from environment");
        }

        if let Ok(name) = std::env::var(UTILZ_GROUP_NAME_VAR) {
            if !name.trim().is_empty() {
                ::tracing::debug!(name = %name, "group name set from environment");
                config.name = name;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the span name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Check the capacity is within `1..=MAX_GROUP_CAPACITY`
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.capacity > MAX_GROUP_CAPACITY {
            return Err(Error::invalid_capacity(self.capacity, MAX_GROUP_CAPACITY));
        }
        Ok(())
    }
}

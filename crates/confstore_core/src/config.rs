//! Manager configuration.

use crate::error::{ConfigError, ConfigResult};
use std::ops::RangeInclusive;

/// Allowed range for [`Config::max_keys`].
pub const MAX_KEYS_RANGE: RangeInclusive<usize> = 32..=256;
/// Allowed range for [`Config::max_key_len`].
pub const MAX_KEY_LEN_RANGE: RangeInclusive<usize> = 16..=64;
/// Allowed range for [`Config::max_value_size`].
pub const MAX_VALUE_SIZE_RANGE: RangeInclusive<usize> = 64..=1024;
/// Allowed range for [`Config::max_namespaces`].
///
/// The upper bound keeps namespace ids within one byte on the wire.
pub const MAX_NAMESPACES_RANGE: RangeInclusive<usize> = 8..=256;
/// Minimum for [`Config::max_callbacks`].
pub const MIN_CALLBACKS: usize = 16;

/// Configuration for initializing a [`crate::ConfigManager`].
///
/// Every table is allocated to these capacities at `init` and never grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of stored entries across all namespaces.
    pub max_keys: usize,

    /// Maximum key (and namespace name) length in bytes.
    pub max_key_len: usize,

    /// Maximum stored value size in bytes. For encrypted entries this
    /// bounds the ciphertext, including nonce and tag.
    pub max_value_size: usize,

    /// Maximum number of namespaces, including the default namespace.
    pub max_namespaces: usize,

    /// Maximum number of change callbacks.
    pub max_callbacks: usize,

    /// Whether every mutation is committed to the backend immediately.
    pub auto_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_keys: 64,
            max_key_len: 32,
            max_value_size: 256,
            max_namespaces: 8,
            max_callbacks: 16,
            auto_commit: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of entries.
    #[must_use]
    pub const fn max_keys(mut self, value: usize) -> Self {
        self.max_keys = value;
        self
    }

    /// Sets the maximum key length.
    #[must_use]
    pub const fn max_key_len(mut self, value: usize) -> Self {
        self.max_key_len = value;
        self
    }

    /// Sets the maximum value size.
    #[must_use]
    pub const fn max_value_size(mut self, value: usize) -> Self {
        self.max_value_size = value;
        self
    }

    /// Sets the maximum number of namespaces.
    #[must_use]
    pub const fn max_namespaces(mut self, value: usize) -> Self {
        self.max_namespaces = value;
        self
    }

    /// Sets the maximum number of callbacks.
    #[must_use]
    pub const fn max_callbacks(mut self, value: usize) -> Self {
        self.max_callbacks = value;
        self
    }

    /// Sets whether mutations are committed immediately.
    #[must_use]
    pub const fn auto_commit(mut self, value: bool) -> Self {
        self.auto_commit = value;
        self
    }

    /// Checks every limit against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] naming the first limit
    /// that is out of range.
    pub fn validate(&self) -> ConfigResult<()> {
        check_range("max_keys", self.max_keys, &MAX_KEYS_RANGE)?;
        check_range("max_key_len", self.max_key_len, &MAX_KEY_LEN_RANGE)?;
        check_range("max_value_size", self.max_value_size, &MAX_VALUE_SIZE_RANGE)?;
        check_range("max_namespaces", self.max_namespaces, &MAX_NAMESPACES_RANGE)?;
        if self.max_callbacks < MIN_CALLBACKS {
            return Err(ConfigError::invalid_parameter(format!(
                "max_callbacks must be at least {MIN_CALLBACKS}, got {}",
                self.max_callbacks
            )));
        }
        Ok(())
    }
}

fn check_range(name: &str, value: usize, range: &RangeInclusive<usize>) -> ConfigResult<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid_parameter(format!(
            "{name} must be within {}..={}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.auto_commit);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .max_keys(128)
            .max_key_len(48)
            .max_value_size(1024)
            .auto_commit(true);

        assert_eq!(config.max_keys, 128);
        assert_eq!(config.max_key_len, 48);
        assert_eq!(config.max_value_size, 1024);
        assert!(config.auto_commit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bounds_are_inclusive() {
        assert!(Config::new().max_keys(32).validate().is_ok());
        assert!(Config::new().max_keys(256).validate().is_ok());
        assert!(Config::new().max_value_size(64).validate().is_ok());
        assert!(Config::new().max_namespaces(256).validate().is_ok());
    }

    #[test]
    fn out_of_range_limits_are_rejected() {
        for config in [
            Config::new().max_keys(31),
            Config::new().max_keys(257),
            Config::new().max_key_len(15),
            Config::new().max_key_len(65),
            Config::new().max_value_size(63),
            Config::new().max_value_size(1025),
            Config::new().max_namespaces(7),
            Config::new().max_namespaces(257),
            Config::new().max_callbacks(15),
        ] {
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidParameter { .. })
            ));
        }
    }
}

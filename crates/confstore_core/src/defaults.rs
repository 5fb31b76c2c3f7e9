//! Registry of default values consulted on read misses.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Value, ValueType};

#[derive(Debug)]
struct DefaultSlot {
    occupied: bool,
    key: String,
    value_type: ValueType,
    len: usize,
    value: Box<[u8]>,
}

/// Fixed-capacity map from unqualified key to a typed default.
///
/// Defaults are independent of namespaces: a miss on `key` in any namespace
/// consults the same registration.
#[derive(Debug)]
pub(crate) struct DefaultRegistry {
    slots: Vec<DefaultSlot>,
    max_key_len: usize,
    max_value_size: usize,
}

impl DefaultRegistry {
    pub fn new(capacity: usize, max_key_len: usize, max_value_size: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| DefaultSlot {
                occupied: false,
                key: String::with_capacity(max_key_len),
                value_type: ValueType::Blob,
                len: 0,
                value: vec![0u8; max_value_size].into_boxed_slice(),
            })
            .collect();
        Self {
            slots,
            max_key_len,
            max_value_size,
        }
    }

    fn find(&self, key: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.occupied && slot.key == key)
    }

    /// Registers or replaces the default for `key`.
    pub fn register(&mut self, key: &str, value: &Value) -> ConfigResult<()> {
        if key.is_empty() {
            return Err(ConfigError::invalid_parameter("key must not be empty"));
        }
        if key.len() > self.max_key_len {
            return Err(ConfigError::KeyTooLong {
                len: key.len(),
                max: self.max_key_len,
            });
        }
        let bytes = value.to_bytes();
        if bytes.len() > self.max_value_size {
            return Err(ConfigError::ValueTooLarge {
                len: bytes.len(),
                max: self.max_value_size,
            });
        }

        let index = match self.find(key) {
            Some(index) => index,
            None => self
                .slots
                .iter()
                .position(|slot| !slot.occupied)
                .ok_or_else(|| ConfigError::no_space("default", self.slots.len()))?,
        };

        let slot = &mut self.slots[index];
        if !slot.occupied {
            slot.occupied = true;
            slot.key.clear();
            slot.key.push_str(key);
        }
        slot.value_type = value.value_type();
        slot.value[..bytes.len()].copy_from_slice(&bytes);
        slot.len = bytes.len();
        Ok(())
    }

    /// Removes the default for `key`.
    pub fn unregister(&mut self, key: &str) -> ConfigResult<()> {
        let index = self.find(key).ok_or_else(|| ConfigError::not_found(key))?;
        let slot = &mut self.slots[index];
        slot.occupied = false;
        slot.key.clear();
        slot.len = 0;
        Ok(())
    }

    /// Returns the registered default for `key`.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let slot = &self.slots[self.find(key)?];
        // Registered bytes always came from a valid value
        Value::from_bytes(slot.value_type, &slot.value[..slot.len]).ok()
    }

    /// Returns the default for `key` only if it has type `expected`.
    pub fn lookup_typed(&self, key: &str, expected: ValueType) -> Option<Value> {
        self.lookup(key).filter(|value| value.value_type() == expected)
    }

    /// Registered keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.slots
            .iter()
            .filter(|slot| slot.occupied)
            .map(|slot| slot.key.as_str())
    }

    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.occupied).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DefaultRegistry {
        DefaultRegistry::new(32, 16, 64)
    }

    #[test]
    fn register_and_lookup() {
        let mut defaults = registry();
        defaults.register("app.port", &Value::I32(8080)).unwrap();
        assert_eq!(defaults.lookup("app.port"), Some(Value::I32(8080)));
        assert_eq!(defaults.lookup("missing"), None);
    }

    #[test]
    fn reregistration_overwrites() {
        let mut defaults = registry();
        defaults.register("mode", &Value::Str("auto".into())).unwrap();
        defaults.register("mode", &Value::I32(3)).unwrap();
        assert_eq!(defaults.lookup("mode"), Some(Value::I32(3)));
        assert_eq!(defaults.count(), 1);
    }

    #[test]
    fn typed_lookup_filters_mismatch() {
        let mut defaults = registry();
        defaults.register("gain", &Value::F32(1.5)).unwrap();
        assert_eq!(defaults.lookup_typed("gain", ValueType::F32), Some(Value::F32(1.5)));
        assert_eq!(defaults.lookup_typed("gain", ValueType::I32), None);
    }

    #[test]
    fn unregister_removes() {
        let mut defaults = registry();
        defaults.register("k", &Value::Bool(true)).unwrap();
        defaults.unregister("k").unwrap();
        assert_eq!(defaults.lookup("k"), None);
        assert!(matches!(defaults.unregister("k"), Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn limits_are_enforced() {
        let mut defaults = registry();
        assert!(matches!(
            defaults.register(&"k".repeat(17), &Value::Bool(true)),
            Err(ConfigError::KeyTooLong { .. })
        ));
        assert!(matches!(
            defaults.register("blob", &Value::Blob(vec![0; 65])),
            Err(ConfigError::ValueTooLarge { .. })
        ));
        for i in 0..32 {
            defaults.register(&format!("k{i}"), &Value::Bool(true)).unwrap();
        }
        assert!(matches!(
            defaults.register("full", &Value::Bool(true)),
            Err(ConfigError::NoSpace { .. })
        ));
    }

    #[test]
    fn keys_in_registration_order() {
        let mut defaults = registry();
        defaults.register("b", &Value::Bool(true)).unwrap();
        defaults.register("a", &Value::Bool(true)).unwrap();
        assert_eq!(defaults.keys().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}

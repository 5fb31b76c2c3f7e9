//! Namespace table.
//!
//! Maps namespace names to the small integer ids that scope entries. The
//! table is allocated to `max_namespaces` slots at creation. Slot 0 is the
//! default namespace; it is always registered and always active.

use crate::error::{ConfigError, ConfigResult};
use crate::types::NamespaceId;

/// Name of namespace 0.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Separator between namespace and key in backend record keys; not allowed
/// in namespace names.
pub(crate) const RECORD_KEY_SEPARATOR: char = '/';

#[derive(Debug)]
struct NamespaceSlot {
    name: String,
    registered: bool,
    active: bool,
}

/// Registry of namespace names and ids.
#[derive(Debug)]
pub(crate) struct NamespaceTable {
    slots: Vec<NamespaceSlot>,
    max_name_len: usize,
}

impl NamespaceTable {
    pub fn new(max_namespaces: usize, max_name_len: usize) -> Self {
        let mut slots: Vec<NamespaceSlot> = (0..max_namespaces)
            .map(|_| NamespaceSlot {
                name: String::with_capacity(max_name_len.max(DEFAULT_NAMESPACE.len())),
                registered: false,
                active: false,
            })
            .collect();
        slots[0].name.push_str(DEFAULT_NAMESPACE);
        slots[0].registered = true;
        slots[0].active = true;
        Self {
            slots,
            max_name_len,
        }
    }

    /// Validates a namespace name: non-empty, bounded, no separator.
    pub fn check_name(&self, name: &str) -> ConfigResult<()> {
        if name.is_empty() {
            return Err(ConfigError::invalid_parameter("namespace name must not be empty"));
        }
        if name.len() > self.max_name_len {
            return Err(ConfigError::KeyTooLong {
                len: name.len(),
                max: self.max_name_len,
            });
        }
        if name.contains(RECORD_KEY_SEPARATOR) {
            return Err(ConfigError::invalid_parameter(format!(
                "namespace name must not contain '{RECORD_KEY_SEPARATOR}'"
            )));
        }
        Ok(())
    }

    /// Returns the id registered for `name`, active or not.
    pub fn lookup(&self, name: &str) -> Option<NamespaceId> {
        self.slots
            .iter()
            .position(|slot| slot.registered && slot.name == name)
            .map(to_id)
    }

    /// Opens `name`, reusing its id if known, else allocating the lowest
    /// free slot. The namespace becomes active either way.
    pub fn open(&mut self, name: &str) -> ConfigResult<NamespaceId> {
        self.check_name(name)?;

        if let Some(id) = self.lookup(name) {
            self.slots[id.index()].active = true;
            return Ok(id);
        }

        let index = self
            .slots
            .iter()
            .position(|slot| !slot.registered)
            .ok_or_else(|| ConfigError::no_space("namespace", self.slots.len()))?;
        let slot = &mut self.slots[index];
        slot.name.clear();
        slot.name.push_str(name);
        slot.registered = true;
        slot.active = true;
        Ok(to_id(index))
    }

    /// Releases a handle. The registration and the namespace's entries stay.
    pub fn close(&mut self, id: NamespaceId) -> ConfigResult<()> {
        if id == NamespaceId::DEFAULT {
            return Err(ConfigError::invalid_parameter("the default namespace cannot be closed"));
        }
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.registered)
            .ok_or_else(|| ConfigError::not_found(id.to_string()))?;
        slot.active = false;
        Ok(())
    }

    /// Fails unless `id` names an active namespace.
    pub fn ensure_active(&self, id: NamespaceId) -> ConfigResult<()> {
        match self.slots.get(id.index()) {
            Some(slot) if slot.registered && slot.active => Ok(()),
            Some(slot) if slot.registered => Err(ConfigError::invalid_parameter(format!(
                "namespace '{}' is closed",
                slot.name
            ))),
            _ => Err(ConfigError::invalid_parameter(format!("unknown namespace {id}"))),
        }
    }

    /// Returns the name registered for `id`.
    pub fn name_of(&self, id: NamespaceId) -> Option<&str> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.registered)
            .map(|slot| slot.name.as_str())
    }

    /// Iterates registered namespaces in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NamespaceId, &str)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.registered)
            .map(|(index, slot)| (to_id(index), slot.name.as_str()))
    }

    /// Forgets every namespace except the default one.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut().skip(1) {
            slot.name.clear();
            slot.registered = false;
            slot.active = false;
        }
    }
}

fn to_id(index: usize) -> NamespaceId {
    // The table never holds more than 256 slots
    NamespaceId(index as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NamespaceTable {
        NamespaceTable::new(8, 16)
    }

    #[test]
    fn default_namespace_exists() {
        let table = table();
        assert_eq!(table.lookup(DEFAULT_NAMESPACE), Some(NamespaceId::DEFAULT));
        assert!(table.ensure_active(NamespaceId::DEFAULT).is_ok());
        assert_eq!(table.name_of(NamespaceId::DEFAULT), Some("default"));
    }

    #[test]
    fn open_is_idempotent() {
        let mut table = table();
        let wifi = table.open("wifi").unwrap();
        assert_eq!(wifi, NamespaceId(1));
        assert_eq!(table.open("wifi").unwrap(), wifi);
        assert_eq!(table.open("motor").unwrap(), NamespaceId(2));
        assert_eq!(table.open(DEFAULT_NAMESPACE).unwrap(), NamespaceId::DEFAULT);
    }

    #[test]
    fn open_fails_when_full() {
        let mut table = table();
        for i in 1..8 {
            table.open(&format!("ns{i}")).unwrap();
        }
        assert!(matches!(
            table.open("overflow"),
            Err(ConfigError::NoSpace { capacity: 8, .. })
        ));
        assert!(table.open("ns3").is_ok());
    }

    #[test]
    fn name_validation() {
        let mut table = table();
        assert!(matches!(table.open(""), Err(ConfigError::InvalidParameter { .. })));
        assert!(matches!(
            table.open(&"n".repeat(17)),
            Err(ConfigError::KeyTooLong { .. })
        ));
        assert!(matches!(table.open("a/b"), Err(ConfigError::InvalidParameter { .. })));
    }

    #[test]
    fn close_deactivates_until_reopened() {
        let mut table = table();
        let id = table.open("wifi").unwrap();
        table.close(id).unwrap();
        assert!(table.ensure_active(id).is_err());
        assert_eq!(table.lookup("wifi"), Some(id));

        assert_eq!(table.open("wifi").unwrap(), id);
        assert!(table.ensure_active(id).is_ok());
    }

    #[test]
    fn default_cannot_be_closed() {
        let mut table = table();
        assert!(table.close(NamespaceId::DEFAULT).is_err());
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut table = table();
        assert!(table.ensure_active(NamespaceId(5)).is_err());
        assert!(table.ensure_active(NamespaceId(200)).is_err());
        assert!(matches!(table.close(NamespaceId(5)), Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn reset_keeps_default() {
        let mut table = table();
        table.open("wifi").unwrap();
        table.reset();
        let names: Vec<_> = table.iter().map(|(_, name)| name.to_string()).collect();
        assert_eq!(names, vec!["default"]);
        assert_eq!(table.open("motor").unwrap(), NamespaceId(1));
    }
}

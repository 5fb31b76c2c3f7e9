//! Fixed-capacity entry store.
//!
//! The store is an arena of `max_keys` slots allocated once at creation.
//! Every slot owns a key buffer of `max_key_len` bytes capacity and a value
//! buffer of exactly `max_value_size` bytes, so storing, overwriting and
//! deleting entries never allocates.
//!
//! Lookup is a linear scan over the slots. At the 32..256 entry scale this
//! is cheap, and it keeps iteration order a pure function of the sequence of
//! operations applied.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{EntryFlags, EntryInfo, NamespaceId, Scope, ValueType};

/// One arena slot.
#[derive(Debug)]
struct Slot {
    occupied: bool,
    namespace: NamespaceId,
    key: String,
    value_type: ValueType,
    flags: EntryFlags,
    len: usize,
    value: Box<[u8]>,
    /// Modified since the last successful commit.
    changed: bool,
}

impl Slot {
    fn vacant(max_key_len: usize, max_value_size: usize) -> Self {
        Self {
            occupied: false,
            namespace: NamespaceId::DEFAULT,
            key: String::with_capacity(max_key_len),
            value_type: ValueType::Blob,
            flags: EntryFlags::empty(),
            len: 0,
            value: vec![0u8; max_value_size].into_boxed_slice(),
            changed: false,
        }
    }

    fn matches(&self, ns: NamespaceId, key: &str) -> bool {
        self.occupied && self.namespace == ns && self.key == key
    }

    fn release(&mut self) {
        self.occupied = false;
        self.key.clear();
        self.len = 0;
        self.changed = false;
        self.flags = EntryFlags::empty();
    }
}

/// Borrowed view of a stored entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryRef<'a> {
    /// Slot index; stable until the entry is deleted.
    pub index: usize,
    pub namespace: NamespaceId,
    pub key: &'a str,
    pub value_type: ValueType,
    pub flags: EntryFlags,
    pub value: &'a [u8],
    pub changed: bool,
}

impl EntryRef<'_> {
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            namespace: self.namespace,
            key: self.key.to_string(),
            value_type: self.value_type,
            size: self.value.len(),
            flags: self.flags,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(EntryFlags::ENCRYPTED)
    }
}

/// Result of a successful put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PutOutcome {
    pub index: usize,
    pub created: bool,
}

/// The table of typed entries.
#[derive(Debug)]
pub(crate) struct EntryStore {
    slots: Vec<Slot>,
    len: usize,
    max_key_len: usize,
    max_value_size: usize,
}

impl EntryStore {
    /// Allocates every slot up front.
    pub fn new(max_keys: usize, max_key_len: usize, max_value_size: usize) -> Self {
        let slots = (0..max_keys)
            .map(|_| Slot::vacant(max_key_len, max_value_size))
            .collect();
        Self {
            slots,
            len: 0,
            max_key_len,
            max_value_size,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Validates a key: non-empty and within `max_key_len` bytes.
    pub fn check_key(&self, key: &str) -> ConfigResult<()> {
        if key.is_empty() {
            return Err(ConfigError::invalid_parameter("key must not be empty"));
        }
        if key.len() > self.max_key_len {
            return Err(ConfigError::KeyTooLong {
                len: key.len(),
                max: self.max_key_len,
            });
        }
        Ok(())
    }

    /// Validates a value size against `max_value_size`.
    pub fn check_value(&self, len: usize) -> ConfigResult<()> {
        if len > self.max_value_size {
            return Err(ConfigError::ValueTooLarge {
                len,
                max: self.max_value_size,
            });
        }
        Ok(())
    }

    fn find(&self, ns: NamespaceId, key: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.matches(ns, key))
    }

    fn view(&self, index: usize) -> EntryRef<'_> {
        let slot = &self.slots[index];
        EntryRef {
            index,
            namespace: slot.namespace,
            key: &slot.key,
            value_type: slot.value_type,
            flags: slot.flags,
            value: &slot.value[..slot.len],
            changed: slot.changed,
        }
    }

    /// Looks up an entry without a type check.
    pub fn lookup(&self, ns: NamespaceId, key: &str) -> Option<EntryRef<'_>> {
        self.find(ns, key).map(|index| self.view(index))
    }

    /// Looks up an entry that must have `expected` type.
    pub fn get(&self, ns: NamespaceId, key: &str, expected: ValueType) -> ConfigResult<EntryRef<'_>> {
        let entry = self
            .lookup(ns, key)
            .ok_or_else(|| ConfigError::not_found(key))?;
        if entry.value_type != expected {
            return Err(ConfigError::type_mismatch(key, entry.value_type, expected));
        }
        Ok(entry)
    }

    /// Returns the entry in slot `index`, if occupied.
    #[cfg(test)]
    pub fn at(&self, index: usize) -> Option<EntryRef<'_>> {
        self.slots
            .get(index)
            .filter(|slot| slot.occupied)
            .map(|_| self.view(index))
    }

    /// Creates or overwrites an entry.
    ///
    /// An existing entry keeps its slot; its type must match and it must not
    /// be read-only. A new entry takes the lowest free slot.
    pub fn put(
        &mut self,
        ns: NamespaceId,
        key: &str,
        value_type: ValueType,
        bytes: &[u8],
        flags: EntryFlags,
    ) -> ConfigResult<PutOutcome> {
        self.check_key(key)?;
        self.check_value(bytes.len())?;

        let (index, created) = match self.find(ns, key) {
            Some(index) => {
                let slot = &self.slots[index];
                if slot.value_type != value_type {
                    return Err(ConfigError::type_mismatch(key, slot.value_type, value_type));
                }
                if slot.flags.contains(EntryFlags::READ_ONLY) {
                    return Err(ConfigError::read_only(key));
                }
                (index, false)
            }
            None => {
                let index = self
                    .slots
                    .iter()
                    .position(|slot| !slot.occupied)
                    .ok_or_else(|| ConfigError::no_space("entry", self.slots.len()))?;
                (index, true)
            }
        };

        let slot = &mut self.slots[index];
        if created {
            slot.occupied = true;
            slot.namespace = ns;
            slot.key.clear();
            slot.key.push_str(key);
            slot.value_type = value_type;
            self.len += 1;
        }
        slot.flags = flags;
        slot.value[..bytes.len()].copy_from_slice(bytes);
        slot.len = bytes.len();
        slot.changed = true;

        Ok(PutOutcome { index, created })
    }

    /// Replaces the value bytes of slot `index`, ignoring the read-only
    /// flag. Used when re-encrypting under a new key.
    pub fn replace_value(&mut self, index: usize, bytes: &[u8]) -> ConfigResult<()> {
        self.check_value(bytes.len())?;
        let slot = self
            .slots
            .get_mut(index)
            .filter(|slot| slot.occupied)
            .ok_or_else(|| ConfigError::not_found(format!("slot {index}")))?;
        slot.value[..bytes.len()].copy_from_slice(bytes);
        slot.len = bytes.len();
        slot.changed = true;
        Ok(())
    }

    /// Deletes an entry.
    pub fn delete(&mut self, ns: NamespaceId, key: &str) -> ConfigResult<()> {
        let index = self.find(ns, key).ok_or_else(|| ConfigError::not_found(key))?;
        if self.slots[index].flags.contains(EntryFlags::READ_ONLY) {
            return Err(ConfigError::read_only(key));
        }
        self.slots[index].release();
        self.len -= 1;
        Ok(())
    }

    /// Removes every entry in `scope`, read-only or not. Returns how many
    /// were removed.
    pub fn remove_scope(&mut self, scope: Scope) -> usize {
        let mut removed = 0;
        for slot in &mut self.slots {
            if slot.occupied && scope.contains(slot.namespace) {
                slot.release();
                removed += 1;
            }
        }
        self.len -= removed;
        removed
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.remove_scope(Scope::All);
    }

    /// Clears the changed marker of every entry.
    pub fn mark_all_clean(&mut self) {
        for slot in &mut self.slots {
            slot.changed = false;
        }
    }

    /// Iterates entries in `scope` in slot order.
    pub fn iter(&self, scope: Scope) -> impl Iterator<Item = EntryRef<'_>> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.occupied && scope.contains(slot.namespace))
            .map(move |(index, _)| self.view(index))
    }

    /// Counts entries in `scope`.
    pub fn count(&self, scope: Scope) -> usize {
        match scope {
            Scope::All => self.len,
            Scope::Namespace(_) => self.iter(scope).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS1: NamespaceId = NamespaceId(1);

    fn store() -> EntryStore {
        EntryStore::new(32, 16, 64)
    }

    #[test]
    fn put_then_get() {
        let mut store = store();
        let outcome = store
            .put(NamespaceId::DEFAULT, "port", ValueType::I32, &9000i32.to_le_bytes(), EntryFlags::DEFAULT)
            .unwrap();
        assert!(outcome.created);

        let entry = store.get(NamespaceId::DEFAULT, "port", ValueType::I32).unwrap();
        assert_eq!(entry.value, &9000i32.to_le_bytes());
        assert_eq!(entry.flags, EntryFlags::PERSISTENT);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn overwrite_keeps_slot() {
        let mut store = store();
        let first = store
            .put(NamespaceId::DEFAULT, "k", ValueType::Str, b"one", EntryFlags::DEFAULT)
            .unwrap();
        let second = store
            .put(NamespaceId::DEFAULT, "k", ValueType::Str, b"three", EntryFlags::DEFAULT)
            .unwrap();
        assert_eq!(first.index, second.index);
        assert!(!second.created);
        assert_eq!(store.lookup(NamespaceId::DEFAULT, "k").unwrap().value, b"three");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn type_change_is_rejected() {
        let mut store = store();
        store
            .put(NamespaceId::DEFAULT, "k", ValueType::I32, &[0; 4], EntryFlags::DEFAULT)
            .unwrap();
        let result = store.put(NamespaceId::DEFAULT, "k", ValueType::U32, &[0; 4], EntryFlags::DEFAULT);
        assert!(matches!(result, Err(ConfigError::TypeMismatch { .. })));
    }

    #[test]
    fn get_with_wrong_type_fails() {
        let mut store = store();
        store
            .put(NamespaceId::DEFAULT, "k", ValueType::Bool, &[1], EntryFlags::DEFAULT)
            .unwrap();
        assert!(matches!(
            store.get(NamespaceId::DEFAULT, "k", ValueType::I32),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn key_and_value_limits() {
        let mut store = store();
        assert!(matches!(
            store.put(NamespaceId::DEFAULT, "", ValueType::Blob, &[], EntryFlags::DEFAULT),
            Err(ConfigError::InvalidParameter { .. })
        ));
        assert!(matches!(
            store.put(NamespaceId::DEFAULT, &"k".repeat(17), ValueType::Blob, &[], EntryFlags::DEFAULT),
            Err(ConfigError::KeyTooLong { len: 17, max: 16 })
        ));
        assert!(matches!(
            store.put(NamespaceId::DEFAULT, "k", ValueType::Blob, &[0; 65], EntryFlags::DEFAULT),
            Err(ConfigError::ValueTooLarge { len: 65, max: 64 })
        ));
        assert!(store
            .put(NamespaceId::DEFAULT, &"k".repeat(16), ValueType::Blob, &[0; 64], EntryFlags::DEFAULT)
            .is_ok());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut store = store();
        for i in 0..32 {
            store
                .put(NamespaceId::DEFAULT, &format!("k{i}"), ValueType::Bool, &[0], EntryFlags::DEFAULT)
                .unwrap();
        }
        assert!(matches!(
            store.put(NamespaceId::DEFAULT, "overflow", ValueType::Bool, &[0], EntryFlags::DEFAULT),
            Err(ConfigError::NoSpace { capacity: 32, .. })
        ));
        // Overwriting still works when full
        assert!(store
            .put(NamespaceId::DEFAULT, "k0", ValueType::Bool, &[1], EntryFlags::DEFAULT)
            .is_ok());
    }

    #[test]
    fn delete_frees_slot_for_reuse() {
        let mut store = store();
        let a = store
            .put(NamespaceId::DEFAULT, "a", ValueType::Bool, &[0], EntryFlags::DEFAULT)
            .unwrap();
        store
            .put(NamespaceId::DEFAULT, "b", ValueType::Bool, &[0], EntryFlags::DEFAULT)
            .unwrap();
        store.delete(NamespaceId::DEFAULT, "a").unwrap();
        assert!(store.lookup(NamespaceId::DEFAULT, "a").is_none());

        let c = store
            .put(NamespaceId::DEFAULT, "c", ValueType::Bool, &[0], EntryFlags::DEFAULT)
            .unwrap();
        assert_eq!(c.index, a.index);
        assert!(matches!(
            store.delete(NamespaceId::DEFAULT, "a"),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn namespaces_are_isolated() {
        let mut store = store();
        store
            .put(NamespaceId::DEFAULT, "value", ValueType::I32, &100i32.to_le_bytes(), EntryFlags::DEFAULT)
            .unwrap();
        store
            .put(NS1, "value", ValueType::I32, &200i32.to_le_bytes(), EntryFlags::DEFAULT)
            .unwrap();

        assert_eq!(
            store.get(NamespaceId::DEFAULT, "value", ValueType::I32).unwrap().value,
            &100i32.to_le_bytes()
        );
        assert_eq!(store.get(NS1, "value", ValueType::I32).unwrap().value, &200i32.to_le_bytes());

        assert_eq!(store.remove_scope(Scope::Namespace(NS1)), 1);
        assert!(store.lookup(NamespaceId::DEFAULT, "value").is_some());
        assert_eq!(store.count(Scope::Namespace(NS1)), 0);
    }

    #[test]
    fn read_only_rejects_put_and_delete() {
        let mut store = store();
        let flags = EntryFlags::READ_ONLY | EntryFlags::PERSISTENT;
        store
            .put(NamespaceId::DEFAULT, "serial", ValueType::Str, b"A1", flags)
            .unwrap();
        assert!(matches!(
            store.put(NamespaceId::DEFAULT, "serial", ValueType::Str, b"B2", flags),
            Err(ConfigError::ReadOnly { .. })
        ));
        assert!(matches!(
            store.delete(NamespaceId::DEFAULT, "serial"),
            Err(ConfigError::ReadOnly { .. })
        ));
        assert_eq!(store.remove_scope(Scope::All), 1);
    }

    #[test]
    fn iteration_is_in_slot_order() {
        let mut store = store();
        for key in ["c", "a", "b"] {
            store
                .put(NamespaceId::DEFAULT, key, ValueType::Bool, &[0], EntryFlags::DEFAULT)
                .unwrap();
        }
        store.delete(NamespaceId::DEFAULT, "a").unwrap();
        store
            .put(NS1, "d", ValueType::Bool, &[0], EntryFlags::DEFAULT)
            .unwrap();

        let keys: Vec<_> = store.iter(Scope::All).map(|e| e.key.to_string()).collect();
        assert_eq!(keys, vec!["c", "d", "b"]);

        let scoped: Vec<_> = store.iter(Scope::Namespace(NS1)).map(|e| e.key.to_string()).collect();
        assert_eq!(scoped, vec!["d"]);
    }

    #[test]
    fn changed_markers() {
        let mut store = store();
        let outcome = store
            .put(NamespaceId::DEFAULT, "k", ValueType::Bool, &[0], EntryFlags::DEFAULT)
            .unwrap();
        assert!(store.at(outcome.index).unwrap().changed);
        store.mark_all_clean();
        assert!(!store.at(outcome.index).unwrap().changed);
        store.replace_value(outcome.index, &[1]).unwrap();
        assert!(store.at(outcome.index).unwrap().changed);
    }
}

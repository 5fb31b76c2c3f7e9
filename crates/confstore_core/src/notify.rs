//! Change notification.
//!
//! Observers register against one key or against every key (wildcard).
//! After each successful put or delete the manager builds a
//! [`ChangeEvent`] and dispatches it synchronously, in registration order,
//! while still holding the manager lock.
//!
//! A callback must not call back into the manager that invoked it: the
//! lock is not re-entrant and the call would deadlock.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{CallbackHandle, NamespaceId, Value, ValueType};
use tracing::warn;

/// Error type returned by callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// A change observer.
///
/// Any user context is whatever the closure captures.
pub type ChangeCallback = Box<dyn Fn(&ChangeEvent<'_>) -> Result<(), CallbackError> + Send + Sync>;

/// A single change, as seen by callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeEvent<'a> {
    /// Namespace of the changed entry.
    pub namespace: NamespaceId,
    /// Name of that namespace.
    pub namespace_name: &'a str,
    /// Unqualified key.
    pub key: &'a str,
    /// Type of the entry.
    pub value_type: ValueType,
    /// Value before the change; `None` when the entry was just created.
    pub old: Option<&'a Value>,
    /// Value after the change; `None` for deletes.
    pub new: Option<&'a Value>,
}

impl ChangeEvent<'_> {
    /// Returns true if this event records a deletion.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.new.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyFilter {
    Exact(String),
    Wildcard,
}

impl KeyFilter {
    fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(k) => k == key,
            Self::Wildcard => true,
        }
    }
}

struct Registration {
    handle: CallbackHandle,
    filter: KeyFilter,
    callback: ChangeCallback,
}

/// Table of registered callbacks.
pub(crate) struct NotificationManager {
    registrations: Vec<Registration>,
    capacity: usize,
    next_handle: u32,
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("registrations", &self.registrations.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl NotificationManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            registrations: Vec::with_capacity(capacity),
            capacity,
            next_handle: 1,
        }
    }

    fn add(&mut self, filter: KeyFilter, callback: ChangeCallback) -> ConfigResult<CallbackHandle> {
        if self.registrations.len() >= self.capacity {
            return Err(ConfigError::no_space("callback", self.capacity));
        }
        let handle = CallbackHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.registrations.push(Registration {
            handle,
            filter,
            callback,
        });
        Ok(handle)
    }

    /// Registers a callback for one key.
    pub fn register<F>(&mut self, key: &str, callback: F) -> ConfigResult<CallbackHandle>
    where
        F: Fn(&ChangeEvent<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.add(KeyFilter::Exact(key.to_string()), Box::new(callback))
    }

    /// Registers a callback for every key.
    pub fn register_wildcard<F>(&mut self, callback: F) -> ConfigResult<CallbackHandle>
    where
        F: Fn(&ChangeEvent<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.add(KeyFilter::Wildcard, Box::new(callback))
    }

    /// Removes a registration.
    pub fn unregister(&mut self, handle: CallbackHandle) -> ConfigResult<()> {
        let index = self
            .registrations
            .iter()
            .position(|r| r.handle == handle)
            .ok_or_else(|| ConfigError::not_found(format!("callback {}", handle.as_u32())))?;
        // Vec::remove keeps registration order
        self.registrations.remove(index);
        Ok(())
    }

    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.registrations.len()
    }

    /// Invokes every matching callback once. Returns how many ran.
    ///
    /// Callback errors are logged and do not stop the loop.
    pub fn dispatch(&self, event: &ChangeEvent<'_>) -> usize {
        let mut invoked = 0;
        for registration in &self.registrations {
            if !registration.filter.matches(event.key) {
                continue;
            }
            invoked += 1;
            if let Err(e) = (registration.callback)(event) {
                warn!(
                    handle = registration.handle.as_u32(),
                    key = event.key,
                    error = %e,
                    "change callback failed"
                );
            }
        }
        invoked
    }
}

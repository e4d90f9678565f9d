//! Attribute subscription registry.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::codec::Attributes;

/// Callback invoked with the full attribute document of a push.
pub type AttributeCallback = Arc<dyn Fn(&Attributes) + Send + Sync>;

/// Identifies one registration, across all attribute keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubscriptionHandle(u32);

impl SubscriptionHandle {
    pub fn get(self) -> u32 {
        self.0
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttributeFilter {
    /// Every attribute push, whatever it contains.
    All,
    /// Pushes that contain this attribute.
    Key(String),
}

/// `"*"` is the wildcard, any other string names one attribute.
impl From<&str> for AttributeFilter {
    fn from(key: &str) -> Self {
        match key {
            "*" => AttributeFilter::All,
            key => AttributeFilter::Key(String::from(key)),
        }
    }
}

type Callbacks = BTreeMap<SubscriptionHandle, AttributeCallback>;

/// Keyed set of attribute callbacks.
///
/// Handles come from one counter shared by all keys, so a handle alone is
/// enough to find its registration again. A key whose last callback is
/// removed is pruned right away.
#[derive(Default)]
pub struct SubscriptionRegistry {
    all: Callbacks,
    keys: BTreeMap<String, Callbacks>,
    last_handle: u32,
}

impl SubscriptionRegistry {
    pub const fn new() -> Self {
        Self {
            all: BTreeMap::new(),
            keys: BTreeMap::new(),
            last_handle: 0,
        }
    }

    pub fn subscribe(&mut self, filter: AttributeFilter, callback: AttributeCallback) -> SubscriptionHandle {
        let handle = self.next_handle();
        match filter {
            AttributeFilter::All => {
                self.all.insert(handle, callback);
            }
            AttributeFilter::Key(key) => {
                self.keys.entry(key).or_default().insert(handle, callback);
            }
        }
        handle
    }

    /// Removes the registration behind `handle` and hands its callback back.
    /// Unknown handles are ignored.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Option<AttributeCallback> {
        if let Some(callback) = self.all.remove(&handle) {
            return Some(callback);
        }
        let (key, callback) = self
            .keys
            .iter_mut()
            .find_map(|(key, callbacks)| Some((key.clone(), callbacks.remove(&handle)?)))?;
        if self.keys.get(&key).is_some_and(BTreeMap::is_empty) {
            self.keys.remove(&key);
        }
        Some(callback)
    }

    /// Removes every registration, returning the callbacks.
    pub fn clear(&mut self) -> Vec<AttributeCallback> {
        let mut removed: Vec<AttributeCallback> = core::mem::take(&mut self.all).into_values().collect();
        for callbacks in core::mem::take(&mut self.keys).into_values() {
            removed.extend(callbacks.into_values());
        }
        removed
    }

    pub fn contains(&self, handle: SubscriptionHandle) -> bool {
        self.all.contains_key(&handle) || self.keys.values().any(|callbacks| callbacks.contains_key(&handle))
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.all.len() + self.keys.values().map(BTreeMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.keys.is_empty()
    }

    /// Number of distinct attribute keys with at least one registration.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Callbacks to run for a push of `attributes`: every wildcard callback,
    /// then the callbacks of each attribute present in the push. A callback
    /// registered more than once appears once per registration.
    pub fn matching(&self, attributes: &Attributes) -> Vec<AttributeCallback> {
        let mut matched: Vec<AttributeCallback> = self.all.values().cloned().collect();
        for name in attributes.keys() {
            if let Some(callbacks) = self.keys.get(name.as_str()) {
                matched.extend(callbacks.values().cloned());
            }
        }
        matched
    }

    fn next_handle(&mut self) -> SubscriptionHandle {
        loop {
            self.last_handle = self.last_handle.wrapping_add(1).max(1);
            let handle = SubscriptionHandle(self.last_handle);
            if !self.contains(handle) {
                return handle;
            }
        }
    }
}

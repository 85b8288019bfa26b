//! Baseline and working auxiliary stores.
//!
//! The resolver builds one *baseline* [`AuxStore`] per pipeline assembly;
//! every invocation then works on its own copy (the *working store*),
//! exclusively owned by the runner for the duration of that invocation.
//! `Never`-policy values that could not be hoisted at assembly time are
//! committed after their final transform into write-once [`FreezeSlots`].

use crate::keys::{AuxKey, KeySet};
use crate::policy::UpdatePolicy;
use crate::value::AuxValue;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// One auxiliary entry: the payload plus the policy its producer declared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuxDatum {
    /// The payload.
    pub value: AuxValue,
    /// The producing stage's declared update policy.
    pub policy: UpdatePolicy,
}

/// The key→datum mapping threaded between stages.
///
/// Entries are held in key order so that iteration, serialization, and the
/// baseline-equality determinism check are stable across assemblies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuxStore {
    entries: BTreeMap<AuxKey, AuxDatum>,
}

impl AuxStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the datum under `key`.
    pub fn insert(&mut self, key: AuxKey, value: AuxValue, policy: UpdatePolicy) {
        self.entries.insert(key, AuxDatum { value, policy });
    }

    /// Gets the value under `key`.
    #[must_use]
    pub fn get(&self, key: AuxKey) -> Option<&AuxValue> {
        self.entries.get(&key).map(|d| &d.value)
    }

    /// Gets the value under `key` mutably.
    pub fn get_mut(&mut self, key: AuxKey) -> Option<&mut AuxValue> {
        self.entries.get_mut(&key).map(|d| &mut d.value)
    }

    /// Gets the full datum under `key`.
    #[must_use]
    pub fn datum(&self, key: AuxKey) -> Option<&AuxDatum> {
        self.entries.get(&key)
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, key: AuxKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Removes and returns the datum under `key`.
    pub fn remove(&mut self, key: AuxKey) -> Option<AuxDatum> {
        self.entries.remove(&key)
    }

    /// Drops every entry whose key is not in `retain`, returning the
    /// dropped entries.
    pub fn narrow(&mut self, retain: &KeySet) -> Vec<(AuxKey, AuxDatum)> {
        let dropped_keys: Vec<AuxKey> = self
            .entries
            .keys()
            .copied()
            .filter(|k| !retain.contains(*k))
            .collect();

        dropped_keys
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|d| (k, d)))
            .collect()
    }

    /// Returns the set of keys currently present.
    #[must_use]
    pub fn keys(&self) -> KeySet {
        self.entries.keys().copied().collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (AuxKey, &AuxDatum)> {
        self.entries.iter().map(|(k, d)| (*k, d))
    }
}

/// Write-once slots for deferred `Never`-policy values.
///
/// The resolver reserves one slot per `Never` key it could not hoist; the
/// runner's commit writes each slot at most once for the instance lifetime.
/// The write-once discipline is carried by [`OnceLock`] rather than a
/// runtime check.
#[derive(Debug, Default)]
pub(crate) struct FreezeSlots {
    slots: BTreeMap<AuxKey, OnceLock<AuxValue>>,
}

impl FreezeSlots {
    /// Reserves a slot for `key`.
    pub fn reserve(&mut self, key: AuxKey) {
        self.slots.entry(key).or_default();
    }

    /// Returns the frozen value for `key`, if committed.
    pub fn get(&self, key: AuxKey) -> Option<&AuxValue> {
        self.slots.get(&key).and_then(OnceLock::get)
    }

    /// Returns true once `key` has been committed.
    pub fn is_frozen(&self, key: AuxKey) -> bool {
        self.get(key).is_some()
    }

    /// Commits the value for `key`. Returns `false` if the slot was never
    /// reserved or was already written.
    pub fn freeze(&self, key: AuxKey, value: AuxValue) -> bool {
        self.slots
            .get(&key)
            .is_some_and(|slot| slot.set(value).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const K: AuxKey = AuxKey::new("k");
    const L: AuxKey = AuxKey::new("l");

    #[test]
    fn test_insert_and_get() {
        let mut store = AuxStore::new();
        store.insert(K, AuxValue::Int(3), UpdatePolicy::Never);

        assert_eq!(store.get(K), Some(&AuxValue::Int(3)));
        assert_eq!(store.datum(K).map(|d| d.policy), Some(UpdatePolicy::Never));
        assert!(!store.contains(L));
    }

    #[test]
    fn test_insert_replaces() {
        let mut store = AuxStore::new();
        store.insert(K, AuxValue::Int(3), UpdatePolicy::Always);
        store.insert(K, AuxValue::Int(4), UpdatePolicy::Always);

        assert_eq!(store.get(K), Some(&AuxValue::Int(4)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_mut() {
        let mut store = AuxStore::new();
        store.insert(K, AuxValue::Int(3), UpdatePolicy::Always);

        if let Some(AuxValue::Int(v)) = store.get_mut(K) {
            *v += 1;
        }
        assert_eq!(store.get(K), Some(&AuxValue::Int(4)));
    }

    #[test]
    fn test_narrow_returns_dropped() {
        let mut store = AuxStore::new();
        store.insert(K, AuxValue::Int(1), UpdatePolicy::Always);
        store.insert(L, AuxValue::Int(2), UpdatePolicy::Sometimes);

        let retain: KeySet = [K].into_iter().collect();
        let dropped = store.narrow(&retain);

        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].0, L);
        assert!(store.contains(K));
        assert!(!store.contains(L));
    }

    #[test]
    fn test_clone_is_independent() {
        let mut baseline = AuxStore::new();
        baseline.insert(K, AuxValue::Int(1), UpdatePolicy::Never);

        let mut working = baseline.clone();
        working.insert(L, AuxValue::Int(2), UpdatePolicy::Always);

        assert!(!baseline.contains(L));
        assert_eq!(baseline, {
            let mut expected = AuxStore::new();
            expected.insert(K, AuxValue::Int(1), UpdatePolicy::Never);
            expected
        });
    }

    #[test]
    fn test_freeze_slots_write_once() {
        let mut slots = FreezeSlots::default();
        slots.reserve(K);

        assert!(!slots.is_frozen(K));
        assert!(slots.freeze(K, AuxValue::Int(9)));
        assert!(slots.is_frozen(K));

        assert!(!slots.freeze(K, AuxValue::Int(10)));
        assert_eq!(slots.get(K), Some(&AuxValue::Int(9)));
    }

    #[test]
    fn test_freeze_unreserved_key_is_rejected() {
        let slots = FreezeSlots::default();
        assert!(!slots.freeze(K, AuxValue::Int(1)));
    }
}

//! Canonical tag key → distinct observed values, with counts (spec.md
//! §4.5.3). Used to answer "what values has this tag namespace ever
//! taken" without scanning every entity's timeline.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Maps a canonical tag key (the `namespace:key` portion of a tag value,
/// e.g. `status:active` → key `status`) to the distinct full values
/// observed under it and how many live tag-index entries currently carry
/// each.
pub struct VariantCache {
    inner: RwLock<HashMap<String, HashMap<String, u64>>>,
}

impl VariantCache {
    pub fn new() -> Self {
        VariantCache {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Record one more live occurrence of `full_value` under `key`.
    pub fn observe(&self, key: &str, full_value: &str) {
        let mut guard = self.inner.write();
        *guard
            .entry(key.to_string())
            .or_default()
            .entry(full_value.to_string())
            .or_insert(0) += 1;
    }

    /// Record that a live occurrence of `full_value` under `key` went
    /// away (the entity carrying it was deleted, or the value changed).
    /// Drops the value and, if it was the last one, the key entry once
    /// the count reaches zero.
    pub fn unobserve(&self, key: &str, full_value: &str) {
        let mut guard = self.inner.write();
        if let Some(values) = guard.get_mut(key) {
            if let Some(count) = values.get_mut(full_value) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    values.remove(full_value);
                }
            }
            if values.is_empty() {
                guard.remove(key);
            }
        }
    }

    /// Distinct values observed under `key`, each with its live count.
    pub fn variants(&self, key: &str) -> Vec<(String, u64)> {
        self.inner
            .read()
            .get(key)
            .map(|values| values.iter().map(|(v, c)| (v.clone(), *c)).collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

impl Default for VariantCache {
    fn default() -> Self {
        Self::new()
    }
}

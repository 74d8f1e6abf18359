use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered set of `(key, value)` label pairs attached to a sample.
///
/// Keys keep the order in which they were added. That order becomes the
/// label schema of a metric the first time it is recorded, so callers must
/// never rely on two separately ordered containers lining up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    /// Create an empty label set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a label, replacing the value if the key is already present.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a label in place, replacing the value of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Get the value of a label.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Label keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check whether this label set has exactly the given keys, ignoring order.
    pub fn has_key_set(&self, keys: &[String]) -> bool {
        self.0.len() == keys.len() && keys.iter().all(|k| self.get(k).is_some())
    }

    /// Project the label values onto `keys`, in that order.
    ///
    /// Returns `None` unless the key sets are identical.
    pub fn values_for(&self, keys: &[String]) -> Option<Vec<String>> {
        if !self.has_key_set(keys) {
            return None;
        }
        keys.iter()
            .map(|k| self.get(k).map(str::to_string))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut labels = Labels::new();
        for (k, v) in iter {
            labels.insert(k, v);
        }
        labels
    }
}

/// One labeled value produced during a collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub labels: Labels,
}

impl Sample {
    pub fn new(value: f64, labels: Labels) -> Self {
        Self { value, labels }
    }
}

/// Samples grouped by metric suffix, in the order the metrics were requested.
pub type MetricCollection = IndexMap<String, Vec<Sample>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_keep_insertion_order() {
        let labels = Labels::new()
            .with("domain", "vm-1")
            .with("target_disk", "vda");

        let keys: Vec<_> = labels.keys().collect();
        assert_eq!(keys, vec!["domain", "target_disk"]);
        assert_eq!(labels.get("target_disk"), Some("vda"));
    }

    #[test]
    fn test_labels_insert_replaces_existing() {
        let labels = Labels::new().with("domain", "a").with("domain", "b");

        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("domain"), Some("b"));
    }

    #[test]
    fn test_key_set_ignores_order() {
        let labels = Labels::new()
            .with("target_disk", "vda")
            .with("domain", "vm-1");
        let keys = vec!["domain".to_string(), "target_disk".to_string()];

        assert!(labels.has_key_set(&keys));
        assert_eq!(
            labels.values_for(&keys),
            Some(vec!["vm-1".to_string(), "vda".to_string()])
        );
    }

    #[test]
    fn test_values_for_rejects_different_keys() {
        let labels = Labels::new().with("domain", "vm-1");
        let keys = vec!["domain".to_string(), "target_disk".to_string()];

        assert!(!labels.has_key_set(&keys));
        assert_eq!(labels.values_for(&keys), None);
    }

    #[test]
    fn test_labels_from_iter() {
        let labels: Labels = [("domain", "vm-1"), ("target_interface", "vnet0")]
            .into_iter()
            .collect();

        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("target_interface"), Some("vnet0"));
    }
}

//! The variable store: a hand-written separate-chaining hash table (djb2
//! hashing, capacity-16 start, 0.75 load-factor doubling), implemented here
//! rather than delegated to `std::collections::HashMap` so its resize and
//! collision behaviour can be tested directly.

const INITIAL_CAPACITY: usize = 16;
const MAX_LOAD_FACTOR: f64 = 0.75;

use crate::value::Value;

/// djb2: `h = 33*h + c`, seed 5381.
fn djb2_hash(key: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in key.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    buckets: Vec<Vec<(String, Value)>>,
    size: usize,
}

impl VariableStore {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); INITIAL_CAPACITY],
            size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn bucket_index(&self, key: &str) -> usize {
        (djb2_hash(key) % self.buckets.len() as u64) as usize
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let index = self.bucket_index(key);
        self.buckets[index]
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Creates or replaces a binding. Replacing drops the previous value;
    /// its `Rc`-backed payloads, if any, are released once nothing else
    /// references them.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let index = self.bucket_index(&key);

        if let Some(slot) = self.buckets[index].iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return;
        }

        self.buckets[index].push((key, value));
        self.size += 1;

        if self.size as f64 / self.buckets.len() as f64 >= MAX_LOAD_FACTOR {
            self.resize(self.buckets.len() * 2);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.bucket_index(key);
        let bucket = &mut self.buckets[index];
        let position = bucket.iter().position(|(k, _)| k == key)?;
        self.size -= 1;
        Some(bucket.remove(position).1)
    }

    /// Returns all bound names. Order is bucket/chain order, i.e.
    /// unspecified; callers that need a stable order should sort.
    pub fn keys(&self) -> Vec<String> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(|(k, _)| k.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.size = 0;
    }

    fn resize(&mut self, new_capacity: usize) {
        let mut new_buckets: Vec<Vec<(String, Value)>> = vec![Vec::new(); new_capacity];
        for (key, value) in self.buckets.drain(..).flatten() {
            let index = (djb2_hash(&key) % new_capacity as u64) as usize;
            new_buckets[index].push((key, value));
        }
        self.buckets = new_buckets;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_set_returns_the_same_value() {
        let mut store = VariableStore::new();
        store.set("name", Value::string("World"));
        assert_eq!(store.get("name"), Some(&Value::string("World")));
    }

    #[test]
    fn replacing_a_binding_does_not_grow_size() {
        let mut store = VariableStore::new();
        store.set("x", Value::Number(1.0));
        store.set("x", Value::Number(2.0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("x"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn remove_releases_the_binding() {
        let mut store = VariableStore::new();
        store.set("x", Value::Number(1.0));
        assert_eq!(store.remove("x"), Some(Value::Number(1.0)));
        assert!(!store.has("x"));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn load_factor_never_exceeds_threshold_after_set() {
        let mut store = VariableStore::new();
        for i in 0..1000 {
            store.set(format!("var{i}"), Value::Number(i as f64));
        }
        assert!(store.size as f64 / store.buckets.len() as f64 < MAX_LOAD_FACTOR);
    }

    #[test]
    fn every_key_is_present_exactly_once_after_resize() {
        let mut store = VariableStore::new();
        for i in 0..100 {
            store.set(format!("var{i}"), Value::Number(i as f64));
        }
        let keys = store.keys();
        assert_eq!(keys.len(), 100);
        for i in 0..100 {
            assert_eq!(keys.iter().filter(|k| **k == format!("var{i}")).count(), 1);
        }
    }

    #[test]
    fn clear_empties_the_store() {
        let mut store = VariableStore::new();
        store.set("x", Value::Number(1.0));
        store.clear();
        assert_eq!(store.len(), 0);
        assert!(!store.has("x"));
    }
}

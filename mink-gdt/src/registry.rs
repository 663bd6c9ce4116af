use indexmap::IndexMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// Keyed, insertion-ordered registry of shared, independently lockable entries.
///
/// Used for the client registry (keyed by daemon id) and the destination-type routing table
/// (keyed by daemon type) described in §4.3/§4.6. The teacher's original `Registry<K>` let a
/// single key carry several dynamically-typed trait objects via an `AnyMap`; nothing in this
/// crate registers more than one concrete type under a key, so that machinery is dropped in
/// favor of a plain `IndexMap<K, Arc<RwLock<V>>>` — same keyed/shared/lockable shape, without
/// the nightly `Unsize` bound or the leaking `WeakBox` crutch it required.
pub struct Registry<K, V>
where
    K: Eq + Hash,
{
    data: IndexMap<K, Arc<RwLock<V>>>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Registry<K, V> {
        Registry { data: IndexMap::new() }
    }

    /// Register a new value under `key`, replacing any previous entry.
    pub fn register(&mut self, key: K, value: V) -> Arc<RwLock<V>> {
        let entry = Arc::new(RwLock::new(value));
        self.data.insert(key, entry.clone());
        entry
    }

    /// Shared handle to the entry registered under `key`, if any.
    pub fn get(&self, key: &K) -> Option<Arc<RwLock<V>>> {
        self.data.get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.data.contains_key(key)
    }

    /// Remove and return the entry registered under `key`, preserving the order of the rest.
    pub fn remove(&mut self, key: &K) -> Option<Arc<RwLock<V>>> {
        self.data.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.data.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Arc<RwLock<V>>)> {
        self.data.iter()
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Foo {
        x: i32,
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::<i32, Foo>::new();
        registry.register(123, Foo { x: 2 });

        {
            let entry = registry.get(&123).unwrap();
            let foo = entry.read().unwrap();
            assert_eq!(foo.x, 2);
        }

        assert!(registry.get(&5).is_none());
    }

    #[test]
    fn test_write_through_shared_handle() {
        let mut registry = Registry::<i32, Foo>::new();
        registry.register(123, Foo { x: 2 });

        {
            let entry = registry.get(&123).unwrap();
            entry.write().unwrap().x = 10;
        }

        let entry = registry.get(&123).unwrap();
        assert_eq!(entry.read().unwrap().x, 10);
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut registry = Registry::<i32, Foo>::new();
        for id in [1, 2, 3] {
            registry.register(id, Foo { x: id });
        }

        registry.remove(&2);

        let remaining: Vec<i32> = registry.keys().copied().collect();
        assert_eq!(remaining, vec![1, 3]);
    }

    #[test]
    fn test_allows_multiple_readers() {
        let mut registry = Registry::<i32, Foo>::new();
        registry.register(123, Foo { x: 2 });

        let entry = registry.get(&123).unwrap();
        let r1 = entry.read().unwrap();
        let r2 = entry.read().unwrap();
        assert_eq!(r1.x, 2);
        assert_eq!(r2.x, 2);
    }

    #[test]
    fn test_iter_contents() {
        let mut registry = Registry::<i32, Foo>::new();
        for id in [1, 2, 3] {
            registry.register(id, Foo { x: id });
        }

        let mut seen: Vec<i32> = Vec::new();
        for (key, entry) in registry.iter() {
            assert_eq!(entry.read().unwrap().x, *key);
            seen.push(*key);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }
}

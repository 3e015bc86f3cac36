use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

/// Key/value store behind each reconciler's local state.
///
/// `modify` runs its closure under the store's write lock, so a
/// check-then-change on one record is atomic with respect to other callers.
pub trait RecordStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn upsert(&self, key: K, value: V);
    fn list(&self) -> Vec<V>;
    /// First record matching `predicate`, with its key.
    fn find<F>(&self, predicate: F) -> Option<(K, V)>
    where
        F: Fn(&V) -> bool;
    fn modify<R, F>(&self, key: K, change: F) -> R
    where
        F: FnOnce(&mut Option<V>) -> R;
}

impl<K, V, S> RecordStore<K, V> for Arc<S>
where
    S: RecordStore<K, V>,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) {
        (**self).upsert(key, value)
    }

    fn list(&self) -> Vec<V> {
        (**self).list()
    }

    fn find<F>(&self, predicate: F) -> Option<(K, V)>
    where
        F: Fn(&V) -> bool,
    {
        (**self).find(predicate)
    }

    fn modify<R, F>(&self, key: K, change: F) -> R
    where
        F: FnOnce(&mut Option<V>) -> R,
    {
        (**self).modify(key, change)
    }
}

/// In-memory store for tests/dev.
#[derive(Debug)]
pub struct InMemoryRecordStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryRecordStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryRecordStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RecordStore<K, V> for InMemoryRecordStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    fn upsert(&self, key: K, value: V) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key, value);
    }

    fn list(&self) -> Vec<V> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.values().cloned().collect()
    }

    fn find<F>(&self, predicate: F) -> Option<(K, V)>
    where
        F: Fn(&V) -> bool,
    {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.iter()
            .find(|(_, value)| predicate(value))
            .map(|(key, value)| (key.clone(), value.clone()))
    }

    fn modify<R, F>(&self, key: K, change: F) -> R
    where
        F: FnOnce(&mut Option<V>) -> R,
    {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut slot = map.remove(&key);
        let result = change(&mut slot);
        if let Some(value) = slot {
            map.insert(key, value);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modify_can_insert_update_and_remove() {
        let store = InMemoryRecordStore::<&'static str, u32>::new();

        let inserted = store.modify("a", |slot| slot.get_or_insert(1).to_owned());
        assert_eq!(inserted, 1);

        store.modify("a", |slot| {
            if let Some(value) = slot {
                *value += 1;
            }
        });
        assert_eq!(store.get(&"a"), Some(2));

        store.modify("a", |slot| *slot = None);
        assert_eq!(store.get(&"a"), None);
        assert!(store.list().is_empty());
    }

    #[test]
    fn find_returns_key_and_value() {
        let store = Arc::new(InMemoryRecordStore::<String, u32>::new());
        store.upsert("x".into(), 7);
        store.upsert("y".into(), 9);

        assert_eq!(store.find(|v| *v > 8), Some(("y".to_owned(), 9)));
        assert_eq!(store.find(|v| *v > 10), None);
    }
}

//! Keyed ownership of shared playback handles.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Handles that hold threads or devices and must be released explicitly.
pub trait Closeable: Send + Sync {
    fn close(&self);
}

/// Owns one handle per key. Created by the application and passed to whoever
/// needs it; there is no process-wide instance.
pub struct DeviceRegistry<K, H: Closeable> {
    entries: Mutex<HashMap<K, Arc<H>>>,
}

impl<K: Eq + Hash + Clone, H: Closeable> Default for DeviceRegistry<K, H> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, H: Closeable> DeviceRegistry<K, H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing handle for `key`, or one built by `create`. A failed
    /// `create` leaves the registry unchanged.
    pub fn get_or_create<E>(
        &self,
        key: &K,
        create: impl FnOnce() -> Result<H, E>,
    ) -> Result<Arc<H>, E> {
        let mut entries = self.entries.lock();
        if let Some(handle) = entries.get(key) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(create()?);
        entries.insert(key.clone(), handle.clone());
        Ok(handle)
    }

    pub fn get(&self, key: &K) -> Option<Arc<H>> {
        self.entries.lock().get(key).cloned()
    }

    /// Remove and close the handle for `key`.
    pub fn remove(&self, key: &K) -> bool {
        let removed = self.entries.lock().remove(key);
        match removed {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Close every handle and empty the registry.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.entries.lock().drain().map(|(_, h)| h).collect();
        if !drained.is_empty() {
            log::debug!("Closing {} registered handles", drained.len());
        }
        for handle in drained {
            handle.close();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K, H: Closeable> Drop for DeviceRegistry<K, H> {
    fn drop(&mut self) {
        for (_, handle) in self.entries.get_mut().drain() {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Handle {
        closes: AtomicUsize,
    }

    impl Closeable for Handle {
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn get_or_create_reuses_existing() {
        let registry: DeviceRegistry<String, Handle> = DeviceRegistry::new();
        let key = "a.mp4".to_string();
        let first = registry.get_or_create(&key, || Ok::<_, ()>(Handle::default())).unwrap();
        let second = registry
            .get_or_create(&key, || -> Result<Handle, ()> { panic!("must not rebuild") })
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_create_is_not_registered() {
        let registry: DeviceRegistry<u32, Handle> = DeviceRegistry::new();
        assert_eq!(registry.get_or_create(&1, || Err("nope")).err(), Some("nope"));
        assert!(registry.is_empty());
        assert!(registry.get(&1).is_none());
    }

    #[test]
    fn remove_and_close_all_close_handles() {
        let registry: DeviceRegistry<u32, Handle> = DeviceRegistry::new();
        let a = registry.get_or_create(&1, || Ok::<_, ()>(Handle::default())).unwrap();
        let b = registry.get_or_create(&2, || Ok::<_, ()>(Handle::default())).unwrap();

        assert!(registry.remove(&1));
        assert!(!registry.remove(&1));
        assert_eq!(a.closes.load(Ordering::SeqCst), 1);

        registry.close_all();
        assert_eq!(b.closes.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn drop_closes_remaining_handles() {
        let handle = {
            let registry: DeviceRegistry<u32, Handle> = DeviceRegistry::new();
            registry.get_or_create(&7, || Ok::<_, ()>(Handle::default())).unwrap()
        };
        assert_eq!(handle.closes.load(Ordering::SeqCst), 1);
    }
}

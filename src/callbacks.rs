//! Observer registration.
//!
//! Observers are plain closures called synchronously, in registration order.
//! Each registration yields a [`CallbackHandle`] that removes exactly that
//! observer.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle also unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("id", &self.id)
            .field("registered", &self.unregister_fn.is_some())
            .finish()
    }
}

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of observers.
pub struct ObserverRegistry<T> {
    observers: Arc<RwLock<Vec<(u64, Observer<T>)>>>,
    callback_counter: AtomicU64,
}

impl<T: 'static> ObserverRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            observers: Arc::new(RwLock::new(Vec::new())),
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Register an observer.
    pub fn register<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        self.observers
            .write()
            .push((callback_id, Arc::new(callback)));

        let observers = Arc::downgrade(&self.observers);
        CallbackHandle::new(callback_id, move || {
            if let Some(observers) = observers.upgrade() {
                observers.write().retain(|(id, _)| *id != callback_id);
            }
        })
    }

    /// Remove an observer by id. Unknown ids are ignored.
    pub fn remove(&self, callback_id: u64) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(id, _)| *id != callback_id);
        observers.len() != before
    }

    /// Invoke every observer with `value`.
    ///
    /// Iterates over a snapshot of the list, so observers may unregister
    /// themselves or others while being notified.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Observer<T>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in snapshot {
            observer(value);
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

impl<T: 'static> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_notify_in_registration_order() {
        let registry = ObserverRegistry::<u32>::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let calls = calls.clone();
            registry.register(move |v| calls.lock().push(("first", *v)))
        };
        let second = {
            let calls = calls.clone();
            registry.register(move |v| calls.lock().push(("second", *v)))
        };

        registry.notify(&7);

        assert_eq!(*calls.lock(), vec![("first", 7), ("second", 7)]);
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_unregister_removes_only_that_callback() {
        let registry = ObserverRegistry::<u32>::new();
        let count = Arc::new(AtomicU64::new(0));

        let a = {
            let count = count.clone();
            registry.register(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let _b = {
            let count = count.clone();
            registry.register(move |_| {
                count.fetch_add(10, Ordering::SeqCst);
            })
        };

        let a_id = a.id();
        a.unregister();
        registry.notify(&0);
        assert_eq!(count.load(Ordering::SeqCst), 10);

        // Removing the same id again leaves the other observer alone.
        assert!(!registry.remove(a_id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = ObserverRegistry::<u32>::new();
        {
            let _handle = registry.register(|_| {});
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_observer_can_unregister_itself() {
        let registry = Arc::new(ObserverRegistry::<u32>::new());
        let slot: Arc<Mutex<Option<CallbackHandle>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicU64::new(0));

        let handle = {
            let slot = slot.clone();
            let count = count.clone();
            registry.register(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = slot.lock().take() {
                    handle.unregister();
                }
            })
        };
        *slot.lock() = Some(handle);

        let other_calls = Arc::new(AtomicU64::new(0));
        let _other = {
            let other_calls = other_calls.clone();
            registry.register(move |_| {
                other_calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        registry.notify(&1);
        registry.notify(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(other_calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);
    }
}

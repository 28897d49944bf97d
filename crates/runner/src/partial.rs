//! Mailbox for intermediate values a guest streams while a call is running.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;

trait Deliver: Send {
    fn deliver(&mut self, data: &[u8]);
}

struct Entry<S, F> {
    accumulator: Arc<Mutex<Option<S>>>,
    handler: F,
}

impl<S, F> Deliver for Entry<S, F>
where
    S: Send,
    F: FnMut(Option<S>, &[u8]) -> Option<S> + Send,
{
    fn deliver(&mut self, data: &[u8]) {
        let mut slot = self.accumulator.lock();
        let previous = slot.take();
        *slot = (self.handler)(previous, data);
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: BTreeMap<u64, Box<dyn Deliver>>,
}

/// Registered handlers and their accumulators.
///
/// Cloning yields another reference to the same set of handlers.
#[derive(Clone, Default)]
pub struct PartialResults {
    registry: Arc<Mutex<Registry>>,
}

impl PartialResults {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`. Each delivery passes the accumulator the previous
    /// delivery returned (`None` on the first) and stores the new one.
    ///
    /// The handler is removed when the returned [`Registration`] is dropped.
    /// Handlers run under the registry lock and must not register or
    /// unregister.
    pub fn register<S, F>(&self, handler: F) -> Registration<S>
    where
        S: Send + 'static,
        F: FnMut(Option<S>, &[u8]) -> Option<S> + Send + 'static,
    {
        let accumulator = Arc::new(Mutex::new(None));
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.insert(
            id,
            Box::new(Entry {
                accumulator: Arc::clone(&accumulator),
                handler,
            }),
        );
        drop(registry);
        Registration {
            id,
            accumulator,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Hand `data` to every registered handler in registration order.
    pub fn deliver(&self, data: &[u8]) {
        let mut registry = self.registry.lock();
        for entry in registry.entries.values_mut() {
            entry.deliver(data);
        }
    }

    /// Remove a handler by id. Returns whether it was registered.
    pub fn unregister(&self, id: u64) -> bool {
        self.registry.lock().entries.remove(&id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PartialResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialResults")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Live handler registration; unregisters on drop.
pub struct Registration<S> {
    id: u64,
    accumulator: Arc<Mutex<Option<S>>>,
    registry: Arc<Mutex<Registry>>,
}

impl<S> Registration<S> {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Unregister and return the final accumulator.
    #[must_use]
    pub fn finish(self) -> Option<S> {
        self.registry.lock().entries.remove(&self.id);
        self.accumulator.lock().take()
    }
}

impl<S: Clone> Registration<S> {
    /// Copy of the current accumulator.
    #[must_use]
    pub fn snapshot(&self) -> Option<S> {
        self.accumulator.lock().clone()
    }
}

impl<S> Drop for Registration<S> {
    fn drop(&mut self) {
        self.registry.lock().entries.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn accumulator_threads_through_deliveries() {
        let channel = PartialResults::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let registration = channel.register(move |acc: Option<Vec<Vec<u8>>>, data: &[u8]| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            let mut acc = acc.unwrap_or_default();
            assert_eq!(acc.len(), n);
            acc.push(data.to_vec());
            Some(acc)
        });

        channel.deliver(b"one");
        channel.deliver(b"two");
        let acc = registration.finish();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(acc, Some(vec![b"one".to_vec(), b"two".to_vec()]));
        assert!(channel.is_empty());

        channel.deliver(b"three");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let channel = PartialResults::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let registrations: Vec<_> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                channel.register(move |_: Option<()>, _: &[u8]| {
                    order.lock().push(i);
                    None
                })
            })
            .collect();
        channel.deliver(&[]);
        assert_eq!(*order.lock(), [0, 1, 2]);
        drop(registrations);
        assert!(channel.is_empty());
    }

    #[test]
    fn drop_unregisters_and_ids_are_unique() {
        let channel = PartialResults::new();
        let a = channel.register(|_: Option<u8>, _: &[u8]| None);
        let b = channel.register(|_: Option<u8>, _: &[u8]| None);
        assert_ne!(a.id(), b.id());
        assert!(channel.unregister(a.id()));
        assert!(!channel.unregister(a.id()));
        drop(b);
        assert!(channel.is_empty());
    }

    #[test]
    fn snapshot_reflects_latest_accumulator() {
        let channel = PartialResults::new();
        let registration =
            channel.register(|acc: Option<usize>, data: &[u8]| Some(acc.unwrap_or(0) + data.len()));
        assert_eq!(registration.snapshot(), None);
        channel.deliver(&[1, 2, 3]);
        channel.deliver(&[4]);
        assert_eq!(registration.snapshot(), Some(4));
    }
}

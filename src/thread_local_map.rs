//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! A keyed per-thread slot map independent of the language's built-in
//! `thread_local!` storage.
//!
//! `CommandQueue` needs a "producer handle to my DBQ" path that a *different*
//! thread (the render thread, during swap) can enumerate in registration
//! order. A `thread_local!` static cannot be walked from another thread, so
//! this models the same confinement discipline with an explicit map keyed
//! by `ThreadId`, gated by a single mutex the same way the reference
//! engine's `command_queue` guards its `m_queue_vector`/`m_update_vector`
//! pair.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::ThreadId;

/// Consumer-side insertion order is preserved so two different walks of the
/// same map agree on ordering (`CommandQueue::execute` relies on this to
/// keep "first-producer-to-enqueue-wins" ordering across DBQs).
pub struct ThreadLocalMap<V> {
    inner: Mutex<Inner<V>>,
}

struct Inner<V> {
    order: Vec<ThreadId>,
    slots: HashMap<ThreadId, Arc<V>>,
}

impl<V> Default for ThreadLocalMap<V> {
    fn default() -> Self {
        ThreadLocalMap::new()
    }
}

impl<V> ThreadLocalMap<V> {
    pub fn new() -> Self {
        ThreadLocalMap {
            inner: Mutex::new(Inner {
                order: Vec::new(),
                slots: HashMap::new(),
            }),
        }
    }

    /// Looks up the calling thread's slot; on miss, calls `f` under the
    /// map's mutex and registers the result.
    pub fn get_or_insert_with(&self, f: impl FnOnce() -> V) -> Arc<V> {
        let thread = std::thread::current().id();
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.slots.get(&thread) {
            return Arc::clone(existing);
        }
        let value = Arc::new(f());
        inner.slots.insert(thread, Arc::clone(&value));
        inner.order.push(thread);
        value
    }

    /// Consumer-side iteration in registration order. Callers are expected
    /// to only invoke this while producers cannot be racing a registration
    /// (e.g. the render thread parked during swap), mirroring
    /// `CommandQueue`'s own consumer-side-list invariant.
    pub fn for_each(&self, mut f: impl FnMut(ThreadId, &V)) {
        let inner = self.inner.lock();
        for thread in &inner.order {
            if let Some(value) = inner.slots.get(thread) {
                f(*thread, value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[test]
    fn registers_once_per_thread() {
        let map: ThreadLocalMap<AtomicUsize> = ThreadLocalMap::new();
        let slot = map.get_or_insert_with(|| AtomicUsize::new(0));
        slot.fetch_add(1, Ordering::SeqCst);
        let slot2 = map.get_or_insert_with(|| AtomicUsize::new(99));
        assert_eq!(slot2.load(Ordering::SeqCst), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn multi_thread_registration_order() {
        let map: StdArc<ThreadLocalMap<usize>> = StdArc::new(ThreadLocalMap::new());
        let mut handles = Vec::new();
        for i in 0..4 {
            let map = StdArc::clone(&map);
            handles.push(std::thread::spawn(move || {
                map.get_or_insert_with(|| i);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 4);
        let mut seen = Vec::new();
        map.for_each(|_, v| seen.push(*v));
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
    }
}

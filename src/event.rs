//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Synchronous listener fan-out, used for lifecycle callbacks such as
//! `Graphics::scene_created`, `Graphics::destroyed`, and the window-driven
//! `size_changed`/`position_changed`/`frame`/`paused_changed` events a
//! display framebuffer listens to.
use parking_lot::Mutex;
use std::sync::Arc;

/// Whether an `Event` owns the listener it was given (and must drop it
/// itself on unbind/clear) or merely borrows it for the duration the
/// caller keeps it bound.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BindMode {
    Borrowed,
    Owned,
}

/// Opaque handle returned by `bind`, used to `unbind` later.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

struct Listener<F> {
    id: ListenerId,
    delegate: Arc<F>,
    #[allow(dead_code)] // kept for API fidelity with the source's
    // {delegate, ownership-mode} pair; Rust's ownership makes an explicit
    // "owned" drop path unnecessary since `F` is dropped with the vector
    // entry regardless of mode.
    mode: BindMode,
}

/// An ordered list of listeners, dispatched in reverse insertion order.
/// Listener removal (`unbind`) is safe to call from within `signal`'s own
/// dispatch loop: dispatch walks a snapshot of `(id, delegate)` pairs taken
/// up front, re-checking against the live list by id (not position)
/// immediately before each call, so a listener unbinding itself or an
/// earlier one mid-dispatch can neither be skipped nor invoked twice.
pub struct Event<F> {
    listeners: Mutex<Vec<Listener<F>>>,
    next_id: Mutex<u64>,
}

impl<F> Default for Event<F> {
    fn default() -> Self {
        Event::new()
    }
}

impl<F> Event<F> {
    pub fn new() -> Self {
        Event {
            listeners: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    pub fn bind(&self, delegate: F, mode: BindMode) -> ListenerId {
        let id = {
            let mut next_id = self.next_id.lock();
            let id = ListenerId(*next_id);
            *next_id += 1;
            id
        };
        self.listeners.lock().push(Listener {
            id,
            delegate: Arc::new(delegate),
            mode,
        });
        id
    }

    /// O(n) linear removal. Returns whether a listener with that id was
    /// found.
    pub fn unbind(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        if let Some(pos) = listeners.iter().position(|l| l.id == id) {
            listeners.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F> Event<F>
where
    F: Fn(),
{
    /// Invokes every currently bound listener in reverse insertion order.
    /// Dispatches over a snapshot of ids taken up front rather than
    /// re-indexing the live `Vec`, so a listener removing itself (or any
    /// other listener) mid-dispatch does not cause a shifted survivor to
    /// be invoked twice; the delegate is called with the list unlocked so
    /// it may itself call `bind`/`unbind`/`signal`.
    pub fn signal(&self) {
        let snapshot: Vec<(ListenerId, Arc<F>)> = self
            .listeners
            .lock()
            .iter()
            .map(|l| (l.id, Arc::clone(&l.delegate)))
            .collect();
        for (id, delegate) in snapshot.into_iter().rev() {
            if !self.listeners.lock().iter().any(|l| l.id == id) {
                // Unbound (by itself or another listener) since the
                // snapshot was taken.
                continue;
            }
            delegate();
        }
    }
}

impl<F> Event<F> {
    /// As `signal`, for listeners that take a single argument (e.g. a
    /// window's `size_changed(width, height)`). Kept as a separate method
    /// rather than overloading `signal` because `F: Fn()` and `F: Fn(A)`
    /// cannot both be the bound on one method.
    pub fn signal_with<A>(&self, arg: A)
    where
        F: Fn(A),
        A: Clone,
    {
        let snapshot: Vec<(ListenerId, Arc<F>)> = self
            .listeners
            .lock()
            .iter()
            .map(|l| (l.id, Arc::clone(&l.delegate)))
            .collect();
        for (id, delegate) in snapshot.into_iter().rev() {
            if !self.listeners.lock().iter().any(|l| l.id == id) {
                continue;
            }
            delegate(arg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_reverse_order() {
        let event: Event<Box<dyn Fn()>> = Event::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            event.bind(Box::new(move || order.lock().push(i)), BindMode::Owned);
        }
        event.signal();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn unbind_during_dispatch() {
        let event: Event<Box<dyn Fn()>> = Event::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        let id1 = event.bind(Box::new(move || { c1.fetch_add(1, Ordering::SeqCst); }), BindMode::Owned);

        // A listener that unbinds an earlier one (by insertion order) while
        // dispatch is in progress.
        let event_ptr: *const Event<Box<dyn Fn()>> = &event;
        let c2 = calls.clone();
        event.bind(
            Box::new(move || {
                c2.fetch_add(1, Ordering::SeqCst);
                // Safety: `event` outlives this closure's invocation; this
                // mirrors the source's documented tolerance for removal
                // during dispatch.
                unsafe { (*event_ptr).unbind(id1) };
            }),
            BindMode::Owned,
        );

        event.signal();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn unbind_returns_false_for_unknown_id() {
        let event: Event<Box<dyn Fn()>> = Event::new();
        let id = event.bind(Box::new(|| {}), BindMode::Borrowed);
        assert!(event.unbind(id));
        assert!(!event.unbind(id));
    }
}

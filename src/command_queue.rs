//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Named command queues: the staging layer between producer threads and
//! the render thread.
//!
//! Every producer thread gets its own `DoubleBufferQueue` (looked up
//! through `ThreadLocalMap`, the same per-thread confinement the queue
//! assumes its caller provides), so concurrent producers never contend
//! with each other; the render thread swaps and drains every registered
//! queue in the order producers first registered, matching the reference
//! engine's `command_queue::swap`/`execute`. Each command is placement-
//! constructed directly into its producer's DBQ byte ring: `enqueue_command`
//! reserves `size_of::<CommandRecord<T>>()` bytes aligned to
//! `align_of::<CommandRecord<T>>()`, writes the concrete `T` alongside a
//! manually-built two-function vtable, and `execute` reconstructs a
//! callable record from the raw bytes it dequeues — the "trait-object slot
//! with an in-band vtable pointer" the reference engine's placement-`new`
//! `command<F>` plays the same role for.
use crate::context::Context;
use crate::dbq::DoubleBufferQueue;
use crate::error::Result;
use crate::name_table::NamedObject;
use crate::render_thread::RenderThreadToken;
use crate::thread_local_map::ThreadLocalMap;
use parking_lot::Mutex;

/// A unit of work staged into a `CommandQueue`. Closures are the natural
/// fit here (the reference engine's heap-allocated, placement-`new`'d
/// `command<F>` template serves exactly this role); any `FnMut(&mut dyn
/// Context) + Send` can be enqueued directly.
pub trait Command: Send {
    fn execute(&mut self, context: &mut dyn Context);
}

impl<F> Command for F
where
    F: FnMut(&mut dyn Context) + Send,
{
    fn execute(&mut self, context: &mut dyn Context) {
        self(context)
    }
}

/// The two operations `CommandQueue::execute` needs to perform on a
/// type-erased record without knowing its concrete type: run it, then
/// destroy it. One instance per concrete `T`, reached through
/// `CommandRecord<T>::vtable()`.
struct CommandVTable {
    execute: unsafe fn(*mut u8, &mut dyn Context),
    drop_in_place: unsafe fn(*mut u8),
}

unsafe fn execute_record<T: Command>(ptr: *mut u8, context: &mut dyn Context) {
    (*(ptr as *mut CommandRecord<T>)).payload.execute(context);
}

unsafe fn drop_record<T: Command>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut CommandRecord<T>);
}

/// Gives every `T: Command + 'static` a `'static` vtable instance, one per
/// monomorphization, without needing a `static` item that references a
/// generic parameter (not legal in Rust) or runtime registration: an
/// associated const is duplicated per impl instantiation, and a reference
/// to a const item is always promoted to `'static`.
trait HasCommandVTable {
    const VTABLE: CommandVTable;
}

impl<T: Command + 'static> HasCommandVTable for T {
    const VTABLE: CommandVTable = CommandVTable {
        execute: execute_record::<T>,
        drop_in_place: drop_record::<T>,
    };
}

/// The record placement-written into a producer's DBQ: a vtable pointer
/// immediately followed by the concrete command. `#[repr(C)]` pins the
/// vtable at offset 0, so `RecordHeader` can read it back out of an
/// erased `*mut u8` without knowing `T`.
#[repr(C)]
struct CommandRecord<T> {
    vtable: &'static CommandVTable,
    payload: T,
}

impl<T: Command + 'static> CommandRecord<T> {
    fn vtable() -> &'static CommandVTable {
        &<T as HasCommandVTable>::VTABLE
    }
}

#[repr(C)]
struct RecordHeader {
    vtable: &'static CommandVTable,
}

/// A named, orderable staging queue. Cheap to enqueue into from any
/// thread; swapped and drained only by the render thread.
pub struct CommandQueue {
    named: NamedObject,
    token: std::sync::Arc<RenderThreadToken>,
    producer_buffers: ThreadLocalMap<Mutex<DoubleBufferQueue>>,
}

impl CommandQueue {
    pub fn new(name: &str, token: std::sync::Arc<RenderThreadToken>) -> Self {
        CommandQueue {
            named: NamedObject::named(name),
            token,
            producer_buffers: ThreadLocalMap::new(),
        }
    }

    pub fn name(&self) -> Option<String> {
        self.named.name()
    }

    pub fn name_hash(&self) -> u64 {
        self.named.hash()
    }

    /// Stages `command` for the next frame. May be called from any thread
    /// except the render thread itself (mirrors `command_queue::enqueue`'s
    /// `get_render_thread()->check_not()`). On the first call from a new
    /// producer thread, allocates that thread's DBQ and registers it so a
    /// later `swap`/`execute` observes it in first-use order.
    pub fn enqueue_command<T>(&self, command: T) -> Result<()>
    where
        T: Command + 'static,
    {
        self.token.check_not()?;
        let buffer = self
            .producer_buffers
            .get_or_insert_with(|| Mutex::new(DoubleBufferQueue::new()));
        let mut dbq = buffer.lock();
        let size = std::mem::size_of::<CommandRecord<T>>();
        let align = std::mem::align_of::<CommandRecord<T>>();
        let ptr = dbq.enqueue(size, align)?;
        // SAFETY: `enqueue` just reserved `size` bytes aligned to `align`
        // for exclusive use by this write; nothing else observes this
        // memory until a later `dequeue` hands the same pointer back out.
        unsafe {
            std::ptr::write(
                ptr as *mut CommandRecord<T>,
                CommandRecord {
                    vtable: CommandRecord::<T>::vtable(),
                    payload: command,
                },
            );
        }
        Ok(())
    }

    /// Exchanges each producer's enqueue/dequeue halves. Called by
    /// `RenderPolicy::swap` while the render thread is parked, so no
    /// producer can be mid-`enqueue_command` concurrently.
    pub fn swap(&self) {
        self.producer_buffers.for_each(|_thread, buffer| {
            buffer.lock().swap();
        });
    }

    /// Drains every producer's swapped-in commands, in producer-
    /// registration order, invoking each against the render thread's
    /// current context (looked up per command through
    /// `render_thread::with_current_context`, never held across more than
    /// one command's execution). Only the render thread may call this.
    pub fn execute(&self) -> Result<()> {
        self.token.check()?;
        self.producer_buffers.for_each(|_thread, buffer| {
            let mut dbq = buffer.lock();
            while let Some(ptr) = dbq.dequeue() {
                // SAFETY: `ptr` was written by `enqueue_command` as a
                // `CommandRecord<T>` whose first field is the vtable;
                // `RecordHeader` shares that layout, so reading it back
                // out through the erased pointer is valid. The record is
                // run once via its vtable's `execute`, then destroyed via
                // `drop_in_place` — exactly once each, never touched
                // again afterward.
                let vtable = unsafe { (*(ptr as *const RecordHeader)).vtable };
                crate::render_thread::with_current_context(|context| unsafe {
                    (vtable.execute)(ptr, context);
                });
                unsafe {
                    (vtable.drop_in_place)(ptr);
                }
            }
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        let mut empty = true;
        self.producer_buffers.for_each(|_thread, buffer| {
            if !buffer.lock().is_empty() {
                empty = false;
            }
        });
        empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockContext;

    #[test]
    fn enqueue_is_rejected_on_render_thread() {
        let token = std::sync::Arc::new(RenderThreadToken::new());
        token.set_for_test(std::thread::current().id());
        let queue = CommandQueue::new("q:test", std::sync::Arc::clone(&token));
        assert!(queue.enqueue_command(|_ctx: &mut dyn Context| {}).is_err());
    }

    #[test]
    fn execute_requires_render_thread() {
        let token = std::sync::Arc::new(RenderThreadToken::new());
        let queue = CommandQueue::new("q:test", std::sync::Arc::clone(&token));
        assert!(queue.execute().is_err());
    }

    #[test]
    fn swap_then_execute_runs_enqueued_commands_in_order() {
        let token = std::sync::Arc::new(RenderThreadToken::new());
        let queue = CommandQueue::new("q:test", std::sync::Arc::clone(&token));
        let trace = std::sync::Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let trace = std::sync::Arc::clone(&trace);
            queue
                .enqueue_command(move |_ctx: &mut dyn Context| {
                    trace.lock().push(i);
                })
                .unwrap();
        }

        // Nothing runs until swap moves enqueue -> dequeue.
        queue.swap();

        token.set_for_test(std::thread::current().id());
        let mut ctx = MockContext::new();
        crate::render_thread::with_context_for_test(&mut ctx, || queue.execute().unwrap());
        token.clear_for_test();

        assert_eq!(*trace.lock(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflowing_a_producers_dbq_surfaces_as_alloc_overflow() {
        let token = std::sync::Arc::new(RenderThreadToken::new());
        let queue = CommandQueue::new("q:test", std::sync::Arc::clone(&token));

        // Each command captures a fixed-size payload; enough of them must
        // eventually overflow the 32 KiB per-producer DBQ cap, proving
        // `enqueue_command` actually places records into a real
        // `DoubleBufferQueue` rather than an unbounded `Vec`.
        let mut overflowed = false;
        for _ in 0..4096 {
            let payload = [0u8; 256];
            let result = queue.enqueue_command(move |_ctx: &mut dyn Context| {
                let _ = payload;
            });
            if result.is_err() {
                overflowed = true;
                break;
            }
        }
        assert!(overflowed);
    }
}

//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The render thread: the single thread permitted to drive the GPU
//! `Context`. Owns a cooperative run/swap/exit handshake with its
//! producers, condition-variable based, all guarded by one mutex — the
//! same shape as the reference engine's `render_thread`.
use crate::config::GraphicsParams;
use crate::context::Context;
use crate::error::{GraphicsError, Result};
use crate::render_policy::RenderPolicy;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

thread_local! {
    /// Raw pointer to the `Context` the render thread is currently driving,
    /// set only for the duration of `RenderThread::spawn`'s loop body on
    /// this same thread. Lets an `AsyncResource`'s `Drop` impl destroy its
    /// GPU handle immediately when it happens to be dropped by the render
    /// thread itself (e.g. the last reference was held by a just-executed
    /// command), instead of deadlocking on `enqueue_command`'s
    /// `check_not()`.
    ///
    /// Nothing outside this module ever turns this pointer into a `&mut
    /// dyn Context` directly — every access goes through
    /// `borrow_current_context`, which hands out one transient, scoped
    /// reference at a time and panics rather than alias a second one on
    /// top of it. `RenderPolicy`/`CommandQueue` thread no `&mut dyn
    /// Context` through their own call chains at all; they look the
    /// context up here, per command, right before running it.
    static CURRENT_CONTEXT: Cell<Option<*mut dyn Context>> = Cell::new(None);
    static CONTEXT_BORROWED: Cell<bool> = Cell::new(false);
}

fn borrow_current_context<R>(f: impl FnOnce(&mut dyn Context) -> R) -> Option<R> {
    let ptr = CURRENT_CONTEXT.with(Cell::get)?;
    let already_borrowed = CONTEXT_BORROWED.with(|b| b.replace(true));
    assert!(
        !already_borrowed,
        "render thread context borrowed reentrantly"
    );
    // SAFETY: `ptr` was set by `RenderThread::spawn`'s loop for the
    // duration of this thread's current pass, and `CONTEXT_BORROWED` just
    // asserted no other live reference derived from it exists right now.
    // `f` runs with the only such reference, which is dropped (along with
    // the flag reset below) before this function returns.
    let context: &mut dyn Context = unsafe { &mut *ptr };
    let result = f(context);
    CONTEXT_BORROWED.with(|b| b.set(false));
    Some(result)
}

/// Attempts to run `f` against the render thread's context directly,
/// without going through a command queue. Returns `false` (and does not
/// call `f`) when the calling thread is not currently executing a render
/// policy pass.
pub(crate) fn try_destroy_now(f: impl FnOnce(&mut dyn Context)) -> bool {
    borrow_current_context(f).is_some()
}

/// Runs `f` against the render thread's current context. Used by
/// `RenderPolicy`/`CommandQueue` to get a context reference scoped to
/// exactly one command's execution, rather than holding one live for an
/// entire drain pass. Panics if called from a thread with no context
/// bound (i.e. outside `RenderThread::spawn`'s loop).
pub(crate) fn with_current_context<R>(f: impl FnOnce(&mut dyn Context) -> R) -> R {
    borrow_current_context(f).expect("no context bound to this thread")
}

/// Test-only seam: binds `context` to this thread for the duration of
/// `f`, the same way `RenderThread::spawn`'s loop does for the real
/// render thread, so unit tests can exercise `with_current_context`-based
/// code paths without spawning a thread.
#[cfg(any(test, feature = "mock"))]
pub fn with_context_for_test<R>(context: &mut dyn Context, f: impl FnOnce() -> R) -> R {
    CURRENT_CONTEXT.with(|cell| cell.set(Some(context as *mut dyn Context)));
    let result = f();
    CURRENT_CONTEXT.with(|cell| cell.set(None));
    result
}

/// A thread-identity capability shared by `CommandQueue`, `RenderPolicy`,
/// and `Graphics`, mirroring the reference engine's ubiquitous
/// `get_render_thread()->check()`/`check_not()` calls. Every entry point
/// that is only valid from one side of the producer/render-thread boundary
/// checks against this before touching shared state.
#[derive(Default)]
pub struct RenderThreadToken {
    id: Mutex<Option<ThreadId>>,
}

impl RenderThreadToken {
    pub fn new() -> Self {
        RenderThreadToken {
            id: Mutex::new(None),
        }
    }

    fn set(&self, id: ThreadId) {
        *self.id.lock() = Some(id);
    }

    fn clear(&self) {
        *self.id.lock() = None;
    }

    pub fn is_render_thread(&self) -> bool {
        *self.id.lock() == Some(std::thread::current().id())
    }

    /// Fails unless called from the render thread.
    pub fn check(&self) -> Result<()> {
        if self.is_render_thread() {
            Ok(())
        } else {
            Err(GraphicsError::WrongThread)
        }
    }

    /// Fails if called *from* the render thread (most producer-facing
    /// entry points must not be called by the thread they are meant to
    /// unblock).
    pub fn check_not(&self) -> Result<()> {
        if self.is_render_thread() {
            Err(GraphicsError::WrongThread)
        } else {
            Ok(())
        }
    }

    /// Test-only seam: pins the token to `id` without spawning a thread,
    /// so unit tests can exercise render-thread-only code paths inline.
    #[cfg(any(test, feature = "mock"))]
    pub fn set_for_test(&self, id: ThreadId) {
        self.set(id);
    }

    #[cfg(any(test, feature = "mock"))]
    pub fn clear_for_test(&self) {
        self.clear();
    }
}

#[derive(Default)]
struct ToThreadState {
    exit_thread: bool,
    run_commands: bool,
}

#[derive(Default)]
struct FromThreadState {
    ready_to_run: bool,
    ready_to_swap: bool,
}

struct Shared {
    mutex: Mutex<(ToThreadState, FromThreadState)>,
    to_condvar: Condvar,
    from_condvar: Condvar,
    exception: Mutex<Option<GraphicsError>>,
}

/// Owns the GPU context and runs the cooperative
/// `NotSpawned -> Running(idle) -> Running(draining) -> ... -> Exited`
/// loop on a dedicated OS thread.
pub struct RenderThread {
    token: Arc<RenderThreadToken>,
    shared: Arc<Shared>,
    join_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    spawned: AtomicBool,
}

impl RenderThread {
    pub fn new(token: Arc<RenderThreadToken>) -> Self {
        RenderThread {
            token,
            shared: Arc::new(Shared {
                mutex: Mutex::new((ToThreadState::default(), FromThreadState::default())),
                to_condvar: Condvar::new(),
                from_condvar: Condvar::new(),
                exception: Mutex::new(None),
            }),
            join_handle: Mutex::new(None),
            spawned: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> &Arc<RenderThreadToken> {
        &self.token
    }

    /// Spawns the thread, builds `context` on it, and drives `policy`'s
    /// queues until told to exit. `make_context` runs on the render
    /// thread itself, so a backend that must initialize thread-affine
    /// state (e.g. binding a GL context) does so in the right place.
    pub fn spawn<C, M>(&self, params: GraphicsParams, policy: Arc<RenderPolicy>, make_context: M)
    where
        C: Context + 'static,
        M: FnOnce() -> std::result::Result<C, crate::error::GpuError> + Send + 'static,
    {
        if self.spawned.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = Arc::clone(&self.token);
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::Builder::new()
            .name(params.render_thread_name.clone())
            .spawn(move || {
                token.set(std::thread::current().id());

                let context = match make_context() {
                    Ok(c) => c,
                    Err(e) => {
                        *shared.exception.lock() = Some(GraphicsError::Gpu(e));
                        let mut state = shared.mutex.lock();
                        state.1.ready_to_run = false;
                        state.1.ready_to_swap = false;
                        shared.from_condvar.notify_all();
                        token.clear();
                        return;
                    }
                };
                let mut context = context;

                {
                    let mut state = shared.mutex.lock();
                    state.1.ready_to_run = true;
                    state.1.ready_to_swap = true;
                    shared.from_condvar.notify_all();
                }

                let mut exit_thread;
                let mut run_commands = false;
                loop {
                    {
                        let mut state = shared.mutex.lock();
                        if run_commands {
                            state.1.ready_to_swap = true;
                            shared.from_condvar.notify_all();
                        }

                        exit_thread = state.0.exit_thread;
                        run_commands = state.0.run_commands;
                        while !exit_thread && !run_commands {
                            shared.to_condvar.wait(&mut state);
                            exit_thread = state.0.exit_thread;
                            run_commands = state.0.run_commands;
                        }

                        if run_commands {
                            state.0.run_commands = false;
                        }
                        if exit_thread {
                            state.0.exit_thread = false;
                        }
                    }

                    if run_commands {
                        CURRENT_CONTEXT.with(|cell| {
                            cell.set(Some(&mut context as *mut dyn Context))
                        });
                        let result = policy.execute();
                        CURRENT_CONTEXT.with(|cell| cell.set(None));
                        if let Err(e) = result {
                            *shared.exception.lock() = Some(e);
                        }
                    }

                    if exit_thread {
                        break;
                    }
                }

                // Drain the system queue once more so deferred destroy
                // commands run before the context goes away.
                CURRENT_CONTEXT.with(|cell| cell.set(Some(&mut context as *mut dyn Context)));
                let result = policy.execute_system_only();
                CURRENT_CONTEXT.with(|cell| cell.set(None));
                if let Err(e) = result {
                    *shared.exception.lock() = Some(e);
                }

                {
                    let mut state = shared.mutex.lock();
                    state.1.ready_to_run = false;
                    state.1.ready_to_swap = false;
                    shared.from_condvar.notify_all();
                }
                token.clear();
            })
            .expect("failed to spawn render thread");

        *self.join_handle.lock() = Some(handle);
    }

    fn take_exception(&self) -> Result<()> {
        if let Some(e) = self.shared.exception.lock().take() {
            return Err(e);
        }
        Ok(())
    }

    /// Blocks the calling (producer) thread until the render thread's
    /// initial context creation has completed.
    pub fn wait_for_ready(&self) -> Result<()> {
        let mut state = self.shared.mutex.lock();
        while !state.1.ready_to_run {
            self.take_exception()?;
            self.shared.from_condvar.wait(&mut state);
        }
        self.take_exception()
    }

    /// Blocks the calling thread until the render thread finishes its
    /// current batch.
    pub fn wait_for_ready_to_swap(&self) -> Result<()> {
        let mut state = self.shared.mutex.lock();
        while !state.1.ready_to_swap {
            self.take_exception()?;
            self.shared.from_condvar.wait(&mut state);
        }
        self.take_exception()
    }

    pub fn wait_for_exit(&self) -> Result<()> {
        let mut state = self.shared.mutex.lock();
        while state.1.ready_to_run {
            self.take_exception()?;
            self.shared.from_condvar.wait(&mut state);
        }
        self.take_exception()
    }

    /// Signals "there is work to drain" and clears `ready_to_swap` until it
    /// is drained again.
    pub fn signal_work(&self) -> Result<()> {
        self.take_exception()?;
        let mut state = self.shared.mutex.lock();
        state.0.run_commands = true;
        state.1.ready_to_swap = false;
        self.shared.to_condvar.notify_all();
        Ok(())
    }

    pub fn signal_exit(&self) -> Result<()> {
        self.take_exception()?;
        let mut state = self.shared.mutex.lock();
        state.0.exit_thread = true;
        self.shared.to_condvar.notify_all();
        Ok(())
    }

    pub fn join(&self) {
        if let Some(handle) = self.join_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The public façade: spins up the render thread and sync thread, owns
//! the queue graph, and is the single entry point producer code uses to
//! submit commands and create resources.
use crate::command_queue::CommandQueue;
use crate::config::GraphicsParams;
use crate::context::{Context, SyncContext};
use crate::error::{GraphicsError, Result};
use crate::render_policy::RenderPolicy;
use crate::render_thread::{RenderThread, RenderThreadToken};
use crate::sync::{Sync as GpuSync, SyncThread};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

lazy_static::lazy_static! {
    /// Backs `initialize`'s idempotency: a second call while a `Graphics`
    /// is already live returns the existing instance instead of spawning
    /// a second pair of threads.
    static ref SINGLETON: Mutex<Weak<Graphics>> = Mutex::new(Weak::new());
}

/// Owns the render thread, the sync thread, and the queue graph they
/// share. Every producer-facing entry point is `&self`, so a single
/// `Arc<Graphics>` is meant to be cloned freely across the threads that
/// submit work to it.
pub struct Graphics {
    token: Arc<RenderThreadToken>,
    policy: Arc<RenderPolicy>,
    render_thread: RenderThread,
    sync_thread: SyncThread,
    params: GraphicsParams,
}

impl Graphics {
    /// Spawns the render thread (building `C` on it via `make_context`)
    /// and the sync thread (building `S` via `make_sync_context`), and
    /// blocks until both report ready. If a `Graphics` instance is
    /// already live, returns it unchanged instead ("idempotent under a
    /// mutex").
    pub fn initialize<C, S, MC, MS>(
        params: GraphicsParams,
        make_context: MC,
        make_sync_context: MS,
    ) -> Result<Arc<Graphics>>
    where
        C: Context + 'static,
        S: SyncContext + 'static,
        MC: FnOnce() -> std::result::Result<C, crate::error::GpuError> + Send + 'static,
        MS: FnOnce() -> std::result::Result<S, crate::error::GpuError> + Send + 'static,
    {
        let mut singleton = SINGLETON.lock();
        if let Some(existing) = singleton.upgrade() {
            return Ok(existing);
        }
        let graphics = Self::spawn_new(params, make_context, make_sync_context)?;
        *singleton = Arc::downgrade(&graphics);
        Ok(graphics)
    }

    fn spawn_new<C, S, MC, MS>(
        params: GraphicsParams,
        make_context: MC,
        make_sync_context: MS,
    ) -> Result<Arc<Graphics>>
    where
        C: Context + 'static,
        S: SyncContext + 'static,
        MC: FnOnce() -> std::result::Result<C, crate::error::GpuError> + Send + 'static,
        MS: FnOnce() -> std::result::Result<S, crate::error::GpuError> + Send + 'static,
    {
        let token = Arc::new(RenderThreadToken::new());
        let policy = Arc::new(RenderPolicy::new(Arc::clone(&token)));
        let render_thread = RenderThread::new(Arc::clone(&token));
        let sync_thread = SyncThread::new();

        let timeout = params.effective_fence_timeout();
        sync_thread.spawn(params.sync_thread_name.clone(), timeout, make_sync_context);
        render_thread.spawn(params.clone(), Arc::clone(&policy), make_context);
        render_thread.wait_for_ready()?;

        Ok(Arc::new(Graphics {
            token,
            policy,
            render_thread,
            sync_thread,
            params,
        }))
    }

    /// Destroys all remaining user resources by flushing one last time,
    /// then signals both service threads to exit and joins them. Safe to
    /// call more than once; subsequent calls are no-ops.
    pub fn shutdown(&self) -> Result<()> {
        self.token.check_not()?;
        self.render_thread.wait_for_ready_to_swap()?;
        self.render_thread.signal_exit()?;
        self.render_thread.wait_for_exit()?;
        self.render_thread.join();
        self.sync_thread.signal_exit();
        self.sync_thread.join();
        Ok(())
    }

    /// Blocks until the render thread is idle, swaps the queue graph, and
    /// wakes the render thread to drain it. Must not be called from the
    /// render thread.
    pub fn flush_commands(&self) -> Result<()> {
        self.token.check_not()?;
        self.render_thread.wait_for_ready_to_swap()?;
        self.policy.swap();
        self.render_thread.signal_work()?;
        Ok(())
    }

    /// `flush_commands` plus a second wait, so the just-submitted batch is
    /// guaranteed to have been drained by the time this returns.
    pub fn finish_commands(&self) -> Result<()> {
        self.flush_commands()?;
        self.render_thread.wait_for_ready_to_swap()?;
        Ok(())
    }

    /// Forwards a `set` `Sync` to the sync thread, which will wait its
    /// fence and signal it. Fails with `SyncError::FenceTimeout` if an
    /// earlier fence wait on this sync thread timed out and has not yet
    /// been observed by a producer.
    pub fn finish_setting_sync(&self, sync: Arc<GpuSync>) -> Result<()> {
        self.sync_thread.enqueue(sync)
    }

    pub fn system_command_queue(&self) -> (Arc<CommandQueue>, Arc<GpuSync>) {
        self.policy.system_command_queue()
    }

    pub fn render_thread_token(&self) -> &Arc<RenderThreadToken> {
        &self.token
    }

    pub fn policy(&self) -> &Arc<RenderPolicy> {
        &self.policy
    }

    pub fn params(&self) -> &GraphicsParams {
        &self.params
    }

    /// Registers a new named command queue at the end of the current
    /// sequence.
    pub fn create_command_queue(&self, name: &str) -> Result<Arc<CommandQueue>> {
        let queue = Arc::new(CommandQueue::new(name, Arc::clone(&self.token)));
        self.policy.insert(Arc::clone(&queue))?;
        Ok(queue)
    }
}

#[cfg(any(test, feature = "mock"))]
impl Graphics {
    /// Test/mock-only constructor: spins up an independent `Graphics`
    /// instance against the in-crate `mock::MockContext`/
    /// `MockSyncContext` backend instead of a real GPU. Deliberately
    /// bypasses the process-wide singleton `initialize` uses, so each
    /// test gets its own isolated render/sync thread pair rather than
    /// racing other tests for the same instance.
    pub fn initialize_mock(params: GraphicsParams) -> Result<Arc<Graphics>> {
        Self::spawn_new(
            params,
            || Ok(crate::mock::MockContext::new()),
            || Ok(crate::mock::MockSyncContext::new()),
        )
    }

    /// As `initialize_mock`, but also returns the shared call-order log
    /// the render thread's `MockContext` appends to, for tests asserting
    /// ordering between operations (e.g. "the delete happened after the
    /// last bind").
    pub fn initialize_mock_with_trace(
        params: GraphicsParams,
    ) -> Result<(Arc<Graphics>, Arc<Mutex<Vec<String>>>)> {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let trace_for_context = Arc::clone(&trace);
        let graphics = Self::spawn_new(
            params,
            move || Ok(crate::mock::MockContext::with_trace(trace_for_context)),
            || Ok(crate::mock::MockSyncContext::new()),
        )?;
        Ok((graphics, trace))
    }
}

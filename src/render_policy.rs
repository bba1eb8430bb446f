//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The ordered command-queue graph the render thread drains once per
//! frame: `system` always first, `system-sync` always second (a sentinel
//! queue carrying only a "set sync" command), followed by every
//! user-inserted queue in insertion order.
use crate::command_queue::CommandQueue;
use crate::context::Context;
use crate::error::{GraphicsError, PolicyError, Result};
use crate::render_thread::RenderThreadToken;
use crate::sync::Sync;
use parking_lot::Mutex;
use std::sync::Arc;

struct Sequence {
    /// `queues[0]` is always `system`, `queues[1]` is always `system_sync`.
    queues: Vec<Arc<CommandQueue>>,
}

/// Owns the frame-ordered queue graph plus the lazily-allocated
/// `system_sync` object for the frame currently being staged.
pub struct RenderPolicy {
    token: Arc<RenderThreadToken>,
    system_queue: Arc<CommandQueue>,
    system_sync_queue: Arc<CommandQueue>,
    /// The sequence producers are currently staging into.
    current: Mutex<Sequence>,
    /// Snapshot of `current` taken at the last `swap`; this is what
    /// `execute` drains.
    executing: Mutex<Sequence>,
    /// `system_sync`, allocated on first use of the system queue each
    /// frame, cleared back to `None` once swapped into `executing`.
    pending_system_sync: Mutex<Option<Arc<Sync>>>,
}

impl RenderPolicy {
    pub fn new(token: Arc<RenderThreadToken>) -> Self {
        let system_queue = Arc::new(CommandQueue::new("system", Arc::clone(&token)));
        let system_sync_queue = Arc::new(CommandQueue::new("system_sync", Arc::clone(&token)));
        let initial = || Sequence {
            queues: vec![Arc::clone(&system_queue), Arc::clone(&system_sync_queue)],
        };
        RenderPolicy {
            token,
            system_queue,
            system_sync_queue,
            current: Mutex::new(initial()),
            executing: Mutex::new(initial()),
            pending_system_sync: Mutex::new(None),
        }
    }

    /// Inserts `queue` at the end of the current sequence. Producer
    /// thread; fails with `PolicyError::DuplicateQueue` if already
    /// present (compared by name hash).
    pub fn insert(&self, queue: Arc<CommandQueue>) -> Result<()> {
        self.token.check_not()?;
        let mut current = self.current.lock();
        if current
            .queues
            .iter()
            .any(|q| q.name_hash() == queue.name_hash())
        {
            return Err(GraphicsError::Policy(PolicyError::DuplicateQueue));
        }
        current.queues.push(queue);
        Ok(())
    }

    /// Inserts `queue` immediately after `anchor` in the current sequence.
    pub fn insert_after(&self, queue: Arc<CommandQueue>, anchor: &CommandQueue) -> Result<()> {
        self.token.check_not()?;
        let mut current = self.current.lock();
        if current
            .queues
            .iter()
            .any(|q| q.name_hash() == queue.name_hash())
        {
            return Err(GraphicsError::Policy(PolicyError::DuplicateQueue));
        }
        let pos = current
            .queues
            .iter()
            .position(|q| q.name_hash() == anchor.name_hash())
            .ok_or(GraphicsError::Policy(PolicyError::NotFound))?;
        current.queues.insert(pos + 1, queue);
        Ok(())
    }

    /// Removes `queue` from the current sequence. Rejects the two
    /// protected queues.
    pub fn remove(&self, queue: &CommandQueue) -> Result<()> {
        self.token.check_not()?;
        if queue.name_hash() == self.system_queue.name_hash()
            || queue.name_hash() == self.system_sync_queue.name_hash()
        {
            return Err(GraphicsError::Policy(PolicyError::SystemQueueProtected));
        }
        let mut current = self.current.lock();
        let before = current.queues.len();
        current.queues.retain(|q| q.name_hash() != queue.name_hash());
        if current.queues.len() == before {
            return Err(GraphicsError::Policy(PolicyError::NotFound));
        }
        Ok(())
    }

    pub fn find(&self, name_hash: u64) -> Result<Arc<CommandQueue>> {
        self.token.check_not()?;
        self.current
            .lock()
            .queues
            .iter()
            .find(|q| q.name_hash() == name_hash)
            .cloned()
            .ok_or(GraphicsError::Policy(PolicyError::NotFound))
    }

    /// Returns the system queue and the `Sync` that will be signaled once
    /// the system queue finishes this frame, lazily allocating that sync
    /// on first call since the last swap.
    pub fn system_command_queue(&self) -> (Arc<CommandQueue>, Arc<Sync>) {
        let mut pending = self.pending_system_sync.lock();
        let sync = pending.get_or_insert_with(Sync::new);
        (Arc::clone(&self.system_queue), Arc::clone(sync))
    }

    /// Render thread: drains the executing-frame sequence in order. Each
    /// queue looks the current context up itself (via
    /// `render_thread::with_current_context`) rather than being handed a
    /// `&mut dyn Context` that would have to stay live across the whole
    /// pass.
    pub fn execute(&self) -> Result<()> {
        self.token.check()?;
        for queue in &self.executing.lock().queues {
            queue.execute()?;
        }
        Ok(())
    }

    /// Render thread: drains only the system queue (used during shutdown).
    pub fn execute_system_only(&self) -> Result<()> {
        self.token.check()?;
        self.system_queue.execute()
    }

    /// Called by the orchestrator (`Graphics::flush_commands`) while the
    /// render thread is parked: if a `system_sync` was allocated this
    /// frame, appends its "set sync" sentinel to the `system_sync` queue;
    /// snapshots the current sequence as the new executing sequence; swaps
    /// every queue's producer buffers.
    pub fn swap(&self) {
        if let Some(sync) = self.pending_system_sync.lock().take() {
            // Ignore failure: the only way `enqueue_command` fails here is
            // `WrongThread`, and `swap` itself is only ever called from a
            // producer thread (the orchestrator), same precondition as
            // every other producer-side policy call.
            let _ = self.system_sync_queue.enqueue_command(move |context: &mut dyn Context| {
                if let Err(e) = sync.set(context) {
                    log::error!("failed to set system_sync: {}", e);
                }
            });
        }

        {
            let current = self.current.lock();
            let mut executing = self.executing.lock();
            executing.queues = current.queues.clone();
        }

        for queue in &self.executing.lock().queues {
            queue.swap();
        }
    }
}

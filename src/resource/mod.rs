//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The asynchronous-resource framework shared by every GPU object type:
//! buffer, texture, framebuffer, primitive stream, shader program.
//!
//! Every concrete resource wraps an `Arc<AsyncResourceState<D>>`. Creation
//! enqueues a one-shot closure on the system queue; `finished` flips to
//! `true` once that closure has run on the render thread. `Drop` mirrors
//! the reference engine's resource destructors: if the calling thread
//! happens to be the render thread mid-frame, the GPU handle is destroyed
//! immediately; otherwise a destroy command is queued so the render
//! thread does it later.
pub mod buffer;
pub mod framebuffer;
pub mod primitive_stream;
pub mod shader_program;
pub mod texture;

use crate::context::{Context, Handle};
use crate::error::{GraphicsError, Result};
use crate::graphics::Graphics;
use crate::name_table::NamedObject;
use log::{error, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Shared state behind every async resource: the immutable descriptor,
/// the `finished` flag, the backend handle once known, and enough to
/// queue its own destruction when dropped.
pub struct AsyncResourceState<D> {
    pub descriptor: D,
    finished: AtomicBool,
    handle: Mutex<Option<Handle>>,
    graphics: Weak<Graphics>,
    destroy_fn: fn(&mut dyn Context, Handle),
    named: NamedObject,
}

impl<D> AsyncResourceState<D> {
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> Option<Handle> {
        *self.handle.lock()
    }

    pub fn name(&self) -> Option<String> {
        self.named.name()
    }
}

impl<D> Drop for AsyncResourceState<D> {
    fn drop(&mut self) {
        let handle = match self.handle.lock().take() {
            Some(h) => h,
            None => {
                if !self.is_finished() {
                    warn!("async resource dropped before its creation finished");
                }
                return;
            }
        };
        let destroy_fn = self.destroy_fn;

        if crate::render_thread::try_destroy_now(|context| destroy_fn(context, handle)) {
            return;
        }

        if let Some(graphics) = self.graphics.upgrade() {
            let (queue, _sync) = graphics.system_command_queue();
            if let Err(e) = queue.enqueue_command(move |context: &mut dyn Context| {
                destroy_fn(context, handle);
            }) {
                error!("failed to queue resource destruction: {}", e);
            }
        } else {
            warn!("graphics already shut down; leaking resource handle {:?}", handle);
        }
    }
}

/// Enqueues `create_fn` on `graphics`'s system queue and returns a handle
/// to the not-yet-finished resource immediately ("fire and forget"
/// creation). `create_fn` runs exactly once, on the render thread.
pub(crate) fn create_async<D, F>(
    graphics: &Arc<Graphics>,
    descriptor: D,
    name: Option<&str>,
    destroy_fn: fn(&mut dyn Context, Handle),
    create_fn: F,
) -> Result<Arc<AsyncResourceState<D>>>
where
    D: Send + Sync + 'static,
    F: FnOnce(&mut dyn Context, &D) -> std::result::Result<Handle, crate::error::GpuError>
        + Send
        + 'static,
{
    let state = Arc::new(AsyncResourceState {
        descriptor,
        finished: AtomicBool::new(false),
        handle: Mutex::new(None),
        graphics: Arc::downgrade(graphics),
        destroy_fn,
        named: name.map(NamedObject::named).unwrap_or_else(NamedObject::unnamed),
    });

    let state_for_command = Arc::clone(&state);
    let mut create_fn = Some(create_fn);
    let (queue, _sync) = graphics.system_command_queue();
    queue.enqueue_command(move |context: &mut dyn Context| {
        let create_fn = create_fn
            .take()
            .expect("async resource create command invoked more than once");
        match create_fn(context, &state_for_command.descriptor) {
            Ok(handle) => {
                *state_for_command.handle.lock() = Some(handle);
                state_for_command.finished.store(true, Ordering::Release);
            }
            Err(e) => {
                error!("async resource creation failed: {}", e);
            }
        }
    })?;

    Ok(state)
}

/// As `create_async`, but blocks the caller until the render thread has
/// actually drained the create command before returning, failing if
/// creation did not succeed.
pub(crate) fn create_async_finished<D, F>(
    graphics: &Arc<Graphics>,
    descriptor: D,
    name: Option<&str>,
    destroy_fn: fn(&mut dyn Context, Handle),
    create_fn: F,
) -> Result<Arc<AsyncResourceState<D>>>
where
    D: Send + Sync + 'static,
    F: FnOnce(&mut dyn Context, &D) -> std::result::Result<Handle, crate::error::GpuError>
        + Send
        + 'static,
{
    let state = create_async(graphics, descriptor, name, destroy_fn, create_fn)?;
    graphics.finish_commands()?;
    if !state.is_finished() {
        return Err(GraphicsError::Resource(
            crate::error::ResourceError::CreationFailed,
        ));
    }
    Ok(state)
}

//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! GPU buffer resources: a region of GPU-visible memory, optionally
//! CPU-mappable, with an explicit caching mode governing when a `map`/
//! `unmap` pair must flush.
use crate::context::{Context, Handle};
use crate::error::{GraphicsError, Result, ResourceError};
use crate::graphics::Graphics;
use crate::resource::{create_async, create_async_finished, AsyncResourceState};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Mapping {
    /// No CPU access after initial upload; the backend may place this in
    /// GPU-only memory.
    Static,
    Read,
    Write,
    ReadWrite,
}

impl Mapping {
    fn allows_read(self) -> bool {
        matches!(self, Mapping::Read | Mapping::ReadWrite)
    }
    fn allows_write(self) -> bool {
        matches!(self, Mapping::Write | Mapping::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Caching {
    Static,
    Coherent,
    NonCoherent,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub size: usize,
    pub mapping: Mapping,
    pub caching: Caching,
}

/// A mapped range returned by `Buffer::map`; dropping it does not unmap —
/// callers explicitly call `Buffer::unmap` once writes/reads are done,
/// mirroring the reference engine's explicit map/unmap pairing (and
/// letting `unmap` know the exact range to flush).
pub struct MappedRange {
    pub ptr: *mut u8,
    pub len: usize,
}

pub struct Buffer {
    state: Arc<AsyncResourceState<BufferDescriptor>>,
    cpu_ptr: Mutex<Option<usize>>,
}

fn destroy_fn(context: &mut dyn Context, handle: Handle) {
    context.destroy_buffer(handle);
}

impl Buffer {
    fn build(
        graphics: &Arc<Graphics>,
        desc: BufferDescriptor,
        initial_data: Option<Vec<u8>>,
        name: Option<&str>,
        blocking: bool,
    ) -> Result<Arc<Buffer>> {
        let cpu_ptr = Arc::new(Mutex::new(None));
        let cpu_ptr_for_command = Arc::clone(&cpu_ptr);
        let mapping = desc.mapping;

        let create = move |context: &mut dyn Context, desc: &BufferDescriptor| {
            let handle = context.create_buffer(desc, initial_data.as_deref())?;
            if mapping != Mapping::Static {
                if let Some(ptr) = context.buffer_cpu_ptr(handle) {
                    *cpu_ptr_for_command.lock() = Some(ptr as usize);
                }
            }
            Ok(handle)
        };

        let state = if blocking {
            create_async_finished(graphics, desc, name, destroy_fn, create)?
        } else {
            create_async(graphics, desc, name, destroy_fn, create)?
        };

        Ok(Arc::new(Buffer { state, cpu_ptr }))
    }

    pub fn create(
        graphics: &Arc<Graphics>,
        desc: BufferDescriptor,
        initial_data: Option<Vec<u8>>,
    ) -> Result<Arc<Buffer>> {
        Self::build(graphics, desc, initial_data, None, false)
    }

    pub fn create_finished(
        graphics: &Arc<Graphics>,
        desc: BufferDescriptor,
        initial_data: Option<Vec<u8>>,
    ) -> Result<Arc<Buffer>> {
        Self::build(graphics, desc, initial_data, None, true)
    }

    pub fn create_named(
        graphics: &Arc<Graphics>,
        desc: BufferDescriptor,
        initial_data: Option<Vec<u8>>,
        name: &str,
    ) -> Result<Arc<Buffer>> {
        Self::build(graphics, desc, initial_data, Some(name), false)
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn handle(&self) -> Option<Handle> {
        self.state.handle()
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.state.descriptor
    }

    /// Maps `[offset, offset+len)` for CPU access. For a `NonCoherent`
    /// buffer that allows reads, first flushes pending GPU writes (memory
    /// barrier + finish) so the CPU observes them.
    pub fn map(
        &self,
        graphics: &Arc<Graphics>,
        offset: usize,
        len: usize,
    ) -> Result<MappedRange> {
        graphics.render_thread_token().check_not()?;
        let base = self
            .cpu_ptr
            .lock()
            .ok_or(GraphicsError::Resource(ResourceError::BufferNotMappable))?;
        let desc = &self.state.descriptor;
        if desc.caching == Caching::NonCoherent && desc.mapping.allows_read() {
            let handle = self.handle();
            if let Some(handle) = handle {
                let (queue, _sync) = graphics.system_command_queue();
                queue.enqueue_command(move |context: &mut dyn Context| {
                    context.flush_gpu_writes(handle, offset, len);
                })?;
                graphics.finish_commands()?;
            }
        }
        Ok(MappedRange {
            ptr: (base as *mut u8).wrapping_add(offset),
            len,
        })
    }

    /// Unmaps a previously mapped range. For a `NonCoherent` buffer that
    /// allows writes, flushes the CPU writes for that range so the GPU
    /// observes them.
    pub fn unmap(&self, graphics: &Arc<Graphics>, offset: usize, len: usize) -> Result<()> {
        let desc = &self.state.descriptor;
        if desc.caching == Caching::NonCoherent && desc.mapping.allows_write() {
            if let Some(handle) = self.handle() {
                let (queue, _sync) = graphics.system_command_queue();
                queue.enqueue_command(move |context: &mut dyn Context| {
                    context.flush_cpu_writes(handle, offset, len);
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphicsParams;
    use crate::graphics::Graphics;

    fn test_graphics() -> Arc<Graphics> {
        Graphics::initialize_mock(GraphicsParams::default()).unwrap()
    }

    #[test]
    fn create_finished_buffer_is_immediately_usable() {
        let graphics = test_graphics();
        let buffer = Buffer::create_finished(
            &graphics,
            BufferDescriptor {
                size: 256,
                mapping: Mapping::ReadWrite,
                caching: Caching::Coherent,
            },
            None,
        )
        .unwrap();
        assert!(buffer.is_finished());
        assert!(buffer.handle().is_some());
        graphics.shutdown().unwrap();
    }

    #[test]
    fn create_is_fire_and_forget() {
        let graphics = test_graphics();
        let buffer = Buffer::create(
            &graphics,
            BufferDescriptor {
                size: 64,
                mapping: Mapping::Static,
                caching: Caching::Static,
            },
            None,
        )
        .unwrap();
        graphics.finish_commands().unwrap();
        assert!(buffer.is_finished());
        graphics.shutdown().unwrap();
    }
}

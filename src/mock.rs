//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! A stub GPU backend implementing `Context`/`SyncContext`, standing in
//! for a real graphics driver so the command-submission machinery can be
//! exercised without one. Gated behind the `mock` feature (and always
//! available under `#[cfg(test)]`) the same way a backend crate would
//! implement these traits for a real API.
use crate::context::{
    Context, FenceWaitResult, Handle, SyncContext, UniformFieldInfo,
};
use crate::error::GpuError;
use crate::resource::buffer::BufferDescriptor;
use crate::resource::framebuffer::FramebufferDescriptor;
use crate::resource::primitive_stream::PrimitiveStreamDescriptor;
use crate::resource::shader_program::{ShaderProgramDescriptor, ShaderStageKind};
use crate::resource::texture::{CubeFace, TextureDescriptor};
use crate::sync::FenceHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A fence handle that `MockSyncContext::wait_fence` never signals within
/// the configured timeout; used by tests exercising `SyncError::
/// FenceTimeout`.
pub const NEVER_SIGNALS_FENCE: FenceHandle = FenceHandle(u64::max_value());

#[derive(Default)]
pub struct MockContext {
    next_handle: u64,
    buffers: HashMap<Handle, Vec<u8>>,
    debug_group_depth: u32,
    next_block_index: HashMap<Handle, u32>,
    /// When set, `insert_fence` hands out `NEVER_SIGNALS_FENCE` instead of
    /// a fresh handle, so a test can force the next `Sync::set` onto a
    /// fence `MockSyncContext` will never observe as complete.
    force_next_fence_never_signals: bool,
    /// Optional call log, shared with the test that spawned this context,
    /// for tests that need to assert ordering between operations that
    /// this mock backend otherwise treats as no-ops (e.g. "the delete
    /// happened after the last bind").
    trace: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockContext {
    pub fn new() -> Self {
        MockContext::default()
    }

    /// As `new`, but every call that mutates backend state also appends a
    /// short description of itself to `trace`, in call order.
    pub fn with_trace(trace: Arc<Mutex<Vec<String>>>) -> Self {
        MockContext {
            trace: Some(trace),
            ..MockContext::default()
        }
    }

    /// See `force_next_fence_never_signals`. Test-only seam for exercising
    /// `SyncError::FenceTimeout`.
    pub fn force_next_fence_never_signals(&mut self) {
        self.force_next_fence_never_signals = true;
    }

    fn alloc(&mut self) -> Handle {
        self.next_handle += 1;
        Handle(self.next_handle)
    }

    fn record(&self, event: impl Into<String>) {
        if let Some(trace) = &self.trace {
            trace.lock().push(event.into());
        }
    }
}

impl Context for MockContext {
    fn push_debug_group(&mut self, _name: &str) {
        self.debug_group_depth += 1;
    }

    fn pop_debug_group(&mut self) {
        self.debug_group_depth = self.debug_group_depth.saturating_sub(1);
    }

    fn insert_fence(&mut self) -> Result<FenceHandle, GpuError> {
        if self.force_next_fence_never_signals {
            self.force_next_fence_never_signals = false;
            return Ok(NEVER_SIGNALS_FENCE);
        }
        self.next_handle += 1;
        Ok(FenceHandle(self.next_handle))
    }

    fn set_sync_point(&mut self, _fence: FenceHandle) {}

    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
        initial_data: Option<&[u8]>,
    ) -> Result<Handle, GpuError> {
        let handle = self.alloc();
        let mut storage = vec![0u8; desc.size];
        if let Some(data) = initial_data {
            let len = data.len().min(storage.len());
            storage[..len].copy_from_slice(&data[..len]);
        }
        self.buffers.insert(handle, storage);
        self.record(format!("CreateBuffer({})", handle.0));
        Ok(handle)
    }

    fn destroy_buffer(&mut self, handle: Handle) {
        self.buffers.remove(&handle);
        self.record(format!("DeleteBuffer({})", handle.0));
    }

    fn bind_buffer(&mut self, handle: Handle) {
        self.record(format!("BindBuffer({})", handle.0));
    }

    fn buffer_cpu_ptr(&mut self, handle: Handle) -> Option<*mut u8> {
        self.buffers.get_mut(&handle).map(|v| v.as_mut_ptr())
    }

    fn flush_gpu_writes(&mut self, _handle: Handle, _offset: usize, _len: usize) {}
    fn flush_cpu_writes(&mut self, _handle: Handle, _offset: usize, _len: usize) {}

    fn create_texture(&mut self, _desc: &TextureDescriptor) -> Result<Handle, GpuError> {
        Ok(self.alloc())
    }

    fn destroy_texture(&mut self, _handle: Handle) {}

    fn upload_texture_image(
        &mut self,
        _handle: Handle,
        _level: u32,
        _face: Option<CubeFace>,
        _data: &[u8],
    ) {
    }

    fn create_display_framebuffer(&mut self) -> Result<Handle, GpuError> {
        Ok(self.alloc())
    }

    fn create_offscreen_framebuffer(
        &mut self,
        _desc: &FramebufferDescriptor,
    ) -> Result<Handle, GpuError> {
        Ok(self.alloc())
    }

    fn destroy_framebuffer(&mut self, _handle: Handle) {}

    fn resize_viewport(&mut self, handle: Handle, width: u32, height: u32) {
        self.record(format!("ResizeViewport({}, {}, {})", handle.0, width, height));
    }

    fn create_primitive_stream(
        &mut self,
        _desc: &PrimitiveStreamDescriptor,
    ) -> Result<Handle, GpuError> {
        Ok(self.alloc())
    }

    fn destroy_primitive_stream(&mut self, _handle: Handle) {}

    fn draw(&mut self, handle: Handle) {
        self.record(format!("Draw({})", handle.0));
    }

    fn compile_shader_stage(
        &mut self,
        _stage: ShaderStageKind,
        _source: &str,
    ) -> Result<Handle, GpuError> {
        Ok(self.alloc())
    }

    fn create_program(&mut self) -> Handle {
        self.alloc()
    }

    fn attach_shader_stage(&mut self, _program: Handle, _stage: Handle) {}
    fn bind_attribute_location(&mut self, _program: Handle, _index: u32, _field_name: &str) {}

    fn link_program(&mut self, _program: Handle) -> Result<(), GpuError> {
        Ok(())
    }

    fn validate_program(&mut self, _program: Handle) -> Result<(), GpuError> {
        Ok(())
    }

    fn uniform_block_index(&mut self, program: Handle, _block_name: &str) -> Option<u32> {
        let next = self.next_block_index.entry(program).or_insert(0);
        let index = *next;
        *next += 1;
        Some(index)
    }

    fn set_uniform_block_binding(&mut self, _program: Handle, _block_index: u32, _binding: u32) {}

    fn uniform_block_size(&mut self, _program: Handle, _block_index: u32) -> u32 {
        256
    }

    fn uniform_field(
        &mut self,
        _program: Handle,
        _block_name: &str,
        _field_name: &str,
        _stage: ShaderStageKind,
    ) -> Option<UniformFieldInfo> {
        Some(UniformFieldInfo {
            referenced: true,
            offset: 0,
        })
    }

    fn destroy_program(&mut self, _handle: Handle) {}
}

/// A resource-sharing sub-context stub: every fence signals instantly
/// except `NEVER_SIGNALS_FENCE`, which always times out (used to exercise
/// `SyncError::FenceTimeout` without an actual multi-second wait).
#[derive(Default)]
pub struct MockSyncContext;

impl MockSyncContext {
    pub fn new() -> Self {
        MockSyncContext
    }
}

impl SyncContext for MockSyncContext {
    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> FenceWaitResult {
        if fence == NEVER_SIGNALS_FENCE {
            std::thread::sleep(timeout.min(Duration::from_millis(50)));
            FenceWaitResult::TimedOut
        } else {
            FenceWaitResult::Signaled
        }
    }

    fn delete_fence(&mut self, _fence: FenceHandle) {}
}

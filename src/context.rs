//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The GPU API boundary. `Context` is the single trait every command in
//! the system drives; the render thread owns exactly one `Box<dyn Context>`
//! and no other thread is ever allowed to call into it. A real backend
//! (translating these calls into an actual graphics API) lives outside
//! this crate, the same way a `zangfx_base` contract is implemented by
//! separate backend crates; the `mock` module (feature-gated) stands in
//! for one so the command-submission machinery can be built and tested
//! without a GPU.
use crate::error::GpuError;
use crate::resource::buffer::BufferDescriptor;
use crate::resource::framebuffer::FramebufferDescriptor;
use crate::resource::primitive_stream::PrimitiveStreamDescriptor;
use crate::resource::shader_program::{ShaderProgramDescriptor, ShaderStageKind};
use crate::resource::texture::{CubeFace, TextureDescriptor};
use crate::sync::FenceHandle;

/// Opaque backend handle for a created GPU object. The crate never
/// interprets the value itself; it is whatever the backend finds
/// convenient (an index, a pointer cast to `u64`, ...).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Handle(pub u64);

pub type BufferHandle = Handle;
pub type TextureHandle = Handle;
pub type FramebufferHandle = Handle;
pub type PrimitiveStreamHandle = Handle;
pub type ProgramHandle = Handle;
pub type ShaderStageHandle = Handle;

/// The render thread's exclusive view of the GPU. Every method is called
/// only from the render thread (or, for the fence-wait-only subset, from
/// the sync thread's resource-sharing sub-context — see `SyncContext`
/// below).
pub trait Context: Send {
    fn push_debug_group(&mut self, name: &str);
    fn pop_debug_group(&mut self);

    /// Inserts a fence at the current command boundary.
    fn insert_fence(&mut self) -> Result<FenceHandle, GpuError>;
    /// Marks the main context's binding state as having a pending sync
    /// point, mirroring `context_interface::set_sync_point`.
    fn set_sync_point(&mut self, fence: FenceHandle);

    fn create_buffer(
        &mut self,
        desc: &BufferDescriptor,
        initial_data: Option<&[u8]>,
    ) -> Result<BufferHandle, GpuError>;
    fn destroy_buffer(&mut self, handle: BufferHandle);
    fn bind_buffer(&mut self, handle: BufferHandle);
    /// Returns the CPU-visible pointer for a non-`Static` mapping buffer,
    /// acquired once at creation and held for the buffer's lifetime.
    fn buffer_cpu_ptr(&mut self, handle: BufferHandle) -> Option<*mut u8>;
    fn flush_gpu_writes(&mut self, handle: BufferHandle, offset: usize, len: usize);
    fn flush_cpu_writes(&mut self, handle: BufferHandle, offset: usize, len: usize);

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle, GpuError>;
    fn destroy_texture(&mut self, handle: TextureHandle);
    fn upload_texture_image(
        &mut self,
        handle: TextureHandle,
        level: u32,
        face: Option<CubeFace>,
        data: &[u8],
    );

    fn create_display_framebuffer(&mut self) -> Result<FramebufferHandle, GpuError>;
    fn create_offscreen_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> Result<FramebufferHandle, GpuError>;
    fn destroy_framebuffer(&mut self, handle: FramebufferHandle);
    fn resize_viewport(&mut self, handle: FramebufferHandle, width: u32, height: u32);

    fn create_primitive_stream(
        &mut self,
        desc: &PrimitiveStreamDescriptor,
    ) -> Result<PrimitiveStreamHandle, GpuError>;
    fn destroy_primitive_stream(&mut self, handle: PrimitiveStreamHandle);
    fn draw(&mut self, handle: PrimitiveStreamHandle);

    fn compile_shader_stage(
        &mut self,
        stage: ShaderStageKind,
        source: &str,
    ) -> Result<ShaderStageHandle, GpuError>;
    fn create_program(&mut self) -> ProgramHandle;
    fn attach_shader_stage(&mut self, program: ProgramHandle, stage: ShaderStageHandle);
    fn bind_attribute_location(&mut self, program: ProgramHandle, index: u32, field_name: &str);
    fn link_program(&mut self, program: ProgramHandle) -> Result<(), GpuError>;
    fn validate_program(&mut self, program: ProgramHandle) -> Result<(), GpuError>;
    fn uniform_block_index(&mut self, program: ProgramHandle, block_name: &str) -> Option<u32>;
    fn set_uniform_block_binding(&mut self, program: ProgramHandle, block_index: u32, binding: u32);
    fn uniform_block_size(&mut self, program: ProgramHandle, block_index: u32) -> u32;
    fn uniform_field(
        &mut self,
        program: ProgramHandle,
        block_name: &str,
        field_name: &str,
        stage: ShaderStageKind,
    ) -> Option<UniformFieldInfo>;
    fn destroy_program(&mut self, handle: ProgramHandle);
}

#[derive(Debug, Clone, Copy)]
pub struct UniformFieldInfo {
    pub referenced: bool,
    pub offset: u32,
}

/// The resource-sharing sub-context the sync thread holds, letting it call
/// the fence-wait API without touching the main context's binding state.
/// Modeled separately from `Context` because the sync thread must never
/// gain access to the rest of the GPU surface (draw calls, resource
/// creation, ...) — only fence waits and deletes.
pub trait SyncContext: Send {
    fn wait_fence(&mut self, fence: FenceHandle, timeout: std::time::Duration) -> FenceWaitResult;
    fn delete_fence(&mut self, fence: FenceHandle);
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FenceWaitResult {
    Signaled,
    TimedOut,
}

//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Primitive streams: a drawable mesh binding over one or more attribute
//! buffers plus an index buffer.
use crate::context::{Context, Handle};
use crate::error::Result;
use crate::graphics::Graphics;
use crate::resource::buffer::Buffer;
use crate::resource::{create_async, create_async_finished, AsyncResourceState};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PrimitiveType {
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// One vertex attribute: which buffer backs it, the byte stride between
/// consecutive elements, and the byte offset of the first element.
#[derive(Clone)]
pub struct AttributeBinding {
    pub buffer: Arc<Buffer>,
    pub stride: u32,
    pub offset: u32,
    pub field_name: String,
}

#[derive(Clone)]
pub struct PrimitiveStreamDescriptor {
    pub attributes: Vec<AttributeBinding>,
    pub index_buffer: Arc<Buffer>,
    pub index_size: IndexSize,
    pub primitive_count: u32,
    pub primitive_type: PrimitiveType,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IndexSize {
    U16,
    U32,
}

impl IndexSize {
    pub fn bytes(self) -> usize {
        match self {
            IndexSize::U16 => 2,
            IndexSize::U32 => 4,
        }
    }
}

/// Groups of attributes that share a backing buffer, identified by
/// hashing the buffer's handle — mirrors the reference engine's
/// deduplication of attribute streams whose underlying buffer is the same
/// object, so the backend only binds it once per draw.
fn dedup_key(buffer: &Arc<Buffer>) -> u64 {
    let mut hasher = DefaultHasher::new();
    // Referential identity, not buffer contents: two `Buffer`s can only
    // share a dedup key if they are the very same resource.
    (Arc::as_ptr(buffer) as usize).hash(&mut hasher);
    hasher.finish()
}

pub struct PrimitiveStream {
    state: Arc<AsyncResourceState<PrimitiveStreamDescriptor>>,
}

fn destroy_fn(context: &mut dyn Context, handle: Handle) {
    context.destroy_primitive_stream(handle);
}

impl PrimitiveStream {
    fn build(
        graphics: &Arc<Graphics>,
        desc: PrimitiveStreamDescriptor,
        name: Option<&str>,
        blocking: bool,
    ) -> Result<Arc<PrimitiveStream>> {
        let create = move |context: &mut dyn Context, desc: &PrimitiveStreamDescriptor| {
            context.create_primitive_stream(desc)
        };

        let state = if blocking {
            create_async_finished(graphics, desc, name, destroy_fn, create)?
        } else {
            create_async(graphics, desc, name, destroy_fn, create)?
        };
        Ok(Arc::new(PrimitiveStream { state }))
    }

    pub fn create(
        graphics: &Arc<Graphics>,
        desc: PrimitiveStreamDescriptor,
    ) -> Result<Arc<PrimitiveStream>> {
        Self::build(graphics, desc, None, false)
    }

    pub fn create_finished(
        graphics: &Arc<Graphics>,
        desc: PrimitiveStreamDescriptor,
    ) -> Result<Arc<PrimitiveStream>> {
        Self::build(graphics, desc, None, true)
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn handle(&self) -> Option<Handle> {
        self.state.handle()
    }

    pub fn descriptor(&self) -> &PrimitiveStreamDescriptor {
        &self.state.descriptor
    }

    /// Groups `descriptor.attributes` into runs sharing a backing buffer,
    /// in first-seen order, for backends that want to bind each buffer
    /// only once.
    pub fn deduplicated_buffer_groups(&self) -> Vec<(u64, Vec<&AttributeBinding>)> {
        let mut groups: Vec<(u64, Vec<&AttributeBinding>)> = Vec::new();
        for attribute in &self.state.descriptor.attributes {
            let key = dedup_key(&attribute.buffer);
            if let Some((_, group)) = groups.iter_mut().find(|(k, _)| *k == key) {
                group.push(attribute);
            } else {
                groups.push((key, vec![attribute]));
            }
        }
        groups
    }

    /// Issues the draw call for this stream.
    pub fn draw(&self, graphics: &Arc<Graphics>) -> Result<()> {
        if let Some(handle) = self.handle() {
            let (queue, _sync) = graphics.system_command_queue();
            queue.enqueue_command(move |context: &mut dyn Context| {
                context.draw(handle);
            })?;
        }
        Ok(())
    }
}

//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Framebuffer resources: either the *display* framebuffer (tracks the
//! window's size, lazily resizing its viewport) or an *offscreen*
//! framebuffer with explicit color/depth-stencil attachments.
use crate::context::{Context, Handle};
use crate::error::Result;
use crate::event::{BindMode, Event};
use crate::graphics::Graphics;
use crate::resource::{create_async, create_async_finished, AsyncResourceState};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ColorFormat {
    R8g8b8a8,
    R8g8b8a8Srgb,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DepthStencilFormat {
    None,
    D16,
    D24,
    D32,
    D24S8,
}

/// The legal multisample sample counts; `None` is the non-multisampled
/// (1 sample) case.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Msaa {
    None,
    Samples2,
    Samples4,
    Samples6,
    Samples8,
    Samples16,
}

impl Msaa {
    pub fn sample_count(self) -> u32 {
        match self {
            Msaa::None => 1,
            Msaa::Samples2 => 2,
            Msaa::Samples4 => 4,
            Msaa::Samples6 => 6,
            Msaa::Samples8 => 8,
            Msaa::Samples16 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OffscreenConfig {
    pub width: u32,
    pub height: u32,
    pub color_format: ColorFormat,
    pub depth_stencil_format: DepthStencilFormat,
    pub msaa: Msaa,
}

#[derive(Debug, Clone, Copy)]
pub enum FramebufferDescriptor {
    Display,
    Offscreen(OffscreenConfig),
}

pub struct Framebuffer {
    state: Arc<AsyncResourceState<FramebufferDescriptor>>,
    /// Current viewport size; updated from the display's size-changed
    /// event and applied lazily on the render thread.
    size: Mutex<(u32, u32)>,
}

fn destroy_fn(context: &mut dyn Context, handle: Handle) {
    context.destroy_framebuffer(handle);
}

impl Framebuffer {
    fn build(
        graphics: &Arc<Graphics>,
        desc: FramebufferDescriptor,
        name: Option<&str>,
        blocking: bool,
    ) -> Result<Arc<Framebuffer>> {
        let initial_size = match desc {
            FramebufferDescriptor::Display => (0, 0),
            FramebufferDescriptor::Offscreen(cfg) => (cfg.width, cfg.height),
        };

        let create = move |context: &mut dyn Context, desc: &FramebufferDescriptor| match desc {
            FramebufferDescriptor::Display => context.create_display_framebuffer(),
            FramebufferDescriptor::Offscreen(cfg) => context.create_offscreen_framebuffer(&{
                let mut owned = *cfg;
                owned.width = owned.width.max(1);
                owned.height = owned.height.max(1);
                owned
            }),
        };

        let state = if blocking {
            create_async_finished(graphics, desc, name, destroy_fn, create)?
        } else {
            create_async(graphics, desc, name, destroy_fn, create)?
        };

        Ok(Arc::new(Framebuffer {
            state,
            size: Mutex::new(initial_size),
        }))
    }

    pub fn create_display(graphics: &Arc<Graphics>) -> Result<Arc<Framebuffer>> {
        Self::build(graphics, FramebufferDescriptor::Display, None, false)
    }

    pub fn create_display_finished(graphics: &Arc<Graphics>) -> Result<Arc<Framebuffer>> {
        Self::build(graphics, FramebufferDescriptor::Display, None, true)
    }

    pub fn create_offscreen(
        graphics: &Arc<Graphics>,
        config: OffscreenConfig,
    ) -> Result<Arc<Framebuffer>> {
        Self::build(
            graphics,
            FramebufferDescriptor::Offscreen(config),
            None,
            false,
        )
    }

    pub fn create_offscreen_finished(
        graphics: &Arc<Graphics>,
        config: OffscreenConfig,
    ) -> Result<Arc<Framebuffer>> {
        Self::build(
            graphics,
            FramebufferDescriptor::Offscreen(config),
            None,
            true,
        )
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn handle(&self) -> Option<Handle> {
        self.state.handle()
    }

    pub fn descriptor(&self) -> &FramebufferDescriptor {
        &self.state.descriptor
    }

    pub fn size(&self) -> (u32, u32) {
        *self.size.lock()
    }

    /// Bound to a window's "size changed" `Event`; only meaningful for a
    /// `Display` framebuffer. Records the new size and lazily queues a
    /// viewport resize, rather than resizing immediately, since this is
    /// typically called from a UI thread.
    pub fn on_size_changed(self: &Arc<Self>, graphics: &Arc<Graphics>, width: u32, height: u32) {
        *self.size.lock() = (width, height);
        if let Some(handle) = self.handle() {
            let _ = {
                let (queue, _sync) = graphics.system_command_queue();
                queue.enqueue_command(move |context: &mut dyn Context| {
                    context.resize_viewport(handle, width, height);
                })
            };
        }
    }

    /// Binds `on_size_changed` as a listener on a window's size-change
    /// event, so a display framebuffer stays in sync without the owner
    /// polling it every frame.
    pub fn track_size_event(
        self: &Arc<Self>,
        graphics: Arc<Graphics>,
        event: &Event<Box<dyn Fn(u32, u32) + Send + Sync>>,
    ) {
        let this = Arc::clone(self);
        event.bind(
            Box::new(move |w: u32, h: u32| this.on_size_changed(&graphics, w, h)),
            BindMode::Owned,
        );
    }
}

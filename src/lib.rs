//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Asynchronous command-submission runtime for an interactive GPU
//! renderer.
//!
//! A single render thread owns the `Context` a backend implements; every
//! other thread talks to it through named [`command_queue::CommandQueue`]s
//! ordered by a [`render_policy::RenderPolicy`] and staged via per-producer
//! double buffers ([`dbq`]). A [`sync::SyncThread`] turns GPU fence waits
//! into condition-variable signals so producers never block the render
//! thread itself. [`resource`] builds the asynchronously-constructed GPU
//! object types (buffer, texture, framebuffer, primitive stream, shader
//! program) on top of that queue, and [`graphics::Graphics`] is the public
//! façade tying it all together.

pub mod command_queue;
pub mod config;
pub mod context;
pub mod dbq;
pub mod error;
pub mod event;
pub mod graphics;
pub mod name_table;
pub mod refobj;
pub mod render_policy;
pub mod render_thread;
pub mod resource;
pub mod sync;
pub mod thread_local_map;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{GraphicsError, Result};
pub use graphics::Graphics;

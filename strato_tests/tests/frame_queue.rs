// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backpressure between frame production and rasterization.

use strato::kurbo::{Affine, Rect, Size, Vec2};
use strato::{
    LayerTree, LayerTreeBuilder, PipelineConsumeResult, RasterCacheConfig, RasterStatus,
    Rasterizer, SoftwareCanvas,
};
use strato_tests::{init_logging, rect_picture, solid};

fn tree() -> LayerTree {
    let mut builder = LayerTreeBuilder::new();
    builder.add_picture(
        Vec2::ZERO,
        rect_picture(Rect::new(0.0, 0.0, 8.0, 8.0), solid(255, 0, 0), 1),
        false,
        false,
    );
    builder.build(Size::new(8.0, 8.0), 1.0)
}

#[test]
fn producer_is_throttled_until_the_rasterizer_catches_up() {
    init_logging();
    let mut rasterizer = Rasterizer::new(RasterCacheConfig::default());
    let pipeline = rasterizer.pipeline();

    // The UI side may run two frames ahead, no further.
    assert!(pipeline.produce().unwrap().complete(tree()));
    assert!(pipeline.produce().unwrap().complete(tree()));
    assert!(pipeline.produce().is_none());

    let mut canvas = SoftwareCanvas::new(8, 8);
    let status = rasterizer.draw_frame(&mut canvas, None, None, Affine::IDENTITY);
    assert_eq!(status, Some(RasterStatus::Success));

    // Consuming one frame frees exactly one slot.
    assert!(pipeline.produce().unwrap().complete(tree()));
    assert!(pipeline.produce().is_none());
}

#[test]
fn abandoned_frame_does_not_leak_its_slot() {
    init_logging();
    let rasterizer = Rasterizer::new(RasterCacheConfig::default());
    let pipeline = rasterizer.pipeline();

    let kept = pipeline.produce().unwrap();
    drop(pipeline.produce().unwrap());
    assert!(pipeline.produce().unwrap().complete(tree()));
    kept.complete(tree());

    let mut seen = 0;
    while pipeline.consume(|_| seen += 1) != PipelineConsumeResult::NoneAvailable {}
    assert_eq!(seen, 2);
}

#[test]
fn frame_notifier_drives_the_consumer() {
    init_logging();
    let mut rasterizer = Rasterizer::new(RasterCacheConfig::default());
    let pipeline = rasterizer.pipeline();
    let (tx, rx) = std::sync::mpsc::channel();
    pipeline.set_frame_notifier(Box::new(move || {
        let _ = tx.send(());
    }));

    let producer = pipeline.clone();
    let worker = std::thread::spawn(move || {
        producer.produce().unwrap().complete(tree());
    });

    rx.recv().unwrap();
    let mut canvas = SoftwareCanvas::new(8, 8);
    let status = rasterizer.draw_frame(&mut canvas, None, None, Affine::IDENTITY);
    assert_eq!(status, Some(RasterStatus::Success));
    worker.join().unwrap();
}

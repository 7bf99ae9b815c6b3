//! Frames that fail part way leave the engine able to render

mod common;

use common::{engine, engine_for, present_frames, SolidSource, STRATEGIES};
use compositor_engine::prelude::*;

const WINDOW: SurfaceKind = SurfaceKind::Window { window: 9 };

fn item(id: SurfaceId) -> RenderItem {
    RenderItem::new(id, Rect::new(0, 0, 32, 32))
}

#[test]
fn failed_acquire_does_not_wedge_the_ring() {
    for strategy in STRATEGIES {
        let mut engine = engine_for(strategy);
        let mut source = SolidSource::new([1, 1, 1, 255]);
        let id = engine.create_surface(WINDOW, Extent::new(32, 32), None).unwrap();

        engine.backend_mut().set_fail_acquire(true);
        assert!(matches!(engine.render_frame(&[item(id)], &mut source), Err(RenderError::Api(_))));
        assert_eq!(engine.frame_tag(), 0);
        assert_eq!(engine.pending_updates(), &[id]);
        assert_eq!(source.captures, 0);

        engine.backend_mut().set_fail_acquire(false);
        for expected in 0..10u64 {
            let status = engine.render_frame(&[item(id)], &mut source).unwrap();
            assert!(
                matches!(status, FrameStatus::Presented { frame_tag, .. } if frame_tag == expected),
                "{strategy:?}: {status:?}"
            );
        }
        assert_eq!(engine.pacer().deferred_frames(), 0);
        assert!(engine.pending_updates().is_empty());
    }
}

#[test]
fn failed_submission_requeues_recorded_uploads() {
    for strategy in STRATEGIES {
        let mut engine = engine_for(strategy);
        let mut source = SolidSource::new([2, 2, 2, 255]);
        let id = engine.create_surface(WINDOW, Extent::new(32, 32), None).unwrap();

        engine.backend_mut().set_fail_submit(true);
        assert!(matches!(engine.render_frame(&[item(id)], &mut source), Err(RenderError::Api(_))));
        assert_eq!(engine.frame_tag(), 0);
        assert_eq!(engine.backend().stats().texture_writes, 1);
        assert_eq!(engine.pending_updates(), &[id]);
        assert!(engine.surface(id).unwrap().needs_full_update());

        engine.backend_mut().set_fail_submit(false);
        present_frames(&mut engine, &[item(id)], &mut source, 10);
        assert_eq!(engine.frame_tag(), 10);
        assert_eq!(engine.backend().stats().texture_writes, 2);
        assert_eq!(engine.pacer().deferred_frames(), 0);
        assert!(engine.pending_updates().is_empty());
    }
}

#[test]
fn failed_upload_keeps_every_queued_surface() {
    let mut engine = engine();
    let mut source = SolidSource::new([3, 3, 3, 255]);
    let first = engine.create_surface(WINDOW, Extent::new(32, 32), None).unwrap();
    let second = engine
        .create_surface(SurfaceKind::Window { window: 10 }, Extent::new(16, 16), None)
        .unwrap();
    assert_eq!(engine.pending_updates(), &[first, second]);

    engine.backend_mut().set_fail_texture_writes(true);
    assert!(engine.render_frame(&[item(first), item(second)], &mut source).is_err());
    assert_eq!(engine.pending_updates(), &[first, second]);
    assert!(engine.surface(first).unwrap().needs_full_update());
    assert!(engine.surface(second).unwrap().needs_full_update());
    assert_eq!(engine.pacer().abandoned_frames(), 1);
    assert_eq!(engine.frame_tag(), 0);

    engine.backend_mut().set_fail_texture_writes(false);
    let status = engine.render_frame(&[item(first), item(second)], &mut source).unwrap();
    assert_eq!(
        status,
        FrameStatus::Presented {
            frame_tag: 0,
            image_index: 1,
        }
    );
    assert_eq!(engine.backend().stats().texture_writes, 2);
    assert!(engine.pending_updates().is_empty());
    assert_eq!(engine.backend().frame_draws().len(), 2);
}

#[test]
fn abandoned_frames_keep_the_ring_moving() {
    let mut engine = common::chained_engine();
    let mut source = SolidSource::new([4, 4, 4, 255]);
    let id = engine.create_surface(WINDOW, Extent::new(32, 32), None).unwrap();
    present_frames(&mut engine, &[item(id)], &mut source, 1);

    // Uploads only happen once the slot's fence proved the last copy done,
    // so only every third frame reaches the failing write
    let mut failures = 0;
    for _ in 0..6 {
        assert!(engine.notify_damage(id, Rect::new(0, 0, 4, 4)).unwrap());
        engine.backend_mut().set_fail_texture_writes(true);
        match engine.render_frame(&[item(id)], &mut source) {
            Ok(status) => assert!(status.is_presented()),
            Err(_) => {
                failures += 1;
                assert_eq!(engine.pending_updates(), &[id]);
            }
        }
        engine.backend_mut().set_fail_texture_writes(false);
        present_frames(&mut engine, &[item(id)], &mut source, 1);
    }

    assert_eq!(failures, 3);
    assert_eq!(engine.pacer().abandoned_frames(), 3);
    assert_eq!(engine.pacer().deferred_frames(), 0);
    assert_eq!(engine.frame_tag(), 1 + 12 - 3);
}

//! Surface lifecycle through the public engine API

mod common;

use common::{engine, engine_for, engine_with, present_frames, SolidSource, OUTPUT, STRATEGIES};
use compositor_engine::prelude::*;
use compositor_engine::render::ShaderStage;

const WINDOW: SurfaceKind = SurfaceKind::Window { window: 7 };

fn item(id: SurfaceId) -> RenderItem {
    RenderItem::new(id, Rect::new(10, 10, 64, 64))
}

#[test]
fn released_texture_is_reused_for_same_extent() {
    for strategy in STRATEGIES {
        let mut engine = engine_for(strategy);
        let mut source = SolidSource::new([0, 0, 255, 255]);

        let first = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
        let texture = engine.surface(first).unwrap().texture().id();
        present_frames(&mut engine, &[item(first)], &mut source, 5);
        assert_eq!(engine.frame_tag(), 5);

        engine.destroy_surface(first).unwrap();
        present_frames(&mut engine, &[], &mut source, 2);

        let second = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
        assert_eq!(engine.surface(second).unwrap().texture().id(), texture);
        assert_eq!(engine.backend().stats().textures_created, 1);

        let third = engine.create_surface(WINDOW, Extent::new(128, 128), None).unwrap();
        assert_ne!(engine.surface(third).unwrap().texture().id(), texture);
        assert_eq!(engine.backend().stats().textures_created, 2);
    }
}

#[test]
fn idle_texture_is_destroyed_only_after_ring_deadline() {
    let config = EngineConfig::default()
        .with_sync_strategy(SyncStrategy::SemaphoreChain)
        .with_texture_idle_secs(0.0);
    let mut engine = engine_with(config);
    let mut source = SolidSource::new([0, 255, 0, 255]);

    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    present_frames(&mut engine, &[item(id)], &mut source, 5);
    engine.destroy_surface(id).unwrap();
    let released_at = engine.frame_tag();

    let deadline = released_at + engine.ring_size() + 1;
    while engine.frame_tag() < deadline {
        present_frames(&mut engine, &[], &mut source, 1);
        assert_eq!(engine.backend().stats().textures_destroyed, 0);
        assert_eq!(engine.context().textures().pooled_count(), 1);
    }

    // the sweep at the start of the deadline frame reclaims it
    present_frames(&mut engine, &[], &mut source, 1);
    assert_eq!(engine.backend().stats().textures_destroyed, 1);
    assert_eq!(engine.context().textures().pooled_count(), 0);
    assert_eq!(engine.backend().live_texture_count(), 0);
}

#[test]
fn default_idle_threshold_keeps_pooled_textures() {
    let mut engine = engine();
    let mut source = SolidSource::new([0, 0, 0, 255]);

    let id = engine.create_surface(WINDOW, Extent::new(32, 32), None).unwrap();
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    engine.destroy_surface(id).unwrap();
    present_frames(&mut engine, &[], &mut source, 10);

    assert_eq!(engine.backend().stats().textures_destroyed, 0);
    assert_eq!(engine.context().textures().pooled_count(), 1);
}

#[test]
fn switching_back_inside_window_allocates_fresh_tables() {
    let mut engine = engine();
    let mut source = SolidSource::new([255, 0, 0, 255]);

    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    let first_tables = engine
        .surface(id)
        .unwrap()
        .active_set()
        .unwrap()
        .stage_tables(ShaderStage::Fragment.index())
        .unwrap()
        .to_vec();
    present_frames(&mut engine, &[item(id)], &mut source, 1);

    engine.set_shaders(id, &ShaderSet::frame_set()).unwrap();
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    let allocated = engine.backend().stats().tables_allocated;

    engine.set_shaders(id, &ShaderSet::default_set()).unwrap();
    let frame = engine.surface(id).unwrap();
    let active = frame.active_set().unwrap();
    assert_eq!(active.fence_tag(), engine.frame_tag());
    assert_ne!(active.stage_tables(ShaderStage::Fragment.index()).unwrap(), first_tables.as_slice());
    assert!(engine.backend().stats().tables_allocated > allocated);
    assert!(engine.context().tables().retired_count() >= 1);
}

#[test]
fn switching_back_after_ring_reuses_tables() {
    let mut engine = engine();
    let mut source = SolidSource::new([255, 0, 0, 255]);

    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    let first_tables = engine
        .surface(id)
        .unwrap()
        .active_set()
        .unwrap()
        .stage_tables(ShaderStage::Fragment.index())
        .unwrap()
        .to_vec();

    engine.set_shaders(id, &ShaderSet::frame_set()).unwrap();
    present_frames(&mut engine, &[item(id)], &mut source, 5);
    let allocated = engine.backend().stats().tables_allocated;

    engine.set_shaders(id, &ShaderSet::default_set()).unwrap();
    let active = engine.surface(id).unwrap().active_set().unwrap();
    assert_eq!(active.stage_tables(ShaderStage::Fragment.index()).unwrap(), first_tables.as_slice());
    assert_eq!(engine.backend().stats().tables_allocated, allocated);
}

#[test]
fn resize_retires_texture_and_tables() {
    for strategy in STRATEGIES {
        resize_retires_texture_and_tables_with(strategy);
    }
}

fn resize_retires_texture_and_tables_with(strategy: SyncStrategy) {
    let mut engine = engine_for(strategy);
    let mut source = SolidSource::new([10, 20, 30, 255]);

    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    present_frames(&mut engine, &[item(id)], &mut source, 2);
    let old_texture = engine.surface(id).unwrap().texture().id();
    let writes = engine.backend().stats().texture_writes;

    engine.adjust_surface(id, Extent::new(100, 80)).unwrap();
    let frame = engine.surface(id).unwrap();
    assert_eq!(frame.texture().extent(), Extent::new(100, 80));
    assert!(frame.needs_full_update());
    assert_eq!(engine.pending_updates(), &[id]);
    assert_eq!(
        engine.context().textures().pooled_ids().collect::<Vec<_>>(),
        vec![old_texture]
    );
    assert_eq!(engine.context().tables().retired_count(), 2);
    assert_eq!(engine.backend().stats().textures_destroyed, 0);
    assert_eq!(engine.backend().stats().tables_freed, 0);

    let resized_at = engine.frame_tag();
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    assert_eq!(engine.backend().stats().texture_writes, writes + 1);
    assert!(!engine.surface(id).unwrap().needs_full_update());

    while engine.frame_tag() < resized_at + engine.ring_size() + 1 {
        assert_eq!(engine.backend().stats().tables_freed, 0);
        present_frames(&mut engine, &[item(id)], &mut source, 1);
    }
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    assert_eq!(engine.backend().stats().tables_freed, 2);
    assert_eq!(engine.context().tables().retired_count(), 0);
}

#[test]
fn destroy_goes_through_retirement() {
    let mut engine = engine();
    let mut source = SolidSource::new([1, 2, 3, 255]);

    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    engine.destroy_surface(id).unwrap();

    assert!(engine.surface(id).is_none());
    assert!(engine.pending_updates().is_empty());
    assert_eq!(engine.backend().live_texture_count(), 1);
    assert_eq!(engine.backend().stats().tables_freed, 0);
    assert!(matches!(engine.destroy_surface(id), Err(RenderError::UnknownSurface(_))));

    // stale item in the list is skipped
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    assert!(engine.backend().frame_draws().is_empty());
}

#[test]
fn damage_outside_bounds_is_dropped() {
    let mut engine = engine();
    let mut source = SolidSource::new([9, 9, 9, 255]);

    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    assert!(engine.pending_updates().is_empty());
    let captures = source.captures;

    assert!(!engine.notify_damage(id, Rect::new(60, 60, 10, 10)).unwrap());
    assert!(engine.pending_updates().is_empty());

    assert!(engine.notify_damage(id, Rect::new(0, 0, 16, 16)).unwrap());
    assert!(engine.notify_damage(id, Rect::new(32, 32, 16, 16)).unwrap());
    assert_eq!(engine.pending_updates(), &[id]);

    let regions = engine.backend().stats().regions_written;
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    assert_eq!(source.captures, captures + 1);
    assert_eq!(engine.backend().stats().regions_written, regions + 2);
    assert!(engine.pending_updates().is_empty());
    assert!(engine.surface(id).unwrap().damage().is_empty());
}

#[test]
fn unavailable_content_stays_queued() {
    let mut engine = engine();
    let mut source = SolidSource::new([9, 9, 9, 255]);
    source.unavailable = true;

    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    present_frames(&mut engine, &[item(id)], &mut source, 2);
    assert_eq!(engine.pending_updates(), &[id]);
    assert_eq!(engine.backend().stats().texture_writes, 0);

    source.unavailable = false;
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    assert!(engine.pending_updates().is_empty());
    assert_eq!(engine.backend().stats().texture_writes, 1);
}

#[test]
fn unknown_surface_operations_fail() {
    let mut engine = engine();
    let id = engine.create_surface(WINDOW, Extent::new(8, 8), None).unwrap();
    engine.destroy_surface(id).unwrap();

    assert!(matches!(
        engine.adjust_surface(id, Extent::new(4, 4)),
        Err(RenderError::UnknownSurface(_))
    ));
    assert!(matches!(
        engine.notify_damage(id, Rect::new(0, 0, 1, 1)),
        Err(RenderError::UnknownSurface(_))
    ));
    assert!(matches!(
        engine.set_shaders(id, &ShaderSet::frame_set()),
        Err(RenderError::UnknownSurface(_))
    ));
    assert!(matches!(engine.set_user_flags(id, 1), Err(RenderError::UnknownSurface(_))));
}

#[test]
fn background_is_drawn_first_over_whole_output() {
    let mut engine = engine();
    let mut source = SolidSource::new([40, 40, 40, 255]);

    let window = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    let background = engine.set_background(3, OUTPUT).unwrap();
    assert_eq!(engine.background(), Some(background));

    present_frames(&mut engine, &[item(window)], &mut source, 1);
    let draws = engine.backend().frame_draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].scissor, Some(OUTPUT.full_rect()));
    assert_eq!(source.captures, 2);

    // no damage: neither surface is captured again
    present_frames(&mut engine, &[item(window)], &mut source, 1);
    assert_eq!(source.captures, 2);

    let previous = engine.surface(background).unwrap().texture().id();
    let replaced = engine.set_background(4, OUTPUT).unwrap();
    assert_ne!(replaced, background);
    assert!(engine.surface(background).is_none());
    assert_eq!(engine.surface_count(), 2);
    assert_eq!(
        engine.context().textures().pooled_ids().collect::<Vec<_>>(),
        vec![previous]
    );
}

#[test]
fn background_rejects_damage() {
    let mut engine = engine();
    let mut source = SolidSource::new([40, 40, 40, 255]);
    let background = engine.set_background(3, OUTPUT).unwrap();
    present_frames(&mut engine, &[], &mut source, 1);

    for _ in 0..50 {
        assert!(!engine.notify_damage(background, Rect::new(0, 0, 16, 16)).unwrap());
        present_frames(&mut engine, &[], &mut source, 1);
    }
    assert!(engine.surface(background).unwrap().damage().is_empty());
    assert!(engine.pending_updates().is_empty());
    assert_eq!(source.captures, 1);
}

#[test]
fn pipeline_from_another_engine_is_rejected() {
    let mut other = engine();
    other.load_pipeline(&ShaderSet::default_set()).unwrap();
    let foreign = other.load_pipeline(&ShaderSet::frame_set()).unwrap();

    let mut engine = engine();
    let mut source = SolidSource::new([0, 0, 0, 255]);
    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    let assigned = engine.surface(id).unwrap().pipeline();
    assert_eq!(engine.context().pipelines().pipeline_count(), 1);

    assert!(matches!(
        engine.assign_pipeline(id, foreign),
        Err(RenderError::InvalidOperation { .. })
    ));
    assert!(engine.context().pipelines().pipeline(foreign).is_err());
    assert_eq!(engine.surface(id).unwrap().pipeline(), assigned);
    present_frames(&mut engine, &[item(id)], &mut source, 1);
    assert_eq!(engine.backend().frame_draws().len(), 1);
}

#[test]
fn framed_surface_uses_frame_shaders() {
    let mut engine = engine();
    let id = engine.create_framed_surface(12, Extent::new(64, 64)).unwrap();
    let frame = engine.surface(id).unwrap();

    assert_eq!(frame.kind(), SurfaceKind::Window { window: 12 });
    let names = engine.context().pipelines().pipeline(frame.pipeline()).unwrap().names();
    assert_eq!(names[0], "frame_vertex.spv");
    assert_eq!(names[2], "frame_fragment.spv");
}

#[test]
fn focus_and_user_flags_reach_push_constants() {
    let mut engine = engine();
    let mut source = SolidSource::new([0, 0, 0, 255]);

    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    engine.set_user_flags(id, 0b100).unwrap();
    present_frames(&mut engine, &[item(id).with_focus(true)], &mut source, 1);

    let constants = engine.backend().frame_draws()[0].constants.unwrap();
    assert_eq!(constants.flags, 0b101);
    assert_eq!(constants.image_extent, [OUTPUT.width as f32, OUTPUT.height as f32]);
}

#[test]
fn arena_failure_leaves_surface_undrawable() {
    let backend = HeadlessBackend::new(HeadlessConfig {
        extent: OUTPUT,
        fail_arena_creation: true,
        ..HeadlessConfig::default()
    });
    let mut engine = RenderEngine::new(backend, EngineConfig::default()).unwrap();
    common::register_shaders(&mut engine);
    let mut source = SolidSource::new([0, 0, 0, 255]);

    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    assert!(!engine.surface(id).unwrap().is_drawable());

    let status = engine.render_frame(&[item(id)], &mut source).unwrap();
    assert!(status.is_presented());
    assert!(engine.backend().frame_draws().is_empty());
}

#[test]
fn shutdown_releases_everything() {
    let mut engine = engine();
    let mut source = SolidSource::new([0, 0, 0, 255]);

    let kept = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    let dropped = engine.create_surface(WINDOW, Extent::new(32, 32), None).unwrap();
    present_frames(&mut engine, &[item(kept), item(dropped)], &mut source, 2);
    engine.destroy_surface(dropped).unwrap();

    engine.shutdown().unwrap();
    let stats = engine.backend().stats();
    assert_eq!(engine.backend().live_texture_count(), 0);
    assert_eq!(stats.arenas_destroyed, stats.arenas_created);
    assert_eq!(stats.fences_destroyed, stats.fences_created);
    assert_eq!(stats.semaphores_destroyed, stats.semaphores_created);
    assert_eq!(engine.surface_count(), 0);

    engine.shutdown().unwrap();
    assert!(matches!(
        engine.render_frame(&[], &mut source),
        Err(RenderError::InvalidOperation { .. })
    ));
}

//! Frame loop synchronization and reclamation timing

mod common;

use std::fs;

use common::{chained_engine, engine, engine_for, engine_with, present_frames, SolidSource, OUTPUT};
use compositor_engine::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WINDOW: SurfaceKind = SurfaceKind::Window { window: 1 };

#[test]
fn frames_are_tagged_and_images_cycle() {
    let mut engine = chained_engine();
    let mut source = SolidSource::new([0, 0, 0, 255]);

    for expected in 0..6u64 {
        let status = engine.render_frame(&[], &mut source).unwrap();
        assert_eq!(
            status,
            FrameStatus::Presented {
                frame_tag: expected,
                image_index: (expected % 3) as u32,
            }
        );
    }

    let stats = engine.backend().stats();
    assert_eq!(stats.acquires, 6);
    assert_eq!(stats.submissions, 12);
    assert_eq!(stats.presents, 6);
    assert_eq!(stats.wait_idles, 0);
}

#[test]
fn wait_idle_strategy_drains_twice_per_frame() {
    let mut engine = engine_with(EngineConfig::default());
    let mut source = SolidSource::new([0, 0, 0, 255]);
    assert_eq!(engine.pacer().strategy(), SyncStrategy::WaitIdle);

    present_frames(&mut engine, &[], &mut source, 4);
    assert_eq!(engine.backend().stats().wait_idles, 8);
}

#[test]
fn capture_semaphores_are_exportable() {
    let engine = engine();
    assert_eq!(engine.capture_semaphores().count(), 3);
    assert_eq!(engine.backend().stats().exportable_semaphores, 3);
    assert_eq!(engine.backend().stats().semaphores_created, 9);
}

#[test]
fn busy_slot_defers_frame_without_side_effects() {
    let mut engine = chained_engine();
    let mut source = SolidSource::new([5, 5, 5, 255]);
    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    let items = [RenderItem::new(id, Rect::new(0, 0, 64, 64))];
    present_frames(&mut engine, &items, &mut source, 1);

    engine.backend_mut().set_stalled(true);
    present_frames(&mut engine, &items, &mut source, 3);

    assert!(engine.notify_damage(id, Rect::new(0, 0, 8, 8)).unwrap());
    let captures = source.captures;
    let tag = engine.frame_tag();
    let submissions = engine.backend().stats().submissions;

    let status = engine.render_frame(&items, &mut source).unwrap();
    assert_eq!(status, FrameStatus::Deferred);
    assert_eq!(engine.frame_tag(), tag);
    assert_eq!(source.captures, captures);
    assert_eq!(engine.pending_updates(), &[id]);
    assert_eq!(engine.backend().stats().submissions, submissions);
    assert_eq!(engine.pacer().deferred_frames(), 1);

    engine.backend_mut().set_stalled(false);
    present_frames(&mut engine, &items, &mut source, 1);
    assert_eq!(engine.frame_tag(), tag + 1);
    assert_eq!(source.captures, captures + 1);
    assert!(engine.pending_updates().is_empty());
}

#[test]
fn staging_is_not_rewritten_while_its_copy_is_in_flight() {
    let mut engine = chained_engine();
    let mut source = SolidSource::new([7, 7, 7, 255]);
    let id = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    let items = [RenderItem::new(id, Rect::new(0, 0, 64, 64))];

    // Frame 0 never completes while the remaining slots keep the ring going
    engine.backend_mut().set_stalled(true);
    present_frames(&mut engine, &items, &mut source, 1);
    assert_eq!(engine.backend().stats().texture_writes, 1);
    for _ in 0..2 {
        assert!(engine.notify_damage(id, Rect::new(0, 0, 8, 8)).unwrap());
        present_frames(&mut engine, &items, &mut source, 1);

        let texture = engine.surface(id).unwrap().texture();
        assert!(engine.backend().staging_in_flight(texture.raw()));
        assert_eq!(texture.last_upload(), Some(0));
        assert_eq!(engine.backend().stats().texture_writes, 1);
        assert_eq!(engine.pending_updates(), &[id]);
    }
    assert_eq!(source.captures, 1);

    engine.backend_mut().set_stalled(false);
    present_frames(&mut engine, &items, &mut source, 1);
    assert_eq!(engine.context().completed_frame(), Some(0));
    assert_eq!(engine.backend().stats().texture_writes, 2);
    assert_eq!(engine.surface(id).unwrap().texture().last_upload(), Some(3));
    assert!(engine.pending_updates().is_empty());
    assert!(engine.surface(id).unwrap().damage().is_empty());
}

#[test]
fn continuous_damage_uploads_only_after_fences() {
    for (strategy, writes) in [(SyncStrategy::WaitIdle, 9), (SyncStrategy::SemaphoreChain, 3)] {
        let mut engine = engine_for(strategy);
        let mut source = SolidSource::new([3, 3, 3, 255]);
        let id = engine.create_surface(WINDOW, Extent::new(32, 32), None).unwrap();
        let items = [RenderItem::new(id, Rect::new(0, 0, 32, 32))];

        for _ in 0..9 {
            assert!(engine.notify_damage(id, Rect::new(0, 0, 8, 8)).unwrap());
            present_frames(&mut engine, &items, &mut source, 1);
        }
        assert_eq!(engine.backend().stats().texture_writes, writes, "{strategy:?}");
    }
}

#[test]
fn pooled_texture_waits_for_its_last_copy() {
    let mut engine = chained_engine();
    let mut source = SolidSource::new([0, 0, 0, 255]);
    let first = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    present_frames(&mut engine, &[], &mut source, 1);
    let texture = engine.surface(first).unwrap().texture().id();
    engine.destroy_surface(first).unwrap();

    let second = engine.create_surface(WINDOW, Extent::new(64, 64), None).unwrap();
    assert_eq!(engine.surface(second).unwrap().texture().id(), texture);

    present_frames(&mut engine, &[], &mut source, 2);
    assert_eq!(engine.backend().stats().texture_writes, 1);
    assert_eq!(engine.pending_updates(), &[second]);

    present_frames(&mut engine, &[], &mut source, 1);
    assert_eq!(engine.backend().stats().texture_writes, 2);
    assert!(engine.pending_updates().is_empty());
}

#[test]
fn tables_are_reused_only_outside_ring_window() {
    let mut engine = engine();
    let mut source = SolidSource::new([0, 0, 0, 255]);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let ring = engine.ring_size();
    let sets = [ShaderSet::default_set(), ShaderSet::frame_set()];

    let surfaces: Vec<_> = (0..3)
        .map(|i| {
            engine
                .create_surface(SurfaceKind::Window { window: i }, Extent::new(32, 32), None)
                .unwrap()
        })
        .collect();
    let items: Vec<_> = surfaces
        .iter()
        .map(|&id| RenderItem::new(id, Rect::new(0, 0, 32, 32)))
        .collect();

    let mut reused = 0;
    for _ in 0..400 {
        if rng.gen_bool(0.6) {
            present_frames(&mut engine, &items, &mut source, 1);
            continue;
        }

        let id = surfaces[rng.gen_range(0..surfaces.len())];
        let allocated = engine.backend().stats().tables_allocated;
        engine.set_shaders(id, &sets[rng.gen_range(0..sets.len())]).unwrap();

        let frame = engine.surface(id).unwrap();
        let active = frame.active_set().unwrap();
        if engine.backend().stats().tables_allocated == allocated {
            reused += 1;
            assert!(
                engine.frame_tag() > active.fence_tag() + ring + 1,
                "set last used at {} reused at {}",
                active.fence_tag(),
                engine.frame_tag()
            );
        } else {
            assert_eq!(active.fence_tag(), engine.frame_tag());
        }

        let mut pipelines: Vec<_> = frame.binding_sets().iter().map(|set| set.pipeline()).collect();
        pipelines.sort();
        pipelines.dedup();
        assert_eq!(pipelines.len(), frame.binding_sets().len());
    }
    assert!(reused > 0);
}

#[test]
fn reclamation_never_precedes_deadline() {
    let config = EngineConfig::default()
        .with_sync_strategy(SyncStrategy::SemaphoreChain)
        .with_texture_idle_secs(0.0);
    let mut engine = engine_with(config);
    let mut source = SolidSource::new([0, 0, 0, 255]);
    let mut rng = StdRng::seed_from_u64(42);
    let ring = engine.ring_size();

    let mut released: Vec<u64> = Vec::new();
    let mut live = Vec::new();
    for _ in 0..200 {
        match rng.gen_range(0..3) {
            0 => {
                let side = rng.gen_range(1..4) * 16;
                live.push(engine.create_surface(WINDOW, Extent::new(side, side), None).unwrap());
            }
            1 if !live.is_empty() => {
                let id = live.swap_remove(rng.gen_range(0..live.len()));
                engine.destroy_surface(id).unwrap();
                released.push(engine.frame_tag());
            }
            _ => {
                present_frames(&mut engine, &[], &mut source, 1);
                // frame_tag - 1 is the frame whose sweep just ran
                let swept_at = engine.frame_tag() - 1;
                let eligible = released.iter().filter(|&&tag| swept_at >= tag + ring + 1).count();
                assert!(engine.backend().stats().textures_destroyed <= eligible);
            }
        }
    }
}

#[test]
fn null_output_still_runs_frames() {
    let mut engine = RenderEngine::new(HeadlessBackend::new(HeadlessConfig::default()), EngineConfig::default()).unwrap();
    common::register_shaders(&mut engine);
    let mut source = SolidSource::new([0, 0, 0, 255]);

    let id = engine.create_surface(WINDOW, Extent::new(16, 16), None).unwrap();
    let status = engine
        .render_frame(&[RenderItem::new(id, Rect::new(0, 0, 16, 16))], &mut source)
        .unwrap();
    assert!(status.is_presented());
    assert_eq!(engine.backend().output_extent(), Extent::new(0, 0));
}

#[test]
fn shader_manifest_is_loaded_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let spirv: Vec<u8> = [0x0723_0203u32, 0x0001_0000]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect();

    let mut manifest = String::new();
    for prefix in ["default", "frame"] {
        for stage in ["vertex", "geometry", "fragment"] {
            let name = format!("{prefix}_{stage}.spv");
            fs::write(dir.path().join(&name), &spirv).unwrap();
            manifest.push_str(&format!("[[shader]]\nname = \"{name}\"\nstage = \"{stage}\"\nfile = \"{name}\"\n\n"));
            if stage == "fragment" {
                manifest.push_str(
                    "[[shader.binding]]\nname = \"content\"\nkind = \"sampled_image\"\nset = 0\nbinding = 0\n\n\
                     [[shader.binding]]\nname = \"pointSampler\"\nkind = \"sampler\"\nset = 0\nbinding = 1\n\n",
                );
            }
        }
    }
    let path = dir.path().join("shaders.toml");
    fs::write(&path, manifest).unwrap();

    let config = EngineConfig::default().with_shader_manifest(&path);
    let backend = HeadlessBackend::new(HeadlessConfig::with_extent(OUTPUT));
    let mut engine = RenderEngine::new(backend, config).unwrap();
    assert_eq!(engine.context().pipelines().shader_count(), 6);

    let id = engine.create_framed_surface(2, Extent::new(48, 48)).unwrap();
    assert!(engine.surface(id).unwrap().is_drawable());
}

#[test]
fn missing_manifest_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_shader_manifest(dir.path().join("absent.toml"));
    let backend = HeadlessBackend::new(HeadlessConfig::with_extent(OUTPUT));
    assert!(matches!(RenderEngine::new(backend, config), Err(RenderError::Config(_))));
}

//! Scene lifecycle tests
//!
//! Tests for:
//! - Order-independent matching of planes to asynchronously loaded sources
//! - Idempotent plane removal without double frees
//! - Rebuilds cancelling stale pending matches
//! - Teardown destroying every texture exactly once

use drape::{
    HeadlessGpu, ImageData, LoadState, PlaneElement, PlaneId, PlaneParams, PlaneState, Scene,
    SceneConfig, SceneEvent,
};

fn scene() -> Scene<HeadlessGpu> {
    Scene::new(HeadlessGpu::new(), SceneConfig::default())
}

fn image(seed: u8) -> ImageData {
    ImageData::solid(2, 2, [seed, seed, seed, 255])
}

fn manual() -> PlaneParams {
    PlaneParams::default().autoload(false)
}

/// Every ordering of `items`.
fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            out.push(tail);
        }
    }
    out
}

/// Sampler name and source label of each slot, as seen by the last draw of
/// `plane`.
fn drawn_samplers(scene: &Scene<HeadlessGpu>, plane: PlaneId) -> Vec<(String, String)> {
    scene
        .gpu()
        .draws()
        .iter()
        .rev()
        .find(|d| d.plane == plane)
        .map(|d| d.samplers.clone())
        .unwrap_or_default()
}

// ============================================================================
// Matching
// ============================================================================

#[test]
fn four_planes_bind_when_sources_load_in_reverse() {
    let mut scene = scene();
    let ids: Vec<PlaneId> = (1..=4)
        .map(|i| {
            let element = PlaneElement::new(format!("plane-{i}")).source(format!("img/{i}.jpg"));
            let id = scene.add_plane(element, &manual()).unwrap();
            assert!(!scene.match_and_bind(id).unwrap());
            id
        })
        .collect();

    for i in (1..=4).rev() {
        scene.source_loaded(&format!("img/{i}.jpg"), image(i as u8));
        scene.tick();
    }
    scene.tick();

    for (i, &id) in ids.iter().enumerate() {
        let plane = scene.plane(id).unwrap();
        assert_eq!(plane.state(), PlaneState::Bound);
        assert!(!plane.has_pending_match());
        assert_eq!(
            drawn_samplers(&scene, id),
            vec![("uSampler0".to_string(), format!("img/{}.jpg", i + 1))]
        );
    }
}

#[test]
fn matching_is_independent_of_load_order() {
    let sources = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "map.png"];
    for order in permutations(&sources) {
        let mut scene = scene();
        let layout = [
            PlaneElement::new("p0").source("a.jpg").sampler_source("uMap", "map.png"),
            PlaneElement::new("p1").source("b.jpg").sampler_source("uMap", "map.png"),
            PlaneElement::new("p2").source("c.jpg"),
            PlaneElement::new("p3").source("d.jpg").source("a.jpg"),
        ];
        let mut ids = Vec::new();
        for (i, element) in layout.iter().cloned().enumerate() {
            // Mix automatic and manual matching.
            let params = if i % 2 == 0 { PlaneParams::default() } else { manual() };
            let id = scene.add_plane(element, &params).unwrap();
            if i % 2 == 1 {
                scene.match_and_bind(id).unwrap();
            }
            ids.push(id);
        }

        for (seed, source) in order.iter().enumerate() {
            scene.source_loaded(source, image(seed as u8));
            scene.tick();
        }
        scene.tick();

        for (element, &id) in layout.iter().zip(&ids) {
            let plane = scene.plane(id).unwrap();
            assert_eq!(plane.state(), PlaneState::Bound, "order {order:?}");
            for (slot, decl) in plane.slots().iter().zip(&element.sources) {
                let resource = scene.registry().get(slot.resource().unwrap()).unwrap();
                assert_eq!(resource.source(), decl.src, "order {order:?}");
                assert_eq!(resource.state(), LoadState::Uploaded);
            }
        }
        // Shared sources are uploaded once.
        assert_eq!(scene.gpu().uploads_of("map.png"), 1);
        assert_eq!(scene.gpu().uploads_of("a.jpg"), 1);
    }
}

#[test]
fn load_progress_is_reported() {
    let mut scene = scene();
    scene
        .add_plane(
            PlaneElement::new("p").source("1.jpg").source("2.jpg"),
            &PlaneParams::default(),
        )
        .unwrap();
    scene.source_loaded("1.jpg", image(1));
    scene.tick();
    scene.source_loaded("2.jpg", image(2));
    scene.tick();

    let progress: Vec<(usize, usize)> = scene
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SceneEvent::SourceUploaded { uploaded, total, .. } => Some((uploaded, total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(1, 2), (2, 2)]);
}

// ============================================================================
// Removal
// ============================================================================

#[test]
fn remove_is_idempotent() {
    let mut scene = scene();
    let params = PlaneParams::default();
    let a = scene
        .add_plane(PlaneElement::new("a").sampler_source("uMap", "map.png"), &params)
        .unwrap();
    let b = scene
        .add_plane(PlaneElement::new("b").sampler_source("uMap", "map.png"), &params)
        .unwrap();
    scene.source_loaded("map.png", image(9));
    scene.tick();
    assert_eq!(scene.gpu().live_geometries(), 2);

    assert!(scene.remove_plane(a).unwrap());
    assert!(!scene.remove_plane(a).unwrap());
    assert_eq!(scene.plane_state(a), Some(PlaneState::Removed));
    assert_eq!(scene.gpu().invalid_frees(), 0);
    assert_eq!(scene.gpu().live_geometries(), 1);

    // The shared map survives and now belongs to the remaining plane.
    let map = scene.registry().find("map.png").unwrap();
    assert_eq!(scene.gpu().live_textures(), 1);
    assert_eq!(scene.registry().get(map).unwrap().owner(), Some(b));

    scene.tick();
    assert_eq!(scene.plane(b).unwrap().state(), PlaneState::Bound);
}

#[test]
fn removed_plane_stops_its_hook_and_pending_match() {
    let mut scene = scene();
    let id = scene
        .add_plane(PlaneElement::new("p").source("never.jpg"), &manual())
        .unwrap();
    scene.match_and_bind(id).unwrap();
    assert!(scene.plane(id).unwrap().has_pending_match());

    scene.remove_plane(id).unwrap();
    scene.source_loaded("never.jpg", image(1));
    scene.tick();

    let resource = scene.registry().find("never.jpg").unwrap();
    assert!(scene.registry().get(resource).unwrap().users().is_empty());
    assert!(scene.registry().get(resource).unwrap().is_orphan());
}

// ============================================================================
// Rebuild
// ============================================================================

#[test]
fn rebuild_cancels_stale_pending_match() {
    let mut scene = scene();
    let stale = scene
        .add_plane(PlaneElement::new("old").source("late.jpg"), &manual())
        .unwrap();
    scene.match_and_bind(stale).unwrap();

    let results = scene.rebuild_scene(
        vec![PlaneElement::new("new").source("fresh.jpg")],
        &PlaneParams::default(),
    );
    assert_eq!(results.len(), 1);
    let fresh = *results[0].as_ref().unwrap();

    scene.source_loaded("late.jpg", image(1));
    scene.source_loaded("fresh.jpg", image(2));
    scene.tick();
    scene.tick();

    let late = scene.registry().find("late.jpg").unwrap();
    assert!(scene.registry().get(late).unwrap().users().is_empty());
    assert_eq!(scene.plane_state(stale), Some(PlaneState::Removed));
    assert_eq!(scene.plane(fresh).unwrap().state(), PlaneState::Bound);
    assert!(
        !scene
            .drain_events()
            .iter()
            .any(|e| *e == SceneEvent::PlaneBound { plane: stale })
    );
}

#[test]
fn rebuild_from_inside_a_tick_skips_already_queued_match() {
    let mut scene = scene();
    scene.schedule(false, |scene, _| {
        scene.rebuild_scene(Vec::new(), &PlaneParams::default());
    });

    let stale = scene
        .add_plane(PlaneElement::new("old").source("late.jpg"), &manual())
        .unwrap();
    scene.match_and_bind(stale).unwrap();
    // The predicate would now succeed, but the rebuild runs first this tick.
    scene.register_source("late.jpg");
    scene.tick();

    let late = scene.registry().find("late.jpg").unwrap();
    assert!(scene.registry().get(late).unwrap().users().is_empty());
    assert_eq!(scene.plane_count(), 0);
}

#[test]
fn one_bad_element_does_not_fail_the_rebuild() {
    let mut scene = scene();
    let results = scene.rebuild_scene(
        vec![
            PlaneElement::new("ok-1"),
            PlaneElement::new("dup")
                .sampler_source("uTex", "a.jpg")
                .sampler_source("uTex", "b.jpg"),
            PlaneElement::new("ok-2"),
        ],
        &PlaneParams::default(),
    );
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
    assert_eq!(scene.plane_count(), 2);
    assert!(
        scene
            .drain_events()
            .contains(&SceneEvent::SceneRebuilt { planes: 2, failed: 1 })
    );
}

#[test]
fn teardown_destroys_every_texture_once() {
    let mut scene = scene();
    let params = PlaneParams::default();
    for i in 0..3 {
        scene
            .add_plane(
                PlaneElement::new(format!("p{i}"))
                    .source(format!("{i}.jpg"))
                    .sampler_source("uMap", "map.png"),
                &params,
            )
            .unwrap();
    }
    // An orphan nobody binds.
    scene.source_loaded("preload.jpg", image(7));
    for (i, src) in ["0.jpg", "1.jpg", "2.jpg", "map.png"].iter().enumerate() {
        scene.source_loaded(src, image(i as u8));
    }
    scene.tick();
    assert_eq!(scene.gpu().live_textures(), 5);

    scene.teardown();
    assert_eq!(scene.gpu().live_textures(), 0);
    assert_eq!(scene.gpu().live_geometries(), 0);
    assert_eq!(scene.gpu().invalid_frees(), 0);
    assert!(scene.registry().is_empty());
}

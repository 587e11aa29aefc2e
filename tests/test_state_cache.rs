//! Multi-frame lifecycle tests for the label state cache.

use std::sync::Arc;

use glam::Vec3;

use cartotext::{
    Icon, LabelShape, LabelStyle, TextElement, TextElementGroup, TextElementState,
    TextElementStateCache, TileKey,
};

const FADE: f64 = 800.0;

fn poi(text: &str, position: Vec3, feature_id: u64) -> TextElement {
    TextElement::new(
        text,
        LabelShape::Poi {
            position,
            icon: None,
        },
        LabelStyle::default(),
    )
    .with_feature_id(feature_id)
}

fn marker(text: &str, points: usize) -> TextElement {
    TextElement::new(
        text,
        LabelShape::LineMarker {
            points: (0..points)
                .map(|i| Vec3::new(i as f32 * 10.0, 0.0, 0.0))
                .collect(),
            icon: Icon::new("dot", 8.0, 8.0),
        },
        LabelStyle::default(),
    )
}

fn accept(_: &TextElement, _: &mut TextElementState) -> Option<f32> {
    Some(100.0)
}

#[test]
fn test_label_lifecycle_appear_linger_evict() {
    let mut cache = TextElementStateCache::new(FADE);
    let group = Arc::new(TextElementGroup::new(1, vec![poi("Alpha", Vec3::ZERO, 1)]));
    let id = group.id();

    // Frame 0: the tile appears, its label starts fading in.
    cache.mark_all_unvisited();
    let (state, found) = cache.get_or_set(group.clone(), TileKey::new(5, 3, 3), &mut accept);
    assert!(!found);
    state.states_mut()[0]
        .text_render_state_mut()
        .start_fade_in(0.0, false);
    cache.update(0.0, false, true, 5.0);

    // Frame 1: same tile still present, fade progresses.
    cache.mark_all_unvisited();
    let (_, found) = cache.get_or_set(group, TileKey::new(5, 3, 3), &mut accept);
    assert!(found);
    cache.update(400.0, false, true, 5.0);
    let mid_opacity = cache
        .get(id)
        .map(|gs| gs.states()[0].text_render_state().opacity())
        .unwrap_or(0.0);
    assert!(mid_opacity > 0.0 && mid_opacity < 1.0);

    // Frame 2: the tile is dropped. The label is mid-fade, so the group
    // must linger in the cache for the fade-out to play.
    cache.mark_all_unvisited();
    if let Some(gs) = cache.get_mut(id) {
        gs.states_mut()[0].text_render_state_mut().start_fade_out(400.0);
    }
    assert!(!cache.update(600.0, false, true, 5.0));
    assert_eq!(cache.len(), 1);
    assert!(cache.any_fading());

    // Frame 3: fade-out completed, the group is evicted.
    cache.mark_all_unvisited();
    assert!(cache.update(5_000.0, false, true, 5.0));
    assert!(cache.is_empty());
    assert!(!cache.any_fading());
}

#[test]
fn test_duplicate_canonicality_follows_rendered_frames() {
    let mut cache = TextElementStateCache::new(FADE);
    let west = Arc::new(TextElementGroup::new(
        1,
        vec![poi("Springfield", Vec3::ZERO, 10)],
    ));
    let east = Arc::new(TextElementGroup::new(
        1,
        vec![poi("Springfield", Vec3::new(20.0, 0.0, 0.0), 10)],
    ));
    let (west_id, east_id) = (west.id(), east.id());
    cache.get_or_set(west, TileKey::new(5, 0, 0), &mut accept);
    cache.get_or_set(east, TileKey::new(5, 1, 0), &mut accept);

    // First cycle: neither rendered yet, the first registration wins.
    assert!(cache.deduplicate_element(5.0, west_id, 0));
    assert!(!cache.deduplicate_element(5.0, east_id, 0));

    // The western instance gets rendered for a few frames.
    if let Some(gs) = cache.get_mut(west_id) {
        gs.states_mut()[0].set_last_frame_rendered(3);
    }

    // Next cycle (update clears the per-frame index): east registers first
    // this time, but west has been rendered more recently and takes over.
    cache.update(16.0, false, true, 5.0);
    assert!(cache.deduplicate_element(5.0, east_id, 0));
    assert!(cache.deduplicate_element(5.0, west_id, 0));
    assert!(cache
        .get(east_id)
        .map(|gs| gs.states()[0].is_duplicate())
        .unwrap_or(false));
}

#[test]
fn test_marker_replacement_matches_by_point_count() {
    let mut cache = TextElementStateCache::new(FADE);
    let old = Arc::new(TextElementGroup::new(1, vec![marker("ferry", 3)]));
    let (state, _) = cache.get_or_set(old, TileKey::new(5, 0, 0), &mut accept);
    for icon_state in state.states_mut()[0].icon_render_states_mut() {
        icon_state.start_fade_in(0.0, false);
        icon_state.update_fading(400.0, false);
    }
    let old_opacity = state.states()[0].icon_render_states()[0].opacity();
    assert!(old_opacity > 0.0);

    // Reload: successor has no feature id in common, but the same number of
    // marker points. Point count is the compatibility criterion for markers.
    cache.mark_all_unvisited();
    let new = Arc::new(TextElementGroup::new(1, vec![marker("ferry", 3)]));
    let new_id = new.id();
    cache.get_or_set(new, TileKey::new(5, 0, 0), &mut accept);
    assert!(cache.replace_element(5.0, new_id, 0));

    let adopted = cache
        .get(new_id)
        .map(|gs| gs.states()[0].icon_render_states()[0].opacity())
        .unwrap_or(0.0);
    assert!((adopted - old_opacity).abs() < 1e-6);

    // A point-count mismatch must not transfer.
    cache.mark_all_unvisited();
    let shrunk = Arc::new(TextElementGroup::new(1, vec![marker("ferry", 2)]));
    let shrunk_id = shrunk.id();
    cache.get_or_set(shrunk, TileKey::new(5, 0, 0), &mut accept);
    assert!(!cache.replace_element(5.0, shrunk_id, 0));
}

#[test]
fn test_clear_render_states_restarts_fades() {
    let mut cache = TextElementStateCache::new(FADE);
    let group = Arc::new(TextElementGroup::new(1, vec![poi("Alpha", Vec3::ZERO, 1)]));
    let id = group.id();
    let (state, _) = cache.get_or_set(group, TileKey::new(5, 0, 0), &mut accept);
    state.states_mut()[0]
        .text_render_state_mut()
        .start_fade_in(0.0, false);
    state.states_mut()[0]
        .text_render_state_mut()
        .update_fading(2_000.0, false);
    assert!(cache.get(id).map(|gs| gs.states()[0].is_visible()).unwrap_or(false));

    cache.clear_render_states();
    assert!(!cache.get(id).map(|gs| gs.states()[0].is_visible()).unwrap_or(true));
    // The group itself stays cached.
    assert_eq!(cache.len(), 1);
}

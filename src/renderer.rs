//! Frame orchestrator tying the label pipeline together.
//!
//! [`TextElementsRenderer`] owns the state cache, the collision index and
//! the projector, and runs the per-frame pipeline: change detection,
//! element update, fade advancement, collision reset, placement of
//! persistent then new labels, and overlay layout. Rendering is delegated
//! to the host through the [`TextCanvas`] and [`PoiRenderer`] traits.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Vec2};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::cache::TextElementStateCache;
use crate::collision::{ScreenCollisions, NO_LABEL_ID};
use crate::element::{GlyphLoadState, LabelKind, LabelShape, LabelStyle, TextElement, TileKey};
use crate::error::{LabelError, LabelResult};
use crate::glyphs::{CharsetStatus, GlyphPlacement, GlyphService, PoiRenderer, TextCanvas};
use crate::group::{TextElementGroup, TextElementState};
use crate::placement::{
    check_ready_for_placement, distance_fade, distance_scale, get_max_view_distance,
    is_path_label_too_small, layout_path_glyphs, place_icon, place_path_label, place_point_label,
    point_label_bounds, PlacementResult, PrePlacementResult, ScratchBuffers,
};
use crate::projection::ScreenProjector;
use crate::stats::PlacementStats;
use crate::tile::TileLabels;
use crate::view_state::ViewState;

/// Default cap on simultaneously placed labels.
pub const DEFAULT_MAX_VISIBLE_LABELS: usize = 500;

/// Candidate count above which the renderer enters overload mode and starts
/// honoring per-frame time budgets.
pub const OVERLOAD_LABEL_LIMIT: usize = 20_000;

/// Update-phase time budget in overload mode, milliseconds.
pub const OVERLOAD_UPDATE_TIME_LIMIT_MS: f64 = 5.0;

/// Placement-phase time budget in overload mode, milliseconds.
pub const OVERLOAD_PLACE_TIME_LIMIT_MS: f64 = 10.0;

/// Cap on label state updates per frame in overload mode.
pub const OVERLOAD_UPDATED_LABEL_LIMIT: usize = 2_000;

/// Half-width in pixels of the collision band reserved around blocking
/// geometry segments.
const BLOCKING_PATH_HALF_WIDTH: f32 = 2.0;

/// Host-tunable renderer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextRendererOptions {
    /// Maximum number of labels placed per frame.
    pub max_visible_labels: usize,
    /// Fade animation duration in milliseconds.
    pub fade_time_ms: f64,
    /// Skip fade animations; labels appear and disappear instantly.
    pub disable_fading: bool,
    /// Candidate count that switches the renderer to overload mode.
    pub overload_label_limit: usize,
    pub overload_update_time_ms: f64,
    pub overload_place_time_ms: f64,
    pub overload_updated_label_limit: usize,
}

impl Default for TextRendererOptions {
    fn default() -> Self {
        Self {
            max_visible_labels: DEFAULT_MAX_VISIBLE_LABELS,
            fade_time_ms: crate::render_state::DEFAULT_FADE_TIME,
            disable_fading: false,
            overload_label_limit: OVERLOAD_LABEL_LIMIT,
            overload_update_time_ms: OVERLOAD_UPDATE_TIME_LIMIT_MS,
            overload_place_time_ms: OVERLOAD_PLACE_TIME_LIMIT_MS,
            overload_updated_label_limit: OVERLOAD_UPDATED_LABEL_LIMIT,
        }
    }
}

impl TextRendererOptions {
    fn validate(&self) -> LabelResult<()> {
        if self.max_visible_labels == 0 {
            return Err(LabelError::option("max_visible_labels must be positive"));
        }
        if self.fade_time_ms < 0.0 {
            return Err(LabelError::option("fade_time_ms must be non-negative"));
        }
        if self.overload_update_time_ms <= 0.0 || self.overload_place_time_ms <= 0.0 {
            return Err(LabelError::option("overload time budgets must be positive"));
        }
        Ok(())
    }
}

/// One rendered icon instance of a placed label.
#[derive(Debug, Clone, Copy)]
pub struct PlacedIcon {
    /// Index into the shape's point list (always 0 for POIs).
    pub point_index: usize,
    pub screen_pos: Vec2,
    pub opacity: f32,
}

/// Screen geometry of a placed label's text.
#[derive(Debug, Clone)]
pub enum PlacedGeometry {
    /// Horizontal text centered on a screen position.
    Point { center: Vec2 },
    /// Text following a projected path, one placement per glyph.
    Path { glyphs: Vec<GlyphPlacement> },
    /// Line marker; text (if any) rides below each placed icon.
    Marker,
}

/// A label that survived placement this frame, ready for rendering and
/// picking.
#[derive(Debug, Clone)]
pub struct PlacedLabel {
    pub group: Arc<TextElementGroup>,
    pub element_index: usize,
    pub geometry: PlacedGeometry,
    /// Screen bounding box used for picking.
    pub bounds: [f32; 4],
    pub scale: f32,
    /// Text opacity after fade and distance attenuation.
    pub opacity: f32,
    pub icons: Vec<PlacedIcon>,
}

impl PlacedLabel {
    pub fn element(&self) -> &TextElement {
        &self.group.elements()[self.element_index]
    }
}

/// One hit returned by [`TextElementsRenderer::pick_text_elements`].
#[derive(Debug, Clone)]
pub struct PickResult {
    pub text: String,
    pub feature_id: Option<u64>,
    pub kind: LabelKind,
    pub bounds: [f32; 4],
}

/// Screen-anchored text drawn on top of the map, bypassing collision
/// handling (attribution, debug readouts).
#[derive(Debug, Clone)]
pub struct OverlayText {
    pub text: String,
    /// Anchor as a fraction of the screen per axis, in [0, 1].
    pub screen_fraction: [f32; 2],
    pub style: LabelStyle,
}

/// Which subset of labels a placement sweep considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlacePass {
    /// Labels visible last frame; placed first so they keep their space.
    PersistentLabels,
    /// Labels becoming visible this frame.
    NewLabels,
}

/// The label placement engine.
pub struct TextElementsRenderer {
    options: TextRendererOptions,
    glyphs: Box<dyn GlyphService>,
    pois: Box<dyn PoiRenderer>,
    cache: TextElementStateCache,
    collisions: ScreenCollisions,
    projector: ScreenProjector,
    scratch: ScratchBuffers,
    stats: PlacementStats,
    placed: Vec<PlacedLabel>,
    overlay: Vec<OverlayText>,
    overlay_placed: Vec<(usize, Vec2)>,
    overloaded: bool,
    camera_moving: bool,
    initialized: bool,
    /// Request a new-labels pass on the next frame even when nothing else
    /// changed (pending glyphs, interrupted budgets, settled camera).
    force_new_labels_pass: bool,
    /// Where the overloaded update walk resumes next frame, so groups past
    /// the budget cutoff are not starved by a walk that always starts at
    /// the first tile.
    overload_cursor: usize,
    last_tile_signature: u64,
    last_view_proj: Mat4,
}

impl TextElementsRenderer {
    pub fn new(
        screen_width: u32,
        screen_height: u32,
        options: TextRendererOptions,
        glyphs: Box<dyn GlyphService>,
        pois: Box<dyn PoiRenderer>,
    ) -> LabelResult<Self> {
        options.validate()?;
        Ok(Self {
            cache: TextElementStateCache::new(options.fade_time_ms),
            collisions: ScreenCollisions::new(screen_width, screen_height),
            projector: ScreenProjector::new(screen_width, screen_height),
            scratch: ScratchBuffers::default(),
            stats: PlacementStats::default(),
            placed: Vec::new(),
            overlay: Vec::new(),
            overlay_placed: Vec::new(),
            overloaded: false,
            camera_moving: false,
            initialized: false,
            force_new_labels_pass: false,
            overload_cursor: 0,
            last_tile_signature: 0,
            last_view_proj: Mat4::ZERO,
            options,
            glyphs,
            pois,
        })
    }

    /// Run the placement pipeline for one frame.
    ///
    /// Skipped entirely when neither the tile set, the camera, nor any fade
    /// animation changed since the last run; the previous frame's placement
    /// stays valid.
    pub fn place_text(&mut self, tiles: &[TileLabels], view: &ViewState) {
        let total: usize = tiles.iter().map(TileLabels::label_count).sum();
        self.overloaded = total > self.options.overload_label_limit;

        let signature = tile_signature(tiles);
        let tiles_changed = !self.initialized
            || signature != self.last_tile_signature
            || tiles.iter().any(|tile| tile.text_changed);
        let camera_changed = view.view_proj != self.last_view_proj;
        let pending_pass = self.force_new_labels_pass;

        if !tiles_changed && !camera_changed && !pending_pass && !self.cache.any_fading() {
            return;
        }

        self.stats.clear();
        self.stats.total = total;
        self.force_new_labels_pass = false;

        let update_start = Instant::now();
        self.update_text_elements(tiles, view, update_start);
        self.stats.update_time_ms = elapsed_ms(update_start);

        let evicted = self
            .cache
            .update(view.time, self.options.disable_fading, true, view.zoom_level);

        let run_new_pass = tiles_changed || camera_changed || pending_pass || evicted;
        let camera_moving = self.camera_moving || view.camera_is_moving;

        self.collisions.reset();
        self.reserve_blocking_geometry(tiles, view);

        let place_start = Instant::now();
        self.placed.clear();
        let sorted = self.cache.sorted_group_ids().to_vec();
        self.place_groups(&sorted, view, PlacePass::PersistentLabels, place_start);
        if run_new_pass {
            if camera_moving {
                // New labels would flicker mid-movement; retry once the
                // camera settles.
                self.force_new_labels_pass = true;
            } else {
                self.place_groups(&sorted, view, PlacePass::NewLabels, place_start);
            }
        }
        self.stats.placement_time_ms = elapsed_ms(place_start);

        self.place_overlay_labels();

        self.last_tile_signature = signature;
        self.last_view_proj = view.view_proj;
        self.initialized = true;
        self.stats.log_debug();
    }

    /// Emit this frame's placed labels and overlays into the host canvas.
    pub fn render_text(&mut self, canvas: &mut dyn TextCanvas) {
        canvas.reset();
        let Self {
            placed,
            pois,
            overlay,
            overlay_placed,
            ..
        } = self;

        for label in placed.iter() {
            let element = label.element();
            let icon_spec = match element.shape() {
                LabelShape::Poi { icon, .. } => icon.as_ref(),
                LabelShape::LineMarker { icon, .. } => Some(icon),
                LabelShape::Path { .. } => None,
            };
            if let Some(icon) = icon_spec {
                for placed_icon in &label.icons {
                    pois.render_poi(icon, placed_icon.screen_pos, label.scale, placed_icon.opacity);
                }
            }

            let result = match &label.geometry {
                PlacedGeometry::Point { center } => {
                    if label.opacity > 0.0 && !element.text.is_empty() {
                        canvas.add_text(
                            &element.text,
                            *center,
                            label.scale,
                            label.opacity,
                            &element.style,
                        )
                    } else {
                        Ok(())
                    }
                }
                PlacedGeometry::Path { glyphs } => {
                    canvas.add_path_text(&element.text, glyphs, label.opacity, &element.style)
                }
                PlacedGeometry::Marker => {
                    let mut result = Ok(());
                    if !element.text.is_empty() {
                        let below = icon_spec
                            .map(|icon| icon.height * label.scale * 0.5)
                            .unwrap_or(0.0)
                            + element.style.size * label.scale * 0.5;
                        for placed_icon in &label.icons {
                            let pos = placed_icon.screen_pos + Vec2::new(0.0, below);
                            result = canvas.add_text(
                                &element.text,
                                pos,
                                label.scale,
                                placed_icon.opacity,
                                &element.style,
                            );
                            if result.is_err() {
                                break;
                            }
                        }
                    }
                    result
                }
            };
            if let Err(err) = result {
                warn!("text canvas capacity reached, dropping remaining labels: {err}");
                return;
            }
        }

        for (index, pos) in overlay_placed.iter() {
            let Some(item) = overlay.get(*index) else {
                continue;
            };
            if let Err(err) = canvas.add_text(&item.text, *pos, 1.0, 1.0, &item.style) {
                warn!("text canvas capacity reached, dropping overlay text: {err}");
                return;
            }
        }
    }

    /// Collect all placed labels whose pick bounds contain `screen_pos`.
    pub fn pick_text_elements(&self, screen_pos: Vec2, results: &mut Vec<PickResult>) {
        for label in &self.placed {
            let [x0, y0, x1, y1] = label.bounds;
            if screen_pos.x < x0 || screen_pos.x > x1 || screen_pos.y < y0 || screen_pos.y > y1 {
                continue;
            }
            let element = label.element();
            results.push(PickResult {
                text: element.text.clone(),
                feature_id: element.feature_id,
                kind: element.kind,
                bounds: label.bounds,
            });
        }
    }

    pub fn add_overlay_text(&mut self, overlay: OverlayText) {
        self.overlay.push(overlay);
    }

    pub fn clear_overlay_text(&mut self) {
        self.overlay.clear();
        self.overlay_placed.clear();
    }

    /// The host signals the start of a camera movement; new labels are held
    /// back until it finishes.
    pub fn movement_started(&mut self) {
        self.camera_moving = true;
    }

    pub fn movement_finished(&mut self) {
        self.camera_moving = false;
        self.force_new_labels_pass = true;
    }

    /// Drop all cached label state. The next frame rebuilds from scratch.
    pub fn invalidate_cache(&mut self) {
        self.cache.clear();
        self.placed.clear();
        self.initialized = false;
    }

    /// Restart every label from a fresh fade-in (e.g. after a theme change).
    pub fn clear_render_states(&mut self) {
        self.cache.clear_render_states();
        self.force_new_labels_pass = true;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.collisions.resize(width, height);
        self.projector.resize(width, height);
        self.force_new_labels_pass = true;
    }

    /// Whether the last frame ran under overload budgets.
    pub fn overloaded(&self) -> bool {
        self.overloaded
    }

    pub fn stats(&self) -> &PlacementStats {
        &self.stats
    }

    /// Labels placed by the last frame, in placement order.
    pub fn placed_labels(&self) -> &[PlacedLabel] {
        &self.placed
    }

    pub fn options(&self) -> &TextRendererOptions {
        &self.options
    }

    /// Walk the renderable tiles, updating or creating cached group states,
    /// then run replacement and deduplication on the results.
    ///
    /// In overload mode the walk resumes where the previous frame's budget
    /// ran out so trailing groups are not starved. Groups the budget skips
    /// stay marked visited with their previous state untouched; their tiles
    /// are still presented, so they must neither fade out nor be evicted.
    fn update_text_elements(&mut self, tiles: &[TileLabels], view: &ViewState, start: Instant) {
        let overloaded = self.overloaded;
        let Self {
            cache,
            glyphs,
            pois,
            stats,
            options,
            force_new_labels_pass,
            overload_cursor,
            ..
        } = self;

        cache.mark_all_unvisited();

        let groups: Vec<(TileKey, &Arc<TextElementGroup>)> = tiles
            .iter()
            .flat_map(|tile| tile.groups.iter().map(move |group| (tile.key, group)))
            .filter(|(_, group)| !group.is_empty())
            .collect();
        if groups.is_empty() {
            *overload_cursor = 0;
            return;
        }
        let first = if overloaded {
            *overload_cursor % groups.len()
        } else {
            0
        };

        let mut updated = 0usize;
        let mut pending = false;
        let mut budget_hit = false;

        for step in 0..groups.len() {
            let index = (first + step) % groups.len();
            let (tile_key, group) = groups[index];

            if overloaded
                && !budget_hit
                && (elapsed_ms(start) > options.overload_update_time_ms
                    || updated > options.overload_updated_label_limit)
            {
                budget_hit = true;
                *overload_cursor = index;
            }
            if budget_hit {
                // Out of budget: the group is deferred, not gone. Keep its
                // cached state as-is and retry from here next frame.
                match cache.get_mut(group.id()) {
                    Some(group_state) => {
                        group_state.set_visited(true);
                        stats.deferred += group_state.size();
                    }
                    None => {
                        stats.deferred += group
                            .elements()
                            .iter()
                            .map(|element| element.shape().point_count())
                            .sum::<usize>();
                    }
                }
                continue;
            }

            let group_id = group.id();
            let mut filter = |element: &TextElement, _state: &mut TextElementState| {
                update_glyph_state(glyphs.as_mut(), element);
                let poi_ready = match element.shape() {
                    LabelShape::Poi {
                        icon: Some(icon), ..
                    } => pois.prepare_render(icon, view.zoom_level),
                    LabelShape::LineMarker { icon, .. } => {
                        pois.prepare_render(icon, view.zoom_level)
                    }
                    _ => true,
                };
                let max_distance = get_max_view_distance(view, element.style.fade_far);
                let (result, distance) = check_ready_for_placement(
                    element,
                    view,
                    glyph_status(element),
                    poi_ready,
                    max_distance,
                );
                match result {
                    PrePlacementResult::Ok => distance,
                    PrePlacementResult::NotReady => {
                        stats.not_ready += 1;
                        pending = true;
                        None
                    }
                    PrePlacementResult::PoiNotRendered => {
                        stats.poi_not_rendered += 1;
                        pending = true;
                        None
                    }
                    PrePlacementResult::NotVisible => {
                        stats.not_visible += 1;
                        None
                    }
                    PrePlacementResult::TooFar => {
                        stats.too_far += 1;
                        None
                    }
                    PrePlacementResult::Duplicate => None,
                }
            };

            let (group_state, found) = cache.get_or_set(group.clone(), tile_key, &mut filter);
            updated += group_state.size();
            let initialized: Vec<usize> = group_state
                .states()
                .iter()
                .filter(|state| state.is_initialized())
                .map(|state| state.element_index())
                .collect();

            if !found {
                // Freshly built group: try to inherit fade state from a
                // reloaded tile's predecessors.
                for index in 0..group.len() {
                    let _ = cache.replace_element(view.zoom_level, group_id, index);
                }
            }
            for index in initialized {
                if !cache.deduplicate_element(view.zoom_level, group_id, index) {
                    stats.duplicates += 1;
                }
            }
        }

        if budget_hit {
            pending = true;
        } else {
            *overload_cursor = 0;
        }
        if pending {
            *force_new_labels_pass = true;
        }
    }

    /// Reserve collision bands along blocking geometry before any label is
    /// placed.
    fn reserve_blocking_geometry(&mut self, tiles: &[TileLabels], view: &ViewState) {
        let Self {
            collisions,
            projector,
            scratch,
            ..
        } = self;
        for tile in tiles {
            for path in &tile.blocking_paths {
                if projector.project_path(path, view.view_proj, &mut scratch.projected_path) < 2 {
                    continue;
                }
                for pair in scratch.projected_path.windows(2) {
                    let (Some(a), Some(b)) = (pair[0], pair[1]) else {
                        continue;
                    };
                    collisions.reserve(
                        NO_LABEL_ID,
                        [
                            a.x.min(b.x) - BLOCKING_PATH_HALF_WIDTH,
                            a.y.min(b.y) - BLOCKING_PATH_HALF_WIDTH,
                            a.x.max(b.x) + BLOCKING_PATH_HALF_WIDTH,
                            a.y.max(b.y) + BLOCKING_PATH_HALF_WIDTH,
                        ],
                    );
                }
            }
        }
    }

    /// One placement sweep over all cached groups in priority order.
    fn place_groups(
        &mut self,
        sorted: &[crate::element::GroupId],
        view: &ViewState,
        pass: PlacePass,
        start: Instant,
    ) {
        let overloaded = self.overloaded;
        let Self {
            cache,
            collisions,
            projector,
            scratch,
            placed,
            stats,
            options,
            force_new_labels_pass,
            ..
        } = self;

        for id in sorted {
            if placed.len() >= options.max_visible_labels {
                break;
            }
            if overloaded && elapsed_ms(start) > options.overload_place_time_ms {
                *force_new_labels_pass = true;
                break;
            }
            let Some(group_state) = cache.get_mut(*id) else {
                continue;
            };
            let group = group_state.group().clone();
            let visited = group_state.visited();
            for state in group_state.states_mut() {
                if placed.len() >= options.max_visible_labels {
                    break;
                }
                place_element(
                    &group, state, visited, pass, view, options, collisions, projector, scratch,
                    placed, stats,
                );
            }
        }
    }

    fn place_overlay_labels(&mut self) {
        self.overlay_placed.clear();
        let size = self.projector.screen_size();
        for (index, overlay) in self.overlay.iter().enumerate() {
            let pos = Vec2::new(
                overlay.screen_fraction[0] * size.x,
                overlay.screen_fraction[1] * size.y,
            );
            self.overlay_placed.push((index, pos));
        }
    }
}

/// Place (or fade out) one label for one sweep.
fn place_element(
    group: &Arc<TextElementGroup>,
    state: &mut TextElementState,
    group_visited: bool,
    pass: PlacePass,
    view: &ViewState,
    options: &TextRendererOptions,
    collisions: &mut ScreenCollisions,
    projector: &ScreenProjector,
    scratch: &mut ScratchBuffers,
    placed: &mut Vec<PlacedLabel>,
    stats: &mut PlacementStats,
) {
    let element = &group.elements()[state.element_index()];
    let time = view.time;
    let disable_fading = options.disable_fading;

    if state.is_duplicate() {
        if state.is_visible() {
            fade_out(state, time);
            render_fading_remnant(group, state, view, projector, scratch, placed);
        }
        return;
    }

    let eligible = group_visited && state.is_initialized();
    let visible = state.is_visible();
    match pass {
        PlacePass::PersistentLabels if !visible => return,
        PlacePass::NewLabels if visible || !eligible => return,
        _ => {}
    }

    if !eligible {
        // Tile gone, or the label fell out of its zoom/distance window:
        // fade out in place, keep drawing until the fade completes.
        fade_out(state, time);
        render_fading_remnant(group, state, view, projector, scratch, placed);
        return;
    }

    let (scale, fade) = label_metrics(element, state, view);
    let collision_id = placed.len() as u64;

    match element.shape() {
        LabelShape::Poi { position, icon } => {
            let Some((anchor, _depth)) = projector.project(*position, view.view_proj) else {
                stats.invisible += 1;
                fade_out(state, time);
                return;
            };

            let mut icons = Vec::new();
            if let Some(icon_spec) = icon {
                let icon_result = place_icon(icon_spec, anchor, scale, collisions, collision_id);
                if let Some(render_state) = state.icon_render_states_mut().first_mut() {
                    match icon_result {
                        PlacementResult::Ok => render_state.start_fade_in(time, disable_fading),
                        _ => render_state.start_fade_out(time),
                    }
                    let opacity = render_state.opacity() * fade;
                    if opacity > 0.0 {
                        icons.push(PlacedIcon {
                            point_index: 0,
                            screen_pos: anchor,
                            opacity,
                        });
                    }
                }
            }

            let text_result = if element.text.is_empty() {
                PlacementResult::Invisible
            } else {
                place_point_label(
                    element,
                    state.layout_state_mut(),
                    anchor,
                    scale,
                    collisions,
                    collision_id,
                )
            };
            match text_result {
                PlacementResult::Ok => {
                    state
                        .text_render_state_mut()
                        .start_fade_in(time, disable_fading);
                    stats.placed += 1;
                }
                PlacementResult::Rejected => {
                    state.text_render_state_mut().start_fade_out(time);
                    stats.rejected += 1;
                }
                PlacementResult::Invisible => {
                    state.text_render_state_mut().start_fade_out(time);
                    if !element.text.is_empty() {
                        stats.invisible += 1;
                    }
                }
            }

            let opacity = state.text_render_state().opacity() * fade;
            if opacity <= 0.0 && icons.is_empty() {
                return;
            }
            let (bounds, center) =
                point_label_bounds(element, state.layout_state().placement(), anchor, scale);
            state.set_last_frame_rendered(view.frame_number);
            placed.push(PlacedLabel {
                group: group.clone(),
                element_index: state.element_index(),
                geometry: PlacedGeometry::Point { center },
                bounds,
                scale,
                opacity,
                icons,
            });
        }

        LabelShape::Path { .. } => {
            if is_path_label_too_small(element, projector, view, scratch) {
                // Structurally unusable at this view; drop the fade so a
                // later zoom-in starts fresh.
                state.text_render_state_mut().reset();
                stats.invisible += 1;
                return;
            }
            let result = place_path_label(element, scale, collisions, collision_id, scratch);
            match result {
                PlacementResult::Ok => {
                    state
                        .text_render_state_mut()
                        .start_fade_in(time, disable_fading);
                    stats.placed += 1;
                }
                PlacementResult::Rejected => {
                    state.text_render_state_mut().start_fade_out(time);
                    stats.rejected += 1;
                }
                PlacementResult::Invisible => {
                    state.text_render_state_mut().start_fade_out(time);
                    stats.invisible += 1;
                }
            }

            let opacity = state.text_render_state().opacity() * fade;
            if result != PlacementResult::Invisible && opacity > 0.0 {
                if let Some(bounds) = glyph_bounds(&scratch.glyph_boxes) {
                    state.set_last_frame_rendered(view.frame_number);
                    placed.push(PlacedLabel {
                        group: group.clone(),
                        element_index: state.element_index(),
                        geometry: PlacedGeometry::Path {
                            glyphs: scratch.glyph_placements.clone(),
                        },
                        bounds,
                        scale,
                        opacity,
                        icons: Vec::new(),
                    });
                }
            }
        }

        LabelShape::LineMarker { points, icon } => {
            let mut icons = Vec::new();
            let mut bounds: Option<[f32; 4]> = None;
            let mut any_placed = false;
            for (index, point) in points.iter().enumerate() {
                let projected = projector.project(*point, view.view_proj);
                let Some(render_state) = state.icon_render_states_mut().get_mut(index) else {
                    continue;
                };
                let Some((pos, _depth)) = projected else {
                    render_state.start_fade_out(time);
                    continue;
                };
                let result = place_icon(icon, pos, scale, collisions, collision_id);
                match result {
                    PlacementResult::Ok => {
                        render_state.start_fade_in(time, disable_fading);
                        any_placed = true;
                    }
                    _ => render_state.start_fade_out(time),
                }
                let opacity = render_state.opacity() * fade;
                if opacity > 0.0 {
                    icons.push(PlacedIcon {
                        point_index: index,
                        screen_pos: pos,
                        opacity,
                    });
                    let half_w = icon.width * scale * 0.5;
                    let half_h = icon.height * scale * 0.5;
                    merge_bounds(
                        &mut bounds,
                        [pos.x - half_w, pos.y - half_h, pos.x + half_w, pos.y + half_h],
                    );
                }
            }
            if any_placed {
                stats.placed += 1;
            }
            let Some(bounds) = bounds else {
                return;
            };
            state.set_last_frame_rendered(view.frame_number);
            placed.push(PlacedLabel {
                group: group.clone(),
                element_index: state.element_index(),
                geometry: PlacedGeometry::Marker,
                bounds,
                scale,
                opacity: fade,
                icons,
            });
        }
    }
}

/// Keep drawing a label that is no longer a placement candidate while its
/// fade-out runs. No collision space is taken.
fn render_fading_remnant(
    group: &Arc<TextElementGroup>,
    state: &mut TextElementState,
    view: &ViewState,
    projector: &ScreenProjector,
    scratch: &mut ScratchBuffers,
    placed: &mut Vec<PlacedLabel>,
) {
    let element = &group.elements()[state.element_index()];
    let (scale, fade) = label_metrics(element, state, view);

    match element.shape() {
        LabelShape::Poi { position, icon } => {
            let Some((anchor, _depth)) = projector.project(*position, view.view_proj) else {
                return;
            };
            let opacity = state.text_render_state().opacity() * fade;
            let mut icons = Vec::new();
            if icon.is_some() {
                if let Some(render_state) = state.icon_render_states().first() {
                    let icon_opacity = render_state.opacity() * fade;
                    if icon_opacity > 0.0 {
                        icons.push(PlacedIcon {
                            point_index: 0,
                            screen_pos: anchor,
                            opacity: icon_opacity,
                        });
                    }
                }
            }
            if opacity <= 0.0 && icons.is_empty() {
                return;
            }
            let (bounds, center) =
                point_label_bounds(element, state.layout_state().placement(), anchor, scale);
            placed.push(PlacedLabel {
                group: group.clone(),
                element_index: state.element_index(),
                geometry: PlacedGeometry::Point { center },
                bounds,
                scale,
                opacity,
                icons,
            });
        }

        LabelShape::Path { .. } => {
            let opacity = state.text_render_state().opacity() * fade;
            if opacity <= 0.0 {
                return;
            }
            if is_path_label_too_small(element, projector, view, scratch) {
                return;
            }
            if !layout_path_glyphs(element, scale, scratch) {
                return;
            }
            let Some(bounds) = glyph_bounds(&scratch.glyph_boxes) else {
                return;
            };
            placed.push(PlacedLabel {
                group: group.clone(),
                element_index: state.element_index(),
                geometry: PlacedGeometry::Path {
                    glyphs: scratch.glyph_placements.clone(),
                },
                bounds,
                scale,
                opacity,
                icons: Vec::new(),
            });
        }

        LabelShape::LineMarker { points, icon } => {
            let mut icons = Vec::new();
            let mut bounds: Option<[f32; 4]> = None;
            for (index, point) in points.iter().enumerate() {
                let Some(render_state) = state.icon_render_states().get(index) else {
                    continue;
                };
                let opacity = render_state.opacity() * fade;
                if opacity <= 0.0 {
                    continue;
                }
                let Some((pos, _depth)) = projector.project(*point, view.view_proj) else {
                    continue;
                };
                icons.push(PlacedIcon {
                    point_index: index,
                    screen_pos: pos,
                    opacity,
                });
                let half_w = icon.width * scale * 0.5;
                let half_h = icon.height * scale * 0.5;
                merge_bounds(
                    &mut bounds,
                    [pos.x - half_w, pos.y - half_h, pos.x + half_w, pos.y + half_h],
                );
            }
            let Some(bounds) = bounds else {
                return;
            };
            placed.push(PlacedLabel {
                group: group.clone(),
                element_index: state.element_index(),
                geometry: PlacedGeometry::Marker,
                bounds,
                scale,
                opacity: fade,
                icons,
            });
        }
    }
}

/// Distance-derived scale and fade factors for one label.
fn label_metrics(element: &TextElement, state: &TextElementState, view: &ViewState) -> (f32, f32) {
    let view_distance = state.view_distance().unwrap_or(view.look_at_distance);
    let max_view_distance = get_max_view_distance(view, element.style.fade_far);
    let scale = distance_scale(
        view_distance,
        view.look_at_distance,
        max_view_distance,
        element.style.distance_scale_near,
        element.style.distance_scale_far,
    );
    let fade = distance_fade(
        view_distance,
        max_view_distance,
        element.style.fade_near,
        element.style.fade_far,
    );
    (scale, fade)
}

fn fade_out(state: &mut TextElementState, time: f64) {
    state.text_render_state_mut().start_fade_out(time);
    for icon in state.icon_render_states_mut() {
        icon.start_fade_out(time);
    }
}

/// Advance the lazily tracked glyph load state of one label, requesting the
/// charset on first sight and recording the measured width once ready.
fn update_glyph_state(glyphs: &mut dyn GlyphService, element: &TextElement) {
    match element.glyph_state() {
        GlyphLoadState::NotRequested => {
            glyphs.request_charset(&element.text, &element.style);
            element.set_glyph_state(GlyphLoadState::Requested);
        }
        GlyphLoadState::Requested => {}
        GlyphLoadState::Ready | GlyphLoadState::Failed => return,
    }
    match glyphs.charset_status(&element.text, &element.style) {
        CharsetStatus::Ready => {
            if element.text_width().is_none() {
                if let Some(measurement) = glyphs.measure_text(&element.text, &element.style) {
                    element.set_text_width(measurement.width);
                }
            }
            element.set_glyph_state(GlyphLoadState::Ready);
        }
        CharsetStatus::Failed => element.set_glyph_state(GlyphLoadState::Failed),
        CharsetStatus::Loading => {}
    }
}

fn glyph_status(element: &TextElement) -> CharsetStatus {
    match element.glyph_state() {
        GlyphLoadState::Ready => CharsetStatus::Ready,
        GlyphLoadState::Failed => CharsetStatus::Failed,
        GlyphLoadState::NotRequested | GlyphLoadState::Requested => CharsetStatus::Loading,
    }
}

/// Hash of the identity of the presented tile/group set, for cheap
/// frame-over-frame change detection.
fn tile_signature(tiles: &[TileLabels]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for tile in tiles {
        tile.key.hash(&mut hasher);
        for group in &tile.groups {
            group.id().hash(&mut hasher);
        }
    }
    hasher.finish()
}

fn glyph_bounds(boxes: &[[f32; 4]]) -> Option<[f32; 4]> {
    let mut bounds = *boxes.first()?;
    for item in &boxes[1..] {
        bounds[0] = bounds[0].min(item[0]);
        bounds[1] = bounds[1].min(item[1]);
        bounds[2] = bounds[2].max(item[2]);
        bounds[3] = bounds[3].max(item[3]);
    }
    Some(bounds)
}

fn merge_bounds(acc: &mut Option<[f32; 4]>, bounds: [f32; 4]) {
    match acc {
        None => *acc = Some(bounds),
        Some(current) => {
            current[0] = current[0].min(bounds[0]);
            current[1] = current[1].min(bounds[1]);
            current[2] = current[2].max(bounds[2]);
            current[3] = current[3].max(bounds[3]);
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Icon, TileKey};
    use crate::glyphs::GlyphMeasurement;
    use glam::Vec3;

    struct InstantGlyphs;

    impl GlyphService for InstantGlyphs {
        fn request_charset(&mut self, _text: &str, _style: &LabelStyle) {}

        fn charset_status(&self, _text: &str, _style: &LabelStyle) -> CharsetStatus {
            CharsetStatus::Ready
        }

        fn measure_text(&self, text: &str, style: &LabelStyle) -> Option<GlyphMeasurement> {
            Some(GlyphMeasurement {
                width: text.chars().count() as f32 * style.size * 0.5,
                height: style.size,
            })
        }
    }

    struct ReadyPois;

    impl PoiRenderer for ReadyPois {
        fn prepare_render(&mut self, _icon: &Icon, _zoom_level: f32) -> bool {
            true
        }

        fn render_poi(&mut self, _icon: &Icon, _pos: Vec2, _scale: f32, _opacity: f32) {}
    }

    fn renderer() -> TextElementsRenderer {
        let options = TextRendererOptions {
            disable_fading: true,
            ..TextRendererOptions::default()
        };
        TextElementsRenderer::new(
            800,
            600,
            options,
            Box::new(InstantGlyphs),
            Box::new(ReadyPois),
        )
        .expect("valid options")
    }

    fn poi_tile(texts: &[(&str, Vec3)]) -> TileLabels {
        let elements = texts
            .iter()
            .map(|(text, position)| {
                TextElement::new(
                    *text,
                    LabelShape::Poi {
                        position: *position,
                        icon: None,
                    },
                    LabelStyle::default(),
                )
            })
            .collect();
        let group = Arc::new(TextElementGroup::new(1, elements));
        let mut tile = TileLabels::new(TileKey::new(10, 1, 1), vec![group]);
        tile.text_changed = false;
        tile
    }

    #[test]
    fn test_options_validation() {
        assert!(TextRendererOptions::default().validate().is_ok());
        let bad = TextRendererOptions {
            max_visible_labels: 0,
            ..TextRendererOptions::default()
        };
        assert!(matches!(bad.validate(), Err(LabelError::InvalidOption(_))));
    }

    #[test]
    fn test_options_serde_round_trip() {
        let options = TextRendererOptions {
            max_visible_labels: 250,
            fade_time_ms: 400.0,
            ..TextRendererOptions::default()
        };
        let json = serde_json::to_string(&options).expect("serialize");
        let back: TextRendererOptions = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.max_visible_labels, 250);
        assert!((back.fade_time_ms - 400.0).abs() < 1e-9);
        // Omitted fields fall back to defaults.
        let sparse: TextRendererOptions =
            serde_json::from_str(r#"{"disable_fading":true}"#).expect("deserialize");
        assert!(sparse.disable_fading);
        assert_eq!(sparse.max_visible_labels, DEFAULT_MAX_VISIBLE_LABELS);
    }

    #[test]
    fn test_single_poi_is_placed() {
        let mut renderer = renderer();
        let tiles = vec![poi_tile(&[("Berlin", Vec3::ZERO)])];
        renderer.place_text(&tiles, &ViewState::default());

        assert_eq!(renderer.placed_labels().len(), 1);
        assert_eq!(renderer.stats().placed, 1);
        let label = &renderer.placed_labels()[0];
        assert!((label.opacity - 1.0).abs() < 1e-6);
        // Identity projection centers the origin on screen.
        let PlacedGeometry::Point { center } = &label.geometry else {
            panic!("point label expected");
        };
        assert!((center.x - 400.0).abs() < 1.0);
        assert!((center.y - 300.0).abs() < 1.0);
    }

    #[test]
    fn test_colliding_poi_is_rejected() {
        let mut renderer = renderer();
        // Same anchor, distinct texts so deduplication stays out of the way.
        let tiles = vec![poi_tile(&[("Berlin", Vec3::ZERO), ("Potsdam", Vec3::ZERO)])];
        renderer.place_text(&tiles, &ViewState::default());

        assert_eq!(renderer.placed_labels().len(), 1);
        assert_eq!(renderer.stats().placed, 1);
        assert_eq!(renderer.stats().rejected, 1);
    }

    #[test]
    fn test_unchanged_frame_is_skipped() {
        let mut renderer = renderer();
        let tiles = vec![poi_tile(&[("Berlin", Vec3::ZERO)])];
        let view = ViewState::default();
        renderer.place_text(&tiles, &view);
        let placed = renderer.placed_labels().len();

        // Same tiles, same camera, no fades pending: previous placement
        // stays valid.
        let view = ViewState {
            frame_number: 1,
            time: 16.0,
            ..ViewState::default()
        };
        renderer.place_text(&tiles, &view);
        assert_eq!(renderer.placed_labels().len(), placed);
    }

    #[test]
    fn test_tile_signature_tracks_group_identity() {
        let a = poi_tile(&[("Berlin", Vec3::ZERO)]);
        let b = poi_tile(&[("Berlin", Vec3::ZERO)]);
        let sig_a = tile_signature(std::slice::from_ref(&a));
        assert_eq!(sig_a, tile_signature(std::slice::from_ref(&a)));
        assert_ne!(sig_a, tile_signature(std::slice::from_ref(&b)));
    }

    #[test]
    fn test_pick_hits_placed_label() {
        let mut renderer = renderer();
        let tiles = vec![poi_tile(&[("Berlin", Vec3::ZERO)])];
        renderer.place_text(&tiles, &ViewState::default());

        let mut results = Vec::new();
        renderer.pick_text_elements(Vec2::new(400.0, 300.0), &mut results);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "Berlin");

        results.clear();
        renderer.pick_text_elements(Vec2::new(10.0, 10.0), &mut results);
        assert!(results.is_empty());
    }

    #[test]
    fn test_overlay_layout() {
        let mut renderer = renderer();
        renderer.add_overlay_text(OverlayText {
            text: "© demo data".to_string(),
            screen_fraction: [0.5, 1.0],
            style: LabelStyle::default(),
        });
        renderer.place_text(&[poi_tile(&[("a", Vec3::ZERO)])], &ViewState::default());
        assert_eq!(renderer.overlay_placed.len(), 1);
        let (_, pos) = renderer.overlay_placed[0];
        assert!((pos.x - 400.0).abs() < 1e-3);
        assert!((pos.y - 600.0).abs() < 1e-3);
    }
}

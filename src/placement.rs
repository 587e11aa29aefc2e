//! Placement algorithms.
//!
//! Pure functions deciding where (and whether) a label fits this frame:
//! early rejection by zoom/distance/readiness, collision-tested screen
//! placement for point, path and icon labels, and the geometry helpers that
//! make view distances comparable.

use glam::{Vec2, Vec3};

use crate::collision::ScreenCollisions;
use crate::element::{Icon, LabelShape, TextElement};
use crate::glyphs::{CharsetStatus, GlyphPlacement};
use crate::layout::LayoutState;
use crate::projection::ScreenProjector;
use crate::view_state::ViewState;

/// A path label is rejected when its text would cover more than this share
/// of the projected path.
pub const PATH_SHRINK_LIMIT: f32 = 0.9;

/// Clearance in pixels between an anchor point and an offset text box.
pub const PLACEMENT_MARGIN: f32 = 2.0;

/// Early-rejection verdict for a candidate label, before any collision test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrePlacementResult {
    Ok,
    /// Glyphs still loading; retry next frame.
    NotReady,
    /// Outside the zoom range or its kind is hidden.
    NotVisible,
    /// Beyond the maximum view distance.
    TooFar,
    /// Suppressed by cross-tile deduplication (decided by the cache step).
    Duplicate,
    /// The POI icon is not renderable yet.
    PoiNotRendered,
}

/// Outcome of a collision-tested placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementResult {
    Ok,
    /// On screen but colliding with higher-priority content.
    Rejected,
    /// Off screen or behind the camera.
    Invisible,
}

/// Reusable scratch space owned by the orchestrator, passed by reference to
/// keep per-frame heap churn down.
#[derive(Debug, Default)]
pub struct ScratchBuffers {
    pub projected_path: Vec<Option<Vec2>>,
    pub screen_path: Vec<Vec2>,
    pub glyph_boxes: Vec<[f32; 4]>,
    pub glyph_placements: Vec<GlyphPlacement>,
}

impl ScratchBuffers {
    pub fn clear(&mut self) {
        self.projected_path.clear();
        self.screen_path.clear();
        self.glyph_boxes.clear();
        self.glyph_placements.clear();
    }
}

/// Early-rejection gate. Computes the view distance only when the candidate
/// is not already rejected.
pub fn check_ready_for_placement(
    element: &TextElement,
    view: &ViewState,
    glyph_status: CharsetStatus,
    poi_ready: bool,
    max_view_distance: f32,
) -> (PrePlacementResult, Option<f32>) {
    if view.is_kind_hidden(element.kind) {
        return (PrePlacementResult::NotVisible, None);
    }
    if view.zoom_level < element.style.min_zoom || view.zoom_level > element.style.max_zoom {
        return (PrePlacementResult::NotVisible, None);
    }
    match glyph_status {
        CharsetStatus::Loading => return (PrePlacementResult::NotReady, None),
        CharsetStatus::Failed => return (PrePlacementResult::NotVisible, None),
        CharsetStatus::Ready => {}
    }
    if !poi_ready {
        return (PrePlacementResult::PoiNotRendered, None);
    }
    let distance = compute_view_distance(view.eye, element);
    if distance > max_view_distance {
        return (PrePlacementResult::TooFar, Some(distance));
    }
    (PrePlacementResult::Ok, Some(distance))
}

/// Camera-to-label distance used for ordering and distance fades.
pub fn compute_view_distance(eye: Vec3, element: &TextElement) -> f32 {
    match element.shape() {
        LabelShape::Poi { position, .. } => eye.distance(*position),
        LabelShape::Path { path } => {
            // The middle of the path is the most stable representative.
            path.get(path.len() / 2)
                .map(|p| eye.distance(*p))
                .unwrap_or(f32::MAX)
        }
        LabelShape::LineMarker { points, .. } => points
            .iter()
            .map(|p| eye.distance(*p))
            .fold(f32::MAX, f32::min),
    }
}

/// Largest comparable view distance for a label with the given fade-far
/// ratio.
pub fn get_max_view_distance(view: &ViewState, fade_far: f32) -> f32 {
    view.max_visibility_distance * fade_far.max(0.0)
}

/// Scale factor shrinking labels with camera distance, interpolating from
/// `distance_scale_near` at the look-at distance to `distance_scale_far` at
/// the maximum view distance.
pub fn distance_scale(
    view_distance: f32,
    look_at_distance: f32,
    max_view_distance: f32,
    scale_near: f32,
    scale_far: f32,
) -> f32 {
    if max_view_distance <= look_at_distance {
        return scale_near;
    }
    let t = ((view_distance - look_at_distance) / (max_view_distance - look_at_distance))
        .clamp(0.0, 1.0);
    scale_near + (scale_far - scale_near) * t
}

/// Opacity attenuation between the fade-near and fade-far distances.
pub fn distance_fade(view_distance: f32, max_view_distance: f32, fade_near: f32, fade_far: f32) -> f32 {
    let near = max_view_distance * fade_near;
    let far = max_view_distance * fade_far;
    if view_distance <= near || far <= near {
        return 1.0;
    }
    if view_distance >= far {
        return 0.0;
    }
    1.0 - (view_distance - near) / (far - near)
}

/// Project a path label's polyline and reject it when the projected span
/// cannot fit the measured text.
pub fn is_path_label_too_small(
    element: &TextElement,
    projector: &ScreenProjector,
    view: &ViewState,
    scratch: &mut ScratchBuffers,
) -> bool {
    let LabelShape::Path { path } = element.shape() else {
        return false;
    };
    let visible = projector.project_path(path, view.view_proj, &mut scratch.projected_path);
    if visible < 2 {
        return true;
    }
    scratch.screen_path.clear();
    scratch
        .screen_path
        .extend(scratch.projected_path.iter().filter_map(|p| *p));

    let span = path_length(&scratch.screen_path);
    let text_width = element.text_width().unwrap_or(0.0);
    text_width > span * PATH_SHRINK_LIMIT
}

/// Screen box of a point label's text for one anchor placement. Returns the
/// bounds and the box center.
pub fn point_label_bounds(
    element: &TextElement,
    placement: crate::layout::TextPlacement,
    anchor: Vec2,
    scale: f32,
) -> ([f32; 4], Vec2) {
    let width = element.text_width().unwrap_or(0.0) * scale;
    let height = element.style.size * scale;
    let offset = Vec2::new(element.style.offset[0], element.style.offset[1]);
    let center = anchor + offset + placement.box_offset(width, height, PLACEMENT_MARGIN);
    (
        [
            center.x - width * 0.5,
            center.y - height * 0.5,
            center.x + width * 0.5,
            center.y + height * 0.5,
        ],
        center,
    )
}

/// Attempt to reserve screen space for a point label, trying the current
/// anchor placement first and falling back to the style's alternatives.
pub fn place_point_label(
    element: &TextElement,
    layout: &mut LayoutState,
    anchor: Vec2,
    scale: f32,
    collisions: &mut ScreenCollisions,
    collision_id: u64,
) -> PlacementResult {
    let current = layout.placement();
    let mut any_on_screen = false;

    let candidates = std::iter::once(current).chain(
        element
            .style
            .placements
            .iter()
            .copied()
            .filter(move |p| *p != current),
    );

    for placement in candidates {
        let (bounds, _center) = point_label_bounds(element, placement, anchor, scale);
        if !collisions.is_on_screen(bounds) {
            continue;
        }
        any_on_screen = true;
        if element.may_overlap || element.always_on_top {
            if element.reserve_space {
                collisions.reserve(collision_id, bounds);
            }
            layout.set_placement(placement);
            return PlacementResult::Ok;
        }
        if collisions.allocate(collision_id, bounds) {
            layout.set_placement(placement);
            return PlacementResult::Ok;
        }
    }

    if any_on_screen {
        PlacementResult::Rejected
    } else {
        PlacementResult::Invisible
    }
}

/// Lay the glyphs of a path label along `scratch.screen_path`, filling
/// `scratch.glyph_placements` and `scratch.glyph_boxes` (one box per glyph).
/// Returns `false` when the text cannot fit the projected span.
pub fn layout_path_glyphs(
    element: &TextElement,
    scale: f32,
    scratch: &mut ScratchBuffers,
) -> bool {
    scratch.glyph_placements.clear();
    scratch.glyph_boxes.clear();

    if scratch.screen_path.len() < 2 || element.text.is_empty() {
        return false;
    }

    let span = path_length(&scratch.screen_path);
    let advances = glyph_advances(&element.text, element.style.size * scale, element.text_width());
    let text_width: f32 = advances.iter().sum();
    if text_width > span * PATH_SHRINK_LIMIT {
        return false;
    }

    let glyph_height = element.style.size * scale;
    let start_offset = (span - text_width) * 0.5;
    let mut offset = start_offset;
    for advance in &advances {
        // The offset grows monotonically; a failed sample means the fit
        // broke down.
        let Some((pos, tangent)) =
            sample_path_at_offset(&scratch.screen_path, offset + advance * 0.5)
        else {
            return false;
        };
        let rotation = upright_rotation(tangent);
        scratch.glyph_placements.push(GlyphPlacement {
            screen_pos: pos,
            rotation,
            scale,
        });
        let half = (advance.max(glyph_height)) * 0.5;
        scratch
            .glyph_boxes
            .push([pos.x - half, pos.y - half, pos.x + half, pos.y + half]);
        offset += advance;
    }
    true
}

/// Attempt to place a path label along its projected polyline (read from
/// `scratch.screen_path`), reserving a swept region of per-glyph boxes.
/// `scratch.glyph_placements` holds the resulting glyph layout on success.
pub fn place_path_label(
    element: &TextElement,
    scale: f32,
    collisions: &mut ScreenCollisions,
    collision_id: u64,
    scratch: &mut ScratchBuffers,
) -> PlacementResult {
    if !layout_path_glyphs(element, scale, scratch) {
        return PlacementResult::Invisible;
    }

    if element.may_overlap {
        if element.reserve_space {
            for bounds in &scratch.glyph_boxes {
                collisions.reserve(collision_id, *bounds);
            }
        }
        return PlacementResult::Ok;
    }

    // Test the whole sweep before reserving anything so a failed placement
    // leaves the index untouched.
    for bounds in &scratch.glyph_boxes {
        if collisions.is_allocated(*bounds) {
            return PlacementResult::Rejected;
        }
    }
    for bounds in &scratch.glyph_boxes {
        collisions.reserve(collision_id, *bounds);
    }
    PlacementResult::Ok
}

/// Reserve a fixed-size screen box for a POI icon. Evaluated before the text
/// so text-only placement can consult the icon's acceptance.
pub fn place_icon(
    icon: &Icon,
    screen_pos: Vec2,
    scale: f32,
    collisions: &mut ScreenCollisions,
    collision_id: u64,
) -> PlacementResult {
    let half_w = icon.width * scale * 0.5;
    let half_h = icon.height * scale * 0.5;
    let bounds = [
        screen_pos.x - half_w,
        screen_pos.y - half_h,
        screen_pos.x + half_w,
        screen_pos.y + half_h,
    ];
    if !collisions.is_on_screen(bounds) {
        return PlacementResult::Invisible;
    }
    if icon.may_overlap {
        if icon.reserve_space {
            collisions.reserve(collision_id, bounds);
        }
        return PlacementResult::Ok;
    }
    if collisions.allocate(collision_id, bounds) {
        PlacementResult::Ok
    } else {
        PlacementResult::Rejected
    }
}

/// Total polyline length in screen pixels.
pub fn path_length(points: &[Vec2]) -> f32 {
    points
        .windows(2)
        .map(|pair| pair[0].distance(pair[1]))
        .sum()
}

/// Sample position and tangent angle at an arc-length offset along a path.
pub fn sample_path_at_offset(points: &[Vec2], offset: f32) -> Option<(Vec2, f32)> {
    if points.len() < 2 || offset < 0.0 {
        return None;
    }
    let mut accumulated = 0.0;
    for pair in points.windows(2) {
        let delta = pair[1] - pair[0];
        let segment = delta.length();
        if accumulated + segment >= offset {
            let t = (offset - accumulated) / segment.max(1e-3);
            return Some((pair[0] + delta * t, delta.y.atan2(delta.x)));
        }
        accumulated += segment;
    }
    // Past the end of the path.
    let last = points.len() - 1;
    let delta = points[last] - points[last - 1];
    Some((points[last], delta.y.atan2(delta.x)))
}

/// Per-glyph advances. Uses the measured total width when available,
/// distributed by a per-character width heuristic; falls back to the
/// heuristic alone.
pub fn glyph_advances(text: &str, font_size: f32, measured_width: Option<f32>) -> Vec<f32> {
    let mut advances: Vec<f32> = text
        .chars()
        .map(|c| {
            if c.is_ascii_uppercase() || c == 'W' || c == 'M' {
                font_size * 0.7
            } else if c == 'i' || c == 'l' || c == '!' || c == '.' || c == ' ' {
                font_size * 0.3
            } else {
                font_size * 0.5
            }
        })
        .collect();
    if let Some(width) = measured_width {
        let heuristic: f32 = advances.iter().sum();
        if heuristic > 0.0 {
            let correction = width / heuristic;
            for advance in &mut advances {
                *advance *= correction;
            }
        }
    }
    advances
}

/// Flip glyphs that would render upside down.
#[inline]
fn upright_rotation(tangent: f32) -> f32 {
    if tangent.abs() > std::f32::consts::FRAC_PI_2 {
        tangent + std::f32::consts::PI
    } else {
        tangent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{LabelKind, LabelStyle};
    use crate::layout::{HorizontalPlacement, TextPlacement, VerticalPlacement};

    fn poi(text: &str, position: Vec3) -> TextElement {
        TextElement::new(
            text,
            LabelShape::Poi {
                position,
                icon: None,
            },
            LabelStyle::default(),
        )
    }

    #[test]
    fn test_check_ready_zoom_range() {
        let mut element = poi("a", Vec3::new(0.0, 0.0, 100.0));
        element.style.min_zoom = 5.0;
        element.style.max_zoom = 10.0;
        let view = ViewState {
            zoom_level: 3.0,
            ..ViewState::default()
        };
        let (result, distance) =
            check_ready_for_placement(&element, &view, CharsetStatus::Ready, true, 1e6);
        assert_eq!(result, PrePlacementResult::NotVisible);
        assert!(distance.is_none());
    }

    #[test]
    fn test_check_ready_hidden_kind() {
        let element = poi("a", Vec3::ZERO).with_kind(LabelKind::Road);
        let mut view = ViewState::default();
        view.hidden_kinds.insert(LabelKind::Road);
        let (result, _) =
            check_ready_for_placement(&element, &view, CharsetStatus::Ready, true, 1e6);
        assert_eq!(result, PrePlacementResult::NotVisible);
    }

    #[test]
    fn test_check_ready_too_far() {
        let element = poi("a", Vec3::new(0.0, 0.0, 5000.0));
        let view = ViewState::default();
        let (result, distance) =
            check_ready_for_placement(&element, &view, CharsetStatus::Ready, true, 1000.0);
        assert_eq!(result, PrePlacementResult::TooFar);
        assert!(distance.expect("distance computed") > 1000.0);
    }

    #[test]
    fn test_check_ready_loading_glyphs() {
        let element = poi("a", Vec3::ZERO);
        let view = ViewState::default();
        let (result, _) =
            check_ready_for_placement(&element, &view, CharsetStatus::Loading, true, 1e6);
        assert_eq!(result, PrePlacementResult::NotReady);
    }

    #[test]
    fn test_distance_fade_ramp() {
        assert!((distance_fade(0.0, 1000.0, 0.8, 1.0) - 1.0).abs() < 1e-6);
        let mid = distance_fade(900.0, 1000.0, 0.8, 1.0);
        assert!(mid > 0.0 && mid < 1.0);
        assert!(distance_fade(1000.0, 1000.0, 0.8, 1.0) < 1e-6);
    }

    #[test]
    fn test_point_label_collision_and_fallback() {
        let mut collisions = ScreenCollisions::new(200, 200);
        let element = {
            let mut e = poi("hello", Vec3::ZERO);
            e.style.placements = vec![
                TextPlacement::CENTER,
                TextPlacement {
                    horizontal: HorizontalPlacement::Center,
                    vertical: VerticalPlacement::Below,
                },
            ];
            e.set_text_width(40.0);
            e
        };
        let mut layout = LayoutState::new(TextPlacement::CENTER);

        // Occupy the center spot only.
        collisions.reserve(0, [90.0, 92.0, 110.0, 100.0]);
        let result = place_point_label(
            &element,
            &mut layout,
            Vec2::new(100.0, 100.0),
            1.0,
            &mut collisions,
            1,
        );
        assert_eq!(result, PlacementResult::Ok);
        // Fallback anchored the text below the point.
        assert_eq!(layout.placement().vertical, VerticalPlacement::Below);
    }

    #[test]
    fn test_point_label_rejected_when_everything_occupied() {
        let mut collisions = ScreenCollisions::new(200, 200);
        collisions.reserve(0, [0.0, 0.0, 200.0, 200.0]);
        let element = {
            let e = poi("hello", Vec3::ZERO);
            e.set_text_width(40.0);
            e
        };
        let mut layout = LayoutState::default();
        let result = place_point_label(
            &element,
            &mut layout,
            Vec2::new(100.0, 100.0),
            1.0,
            &mut collisions,
            1,
        );
        assert_eq!(result, PlacementResult::Rejected);
    }

    #[test]
    fn test_point_label_off_screen_is_invisible() {
        let mut collisions = ScreenCollisions::new(200, 200);
        let element = {
            let e = poi("hello", Vec3::ZERO);
            e.set_text_width(40.0);
            e
        };
        let mut layout = LayoutState::default();
        let result = place_point_label(
            &element,
            &mut layout,
            Vec2::new(-500.0, -500.0),
            1.0,
            &mut collisions,
            1,
        );
        assert_eq!(result, PlacementResult::Invisible);
    }

    #[test]
    fn test_path_label_fits_straight_line() {
        let mut collisions = ScreenCollisions::new(400, 400);
        let mut scratch = ScratchBuffers::default();
        let element = {
            let e = TextElement::new(
                "Main St",
                LabelShape::Path {
                    path: vec![Vec3::ZERO, Vec3::X],
                },
                LabelStyle::default(),
            );
            e.set_text_width(50.0);
            e
        };
        scratch.screen_path = vec![Vec2::new(50.0, 200.0), Vec2::new(350.0, 200.0)];
        let result = place_path_label(&element, 1.0, &mut collisions, 1, &mut scratch);
        assert_eq!(result, PlacementResult::Ok);
        assert_eq!(scratch.glyph_placements.len(), "Main St".chars().count());
        // Glyphs follow the horizontal line.
        for glyph in &scratch.glyph_placements {
            assert!(glyph.rotation.abs() < 1e-3);
            assert!((glyph.screen_pos.y - 200.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_path_label_too_long_for_span() {
        let mut collisions = ScreenCollisions::new(400, 400);
        let mut scratch = ScratchBuffers::default();
        let element = {
            let e = TextElement::new(
                "An extremely long street name",
                LabelShape::Path {
                    path: vec![Vec3::ZERO, Vec3::X],
                },
                LabelStyle::default(),
            );
            e.set_text_width(500.0);
            e
        };
        scratch.screen_path = vec![Vec2::new(100.0, 200.0), Vec2::new(140.0, 200.0)];
        let result = place_path_label(&element, 1.0, &mut collisions, 1, &mut scratch);
        assert_eq!(result, PlacementResult::Invisible);
    }

    #[test]
    fn test_icon_placement() {
        let mut collisions = ScreenCollisions::new(200, 200);
        let icon = Icon::new("pin", 16.0, 16.0);
        assert_eq!(
            place_icon(&icon, Vec2::new(100.0, 100.0), 1.0, &mut collisions, 1),
            PlacementResult::Ok
        );
        assert_eq!(
            place_icon(&icon, Vec2::new(104.0, 100.0), 1.0, &mut collisions, 2),
            PlacementResult::Rejected
        );
        assert_eq!(
            place_icon(&icon, Vec2::new(-100.0, -100.0), 1.0, &mut collisions, 3),
            PlacementResult::Invisible
        );
    }

    #[test]
    fn test_glyph_advances_match_measured_width() {
        let advances = glyph_advances("Berlin", 14.0, Some(70.0));
        let total: f32 = advances.iter().sum();
        assert!((total - 70.0).abs() < 1e-3);
    }

    #[test]
    fn test_sample_path() {
        let points = vec![Vec2::ZERO, Vec2::new(10.0, 0.0)];
        let (pos, tangent) = sample_path_at_offset(&points, 5.0).expect("on path");
        assert!((pos.x - 5.0).abs() < 1e-3);
        assert!(tangent.abs() < 1e-3);
    }
}

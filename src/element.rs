//! Label data model: tile keys, shapes, styles and the candidate label
//! entity itself.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::layout::TextPlacement;

/// Key of the map tile a label group originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }
}

/// Unique identity of a built [`TextElementGroup`](crate::group::TextElementGroup).
///
/// Assigned from a process-wide counter when the group is built; a reloaded
/// tile produces groups with fresh ids, which is what lets the state cache
/// tell "same content" from "replaced content".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

impl GroupId {
    pub(crate) fn next() -> Self {
        GroupId(NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Category tag used for whole-category visibility toggling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelKind {
    Continent,
    Place,
    Road,
    Water,
    Landmark,
    Poi,
    Transit,
    Other,
}

/// Icon attached to a POI or line-marker label. Rasterization and atlas
/// management live behind [`PoiRenderer`](crate::glyphs::PoiRenderer); the
/// engine only needs the screen footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Icon {
    /// Name of the image in the host's POI atlas.
    pub name: String,
    /// Screen footprint in pixels at scale 1.
    pub width: f32,
    pub height: f32,
    /// Icon placement ignores collisions with other content.
    pub may_overlap: bool,
    /// Icon reserves screen space even when it may overlap.
    pub reserve_space: bool,
}

impl Icon {
    pub fn new(name: impl Into<String>, width: f32, height: f32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            may_overlap: false,
            reserve_space: true,
        }
    }
}

/// Geometry variant of a label. The variant is immutable after construction;
/// placement dispatches over it exhaustively.
#[derive(Debug, Clone)]
pub enum LabelShape {
    /// Single anchor point, optionally with an icon.
    Poi { position: Vec3, icon: Option<Icon> },
    /// Text following a world-space polyline.
    Path { path: Vec<Vec3> },
    /// Repeated icon (plus optional text) at each point along a path.
    LineMarker { points: Vec<Vec3>, icon: Icon },
}

impl LabelShape {
    /// Number of placement points this shape expands to. Line markers get
    /// one placement per point; everything else is a single placement.
    pub fn point_count(&self) -> usize {
        match self {
            LabelShape::Poi { .. } | LabelShape::Path { .. } => 1,
            LabelShape::LineMarker { points, .. } => points.len(),
        }
    }

    /// Representative world position used for view-distance and dedup
    /// comparisons.
    pub fn reference_position(&self) -> Vec3 {
        match self {
            LabelShape::Poi { position, .. } => *position,
            LabelShape::Path { path } => path.get(path.len() / 2).copied().unwrap_or(Vec3::ZERO),
            LabelShape::LineMarker { points, .. } => points.first().copied().unwrap_or(Vec3::ZERO),
        }
    }
}

/// Per-feature render attributes, produced by external style evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelStyle {
    /// Font size in pixels.
    pub size: f32,
    /// Text color as RGBA in linear space (0..1).
    pub color: [f32; 4],
    /// Offset from anchor position in screen pixels (x, y).
    pub offset: [f32; 2],
    /// Minimum zoom level for visibility.
    pub min_zoom: f32,
    /// Maximum zoom level for visibility.
    pub max_zoom: f32,
    /// Start of the distance fade, as a ratio of the maximum view distance.
    pub fade_near: f32,
    /// End of the distance fade; labels beyond this ratio are culled.
    pub fade_far: f32,
    /// Scale applied to the closest labels.
    pub distance_scale_near: f32,
    /// Scale applied to labels at the fade-far distance.
    pub distance_scale_far: f32,
    /// Candidate anchor placements, tried in order when the current one
    /// collides. Empty means center-anchored only.
    pub placements: Vec<TextPlacement>,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self {
            size: 14.0,
            color: [0.1, 0.1, 0.1, 1.0],
            offset: [0.0, 0.0],
            min_zoom: 0.0,
            max_zoom: f32::MAX,
            fade_near: 0.8,
            fade_far: 1.0,
            distance_scale_near: 1.0,
            distance_scale_far: 0.7,
            placements: Vec::new(),
        }
    }
}

impl LabelStyle {
    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: f32, max_zoom: f32) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_fade_range(mut self, fade_near: f32, fade_far: f32) -> Self {
        self.fade_near = fade_near;
        self.fade_far = fade_far;
        self
    }

    pub fn with_offset(mut self, x: f32, y: f32) -> Self {
        self.offset = [x, y];
        self
    }

    pub fn with_placements(mut self, placements: Vec<TextPlacement>) -> Self {
        self.placements = placements;
        self
    }
}

/// Load state of the lazily computed glyph layout of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlyphLoadState {
    #[default]
    NotRequested,
    Requested,
    Ready,
    Failed,
}

/// One candidate label.
///
/// Owned by the tile (through its group) that produced it, or by the overlay
/// list. The shape variant is immutable after construction. The measured
/// text width and glyph load state are computed lazily, exactly once per
/// loading cycle, and invalidated together.
#[derive(Debug, Clone)]
pub struct TextElement {
    pub text: String,
    shape: LabelShape,
    pub style: LabelStyle,
    /// Placement priority; higher places first.
    pub priority: i32,
    /// Stable identity of the source map feature, for dedup and picking.
    pub feature_id: Option<u64>,
    pub kind: LabelKind,
    /// Placed before anything else, ignoring collisions.
    pub always_on_top: bool,
    /// Text placement ignores collisions with other content.
    pub may_overlap: bool,
    /// Text reserves screen space even when it may overlap.
    pub reserve_space: bool,
    // Lazy layout data. Interior mutability: the pipeline is single-threaded
    // and groups are shared immutably (Arc).
    text_width: Cell<Option<f32>>,
    glyph_state: Cell<GlyphLoadState>,
}

impl TextElement {
    pub fn new(text: impl Into<String>, shape: LabelShape, style: LabelStyle) -> Self {
        Self {
            text: text.into(),
            shape,
            style,
            priority: 0,
            feature_id: None,
            kind: LabelKind::Other,
            always_on_top: false,
            may_overlap: false,
            reserve_space: true,
            text_width: Cell::new(None),
            glyph_state: Cell::new(GlyphLoadState::NotRequested),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_feature_id(mut self, feature_id: u64) -> Self {
        self.feature_id = Some(feature_id);
        self
    }

    pub fn with_kind(mut self, kind: LabelKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn shape(&self) -> &LabelShape {
        &self.shape
    }

    /// Measured width of the shaped text in pixels, if glyphs are ready.
    pub fn text_width(&self) -> Option<f32> {
        self.text_width.get()
    }

    pub fn glyph_state(&self) -> GlyphLoadState {
        self.glyph_state.get()
    }

    pub fn set_glyph_state(&self, state: GlyphLoadState) {
        self.glyph_state.set(state);
    }

    /// Record the measured text width. Populated once per loading cycle.
    pub fn set_text_width(&self, width: f32) {
        debug_assert!(
            self.text_width.get().is_none(),
            "text width populated twice without invalidation"
        );
        self.text_width.set(Some(width));
    }

    /// Drop all lazily computed layout data so the next loading cycle
    /// recomputes it.
    pub fn invalidate_layout(&self) {
        self.text_width.set(None);
        self.glyph_state.set(GlyphLoadState::NotRequested);
    }
}

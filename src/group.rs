//! Same-priority label batches and their live placement state.
//!
//! A [`TextElementGroup`] is the immutable batch of labels one tile
//! contributes at one priority; it is replaced wholesale when the tile's
//! data changes. [`TextElementGroupState`] is the mutable per-frame
//! companion tracked by the state cache, with one [`TextElementState`] per
//! element.

use std::sync::Arc;

use crate::element::{GroupId, LabelShape, TextElement, TileKey};
use crate::layout::LayoutState;
use crate::render_state::RenderState;

/// Ordered set of labels sharing one priority value, scoped to one tile.
/// Immutable once built; a reloaded tile builds new groups with new ids.
#[derive(Debug)]
pub struct TextElementGroup {
    id: GroupId,
    priority: i32,
    elements: Vec<TextElement>,
}

impl TextElementGroup {
    pub fn new(priority: i32, elements: Vec<TextElement>) -> Self {
        Self {
            id: GroupId::next(),
            priority,
            elements,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn elements(&self) -> &[TextElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Filter applied when (re)initializing element states: computes the view
/// distance of a candidate, or `None` when it is not eligible this frame.
pub type ViewDistanceFilter<'a> =
    dyn FnMut(&TextElement, &mut TextElementState) -> Option<f32> + 'a;

/// Current placement state of one label instance.
///
/// Created lazily when a label first becomes a placement candidate; reset
/// (not destroyed) when it leaves visibility so fade-out can complete, and
/// destroyed only when its group is evicted.
#[derive(Debug)]
pub struct TextElementState {
    element_index: usize,
    /// Camera distance of the label, `None` while not visible / not ready.
    view_distance: Option<f32>,
    text_render_state: RenderState,
    /// Empty for path labels, one entry for a POI icon, one per point for
    /// line markers.
    icon_render_states: Vec<RenderState>,
    layout_state: LayoutState,
    /// Frame number of the last frame this label was rendered in.
    last_frame_rendered: u64,
    /// Marked by the cache when another tile already shows this feature.
    duplicate: bool,
}

impl TextElementState {
    fn new(element_index: usize, element: &TextElement, fade_time: f64) -> Self {
        let icon_count = match element.shape() {
            LabelShape::Poi { icon, .. } => usize::from(icon.is_some()),
            LabelShape::Path { .. } => 0,
            LabelShape::LineMarker { points, .. } => points.len(),
        };
        Self {
            element_index,
            view_distance: None,
            text_render_state: RenderState::new(fade_time),
            icon_render_states: vec![RenderState::new(fade_time); icon_count],
            layout_state: LayoutState::new(
                element.style.placements.first().copied().unwrap_or_default(),
            ),
            last_frame_rendered: 0,
            duplicate: false,
        }
    }

    pub fn element_index(&self) -> usize {
        self.element_index
    }

    pub fn view_distance(&self) -> Option<f32> {
        self.view_distance
    }

    pub fn set_view_distance(&mut self, distance: Option<f32>) {
        self.view_distance = distance;
    }

    /// Whether the state has been seeded with a view distance this cycle.
    pub fn is_initialized(&self) -> bool {
        self.view_distance.is_some()
    }

    pub fn text_render_state(&self) -> &RenderState {
        &self.text_render_state
    }

    pub fn text_render_state_mut(&mut self) -> &mut RenderState {
        &mut self.text_render_state
    }

    pub fn icon_render_states(&self) -> &[RenderState] {
        &self.icon_render_states
    }

    pub fn icon_render_states_mut(&mut self) -> &mut [RenderState] {
        &mut self.icon_render_states
    }

    pub fn layout_state(&self) -> &LayoutState {
        &self.layout_state
    }

    pub fn layout_state_mut(&mut self) -> &mut LayoutState {
        &mut self.layout_state
    }

    pub fn last_frame_rendered(&self) -> u64 {
        self.last_frame_rendered
    }

    pub fn set_last_frame_rendered(&mut self, frame: u64) {
        self.last_frame_rendered = frame;
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate
    }

    pub fn set_duplicate(&mut self, duplicate: bool) {
        self.duplicate = duplicate;
    }

    /// Number of placements this state expands to (line markers count one
    /// per point).
    pub fn point_count(&self) -> usize {
        self.icon_render_states.len().max(1)
    }

    /// Visible while the text or any icon still has opacity.
    pub fn is_visible(&self) -> bool {
        self.text_render_state.is_visible()
            || self.icon_render_states.iter().any(RenderState::is_visible)
    }

    pub fn is_fading(&self) -> bool {
        self.text_render_state.is_fading()
            || self.icon_render_states.iter().any(RenderState::is_fading)
    }

    /// Advance all fade animations of this label.
    pub fn update_fading(&mut self, time: f64, disable_fading: bool) {
        self.text_render_state.update_fading(time, disable_fading);
        for icon in &mut self.icon_render_states {
            icon.update_fading(time, disable_fading);
        }
    }

    /// Reset to the not-visible, not-initialized state, keeping the slot so
    /// a later frame can start a fresh fade-in.
    pub fn reset(&mut self) {
        self.view_distance = None;
        self.duplicate = false;
        self.text_render_state.reset();
        for icon in &mut self.icon_render_states {
            icon.reset();
        }
    }

    /// Transplanted fade/layout state from a predecessor label, preserving
    /// fade continuity across a tile reload. The donor is reset.
    pub(crate) fn adopt(
        &mut self,
        text: RenderState,
        icons: Vec<RenderState>,
        layout: LayoutState,
        last_frame: u64,
    ) {
        self.text_render_state = text;
        if icons.len() == self.icon_render_states.len() {
            self.icon_render_states = icons;
        }
        self.layout_state = layout;
        self.last_frame_rendered = last_frame;
    }

    /// Move the fade/layout state out, leaving this state reset.
    pub(crate) fn take_transferable(&mut self) -> (RenderState, Vec<RenderState>, LayoutState, u64) {
        let text = self.text_render_state.clone();
        let icons = self.icon_render_states.clone();
        let layout = self.layout_state.clone();
        let frame = self.last_frame_rendered;
        self.reset();
        (text, icons, layout, frame)
    }
}

/// Mutable per-frame companion of one [`TextElementGroup`].
#[derive(Debug)]
pub struct TextElementGroupState {
    group: Arc<TextElementGroup>,
    tile_key: TileKey,
    states: Vec<TextElementState>,
    /// True when the tile supplying this group is part of the current
    /// renderable tile set. Reset at the start of every update cycle.
    visited: bool,
}

impl TextElementGroupState {
    /// Build the state for a group, seeding each element state through the
    /// filter.
    pub fn new(
        group: Arc<TextElementGroup>,
        tile_key: TileKey,
        fade_time: f64,
        filter: &mut ViewDistanceFilter<'_>,
    ) -> Self {
        let mut states = Vec::with_capacity(group.len());
        for (index, element) in group.elements().iter().enumerate() {
            let mut state = TextElementState::new(index, element, fade_time);
            let distance = filter(element, &mut state);
            state.set_view_distance(distance);
            states.push(state);
        }
        debug_assert_eq!(states.len(), group.len(), "group state size mismatch");
        Self {
            group,
            tile_key,
            states,
            visited: true,
        }
    }

    pub fn group(&self) -> &Arc<TextElementGroup> {
        &self.group
    }

    pub fn group_id(&self) -> crate::element::GroupId {
        self.group.id()
    }

    pub fn priority(&self) -> i32 {
        self.group.priority()
    }

    pub fn tile_key(&self) -> TileKey {
        self.tile_key
    }

    pub fn visited(&self) -> bool {
        self.visited
    }

    pub fn set_visited(&mut self, visited: bool) {
        self.visited = visited;
    }

    /// Expanded element count: line markers contribute one per point.
    pub fn size(&self) -> usize {
        self.states.iter().map(TextElementState::point_count).sum()
    }

    pub fn states(&self) -> &[TextElementState] {
        &self.states
    }

    pub fn states_mut(&mut self) -> &mut [TextElementState] {
        &mut self.states
    }

    /// Element and state for one slot.
    pub fn element_state(&self, index: usize) -> (&TextElement, &TextElementState) {
        (&self.group.elements()[index], &self.states[index])
    }

    /// Re-apply the eligibility filter to every contained state. Called each
    /// frame the tile's visibility changes.
    pub fn update_elements(&mut self, filter: &mut ViewDistanceFilter<'_>) {
        for state in &mut self.states {
            let element = &self.group.elements()[state.element_index];
            let distance = filter(element, state);
            state.set_view_distance(distance);
        }
    }

    /// Advance all fade animations. Returns whether any state is still
    /// visible afterwards.
    pub fn update_fading(&mut self, time: f64, disable_fading: bool) -> bool {
        let mut any_visible = false;
        for state in &mut self.states {
            state.update_fading(time, disable_fading);
            any_visible |= state.is_visible();
        }
        any_visible
    }

    /// Iterate states that are currently visible, e.g. for picking.
    pub fn traverse_visible(&self, mut callback: impl FnMut(&TextElement, &TextElementState)) {
        for state in &self.states {
            if state.is_visible() {
                callback(&self.group.elements()[state.element_index], state);
            }
        }
    }
}

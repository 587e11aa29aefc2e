//! Process-wide cache of live label placement state.
//!
//! Maps group identity to [`TextElementGroupState`] so tiles whose content
//! has not changed keep their fade/layout state between frames, resolves
//! duplicate labels across tile boundaries, and transfers fade state from a
//! reloaded tile's old labels to their successors.

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use log::{debug, warn};

use crate::element::{GroupId, LabelShape, TextElement, TileKey};
use crate::group::{TextElementGroup, TextElementGroupState, ViewDistanceFilter};

/// Squared world distance under which two point labels with identical text
/// are treated as the same real-world feature appearing in overlapping or
/// adjacent tiles. Fixed regardless of zoom level; extreme zooms may under-
/// or over-merge.
pub const DUPLICATE_DISTANCE_SQ: f32 = 2500.0;

/// Entry of the per-frame deduplication index.
#[derive(Debug, Clone, Copy)]
struct DedupEntry {
    group_id: GroupId,
    element_index: usize,
    position: Vec3,
    last_frame: u64,
}

/// Key of the deduplication index: zoom bucket plus label text.
type DedupKey = (i32, String);

#[derive(Debug, Clone, Copy)]
struct TextIndexEntry {
    group_id: GroupId,
    element_index: usize,
}

/// Cache of all live (visited or still fading) group states.
pub struct TextElementStateCache {
    groups: HashMap<GroupId, TextElementGroupState>,
    /// Group ids in insertion order; breaks priority ties reproducibly.
    insertion_order: Vec<GroupId>,
    /// Priority-descending view over `insertion_order`, rebuilt lazily.
    sorted: Vec<GroupId>,
    sorted_dirty: bool,
    /// Per-frame duplicate resolution index, cleared on every `update`.
    dedup_map: HashMap<DedupKey, Vec<DedupEntry>>,
    /// Persistent text -> element handles index used for fade-state
    /// replacement across tile reloads.
    text_index: HashMap<String, Vec<TextIndexEntry>>,
    fade_time: f64,
}

impl TextElementStateCache {
    pub fn new(fade_time: f64) -> Self {
        Self {
            groups: HashMap::new(),
            insertion_order: Vec::new(),
            sorted: Vec::new(),
            sorted_dirty: false,
            dedup_map: HashMap::new(),
            text_index: HashMap::new(),
            fade_time,
        }
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, id: GroupId) -> Option<&TextElementGroupState> {
        self.groups.get(&id)
    }

    pub fn get_mut(&mut self, id: GroupId) -> Option<&mut TextElementGroupState> {
        self.groups.get_mut(&id)
    }

    pub fn group_states(&self) -> impl Iterator<Item = &TextElementGroupState> {
        self.groups.values()
    }

    /// Whether any cached label is mid fade animation. Drives the renderer's
    /// decision to keep re-placing while nothing else changed.
    pub fn any_fading(&self) -> bool {
        self.groups
            .values()
            .flat_map(|gs| gs.states())
            .any(|state| state.is_fading())
    }

    /// Reset the per-cycle `visited` flag on every group. Called at the
    /// start of each update cycle, before the renderable tiles are walked.
    pub fn mark_all_unvisited(&mut self) {
        for state in self.groups.values_mut() {
            state.set_visited(false);
        }
    }

    /// Central incremental-update primitive. Looks a group up by identity:
    /// when present, re-applies the filter and marks the group visited; when
    /// absent, constructs a new group state.
    ///
    /// Returns the group state and whether it was found in the cache.
    pub fn get_or_set(
        &mut self,
        group: Arc<TextElementGroup>,
        tile_key: TileKey,
        filter: &mut ViewDistanceFilter<'_>,
    ) -> (&mut TextElementGroupState, bool) {
        use std::collections::hash_map::Entry;

        match self.groups.entry(group.id()) {
            Entry::Occupied(entry) => {
                let state = entry.into_mut();
                debug_assert_eq!(
                    state.tile_key(),
                    tile_key,
                    "group presented from a different tile"
                );
                state.set_visited(true);
                state.update_elements(filter);
                (state, true)
            }
            Entry::Vacant(entry) => {
                for (index, element) in group.elements().iter().enumerate() {
                    self.text_index
                        .entry(element.text.clone())
                        .or_default()
                        .push(TextIndexEntry {
                            group_id: group.id(),
                            element_index: index,
                        });
                }
                self.insertion_order.push(group.id());
                self.sorted_dirty = true;
                let state =
                    TextElementGroupState::new(group, tile_key, self.fade_time, filter);
                (entry.insert(state), false)
            }
        }
    }

    /// Advance fading on every cached group, evict groups that are neither
    /// visible nor visited, and clear the per-frame deduplication index.
    ///
    /// Returns whether any group was evicted, which tells the renderer that
    /// newly freed screen space may admit previously rejected labels.
    pub fn update(
        &mut self,
        time: f64,
        disable_fading: bool,
        _find_replacements: bool,
        _zoom_level: f32,
    ) -> bool {
        self.dedup_map.clear();

        let mut evicted = Vec::new();
        for (id, state) in &mut self.groups {
            let any_visible = state.update_fading(time, disable_fading);
            if !state.visited() && !any_visible {
                evicted.push(*id);
            }
        }

        for id in &evicted {
            if let Some(state) = self.groups.remove(id) {
                for element in state.group().elements() {
                    Self::remove_text_index_entries(&mut self.text_index, element, *id);
                }
            }
        }
        if !evicted.is_empty() {
            debug!("evicted {} label group(s)", evicted.len());
            self.insertion_order.retain(|id| !evicted.contains(id));
            self.sorted_dirty = true;
        }
        !evicted.is_empty()
    }

    fn remove_text_index_entries(
        text_index: &mut HashMap<String, Vec<TextIndexEntry>>,
        element: &TextElement,
        group_id: GroupId,
    ) {
        if let Some(entries) = text_index.get_mut(&element.text) {
            entries.retain(|e| e.group_id != group_id);
            if entries.is_empty() {
                text_index.remove(&element.text);
            }
        }
    }

    /// Resolve cross-tile duplicates for one point label.
    ///
    /// Point labels with identical text within [`DUPLICATE_DISTANCE_SQ`] are
    /// the same real-world feature seen from overlapping tiles; the more
    /// recently rendered instance stays canonical, the other is marked as a
    /// duplicate and excluded from placement this cycle. When neither has
    /// been rendered, the first registered instance wins.
    ///
    /// Returns whether the given element remains canonical.
    pub fn deduplicate_element(
        &mut self,
        zoom_level: f32,
        group_id: GroupId,
        element_index: usize,
    ) -> bool {
        let (text, position, last_frame) = {
            let Some(group_state) = self.groups.get(&group_id) else {
                return true;
            };
            let (element, state) = group_state.element_state(element_index);
            if !matches!(element.shape(), LabelShape::Poi { .. }) {
                return true;
            }
            (
                element.text.clone(),
                element.shape().reference_position(),
                state.last_frame_rendered(),
            )
        };

        let key = (zoom_level.floor() as i32, text);
        let entries = self.dedup_map.entry(key).or_default();
        let near = entries
            .iter_mut()
            .find(|e| e.position.distance_squared(position) < DUPLICATE_DISTANCE_SQ);

        match near {
            None => {
                entries.push(DedupEntry {
                    group_id,
                    element_index,
                    position,
                    last_frame,
                });
                self.set_duplicate_flag(group_id, element_index, false);
                true
            }
            Some(entry) if entry.group_id == group_id && entry.element_index == element_index => {
                entry.last_frame = last_frame;
                self.set_duplicate_flag(group_id, element_index, false);
                true
            }
            Some(entry) => {
                if last_frame > entry.last_frame {
                    // This instance was rendered more recently: it takes over
                    // as the canonical one.
                    let demoted = (entry.group_id, entry.element_index);
                    *entry = DedupEntry {
                        group_id,
                        element_index,
                        position,
                        last_frame,
                    };
                    self.set_duplicate_flag(demoted.0, demoted.1, true);
                    self.set_duplicate_flag(group_id, element_index, false);
                    true
                } else {
                    self.set_duplicate_flag(group_id, element_index, true);
                    false
                }
            }
        }
    }

    fn set_duplicate_flag(&mut self, group_id: GroupId, element_index: usize, duplicate: bool) {
        if let Some(group_state) = self.groups.get_mut(&group_id) {
            group_state.states_mut()[element_index].set_duplicate(duplicate);
        }
    }

    /// Transfer fade/layout state from a compatible predecessor label to the
    /// given freshly created state, preserving fade continuity across a tile
    /// reload.
    ///
    /// A predecessor is a still-cached, no-longer-visited group's label with
    /// the same text and, for point and path labels, the same feature id;
    /// line markers match on point count instead. Returns `false` (and logs
    /// a diagnostic) when no compatible predecessor exists; the new label
    /// then starts with a fresh fade-in.
    pub fn replace_element(
        &mut self,
        _zoom_level: f32,
        group_id: GroupId,
        element_index: usize,
    ) -> bool {
        let (text, feature_id, point_count, is_marker) = {
            let Some(group_state) = self.groups.get(&group_id) else {
                return false;
            };
            let (element, state) = group_state.element_state(element_index);
            (
                element.text.clone(),
                element.feature_id,
                state.point_count(),
                matches!(element.shape(), LabelShape::LineMarker { .. }),
            )
        };

        let Some(handles) = self.text_index.get(&text) else {
            return false;
        };

        let mut mismatch = false;
        let mut donor = None;
        for handle in handles {
            if handle.group_id == group_id {
                continue;
            }
            let Some(donor_group) = self.groups.get(&handle.group_id) else {
                continue;
            };
            if donor_group.visited() {
                continue;
            }
            let (donor_element, donor_state) =
                donor_group.element_state(handle.element_index);
            if !donor_state.is_visible() {
                continue;
            }
            let compatible = if is_marker {
                donor_state.point_count() == point_count
            } else {
                donor_element.feature_id == feature_id
            };
            if compatible {
                donor = Some(*handle);
                break;
            }
            mismatch = true;
        }

        let Some(handle) = donor else {
            if mismatch {
                warn!(
                    "label replacement rejected for {:?}: feature or geometry mismatch",
                    text
                );
            }
            return false;
        };

        let taken = self
            .groups
            .get_mut(&handle.group_id)
            .map(|gs| gs.states_mut()[handle.element_index].take_transferable());
        let Some((text_state, icon_states, layout, frame)) = taken else {
            return false;
        };
        if let Some(group_state) = self.groups.get_mut(&group_id) {
            group_state.states_mut()[element_index].adopt(text_state, icon_states, layout, frame);
            true
        } else {
            false
        }
    }

    /// Group ids sorted by descending priority, ties broken by insertion
    /// order. Rebuilt lazily after insertions and evictions.
    pub fn sorted_group_ids(&mut self) -> &[GroupId] {
        if self.sorted_dirty {
            self.sorted = self.insertion_order.clone();
            let groups = &self.groups;
            // Stable sort keeps insertion order within equal priorities.
            self.sorted.sort_by_key(|id| {
                std::cmp::Reverse(groups.get(id).map(|g| g.priority()).unwrap_or(i32::MIN))
            });
            self.sorted_dirty = false;
        }
        &self.sorted
    }

    /// Drop all cached state.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.insertion_order.clear();
        self.sorted.clear();
        self.sorted_dirty = false;
        self.dedup_map.clear();
        self.text_index.clear();
    }

    /// Reset every render state so all labels restart from a fresh fade-in.
    pub fn clear_render_states(&mut self) {
        for group_state in self.groups.values_mut() {
            for state in group_state.states_mut() {
                state.reset();
            }
        }
    }
}

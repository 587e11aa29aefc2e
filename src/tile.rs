//! Per-tile label input handed to the renderer each frame.

use std::sync::Arc;

use glam::Vec3;

use crate::element::TileKey;
use crate::group::TextElementGroup;

/// Label content of one renderable tile, as produced by the tile provider.
#[derive(Debug, Clone)]
pub struct TileLabels {
    pub key: TileKey,
    /// Groups of labels, one per priority value present in the tile.
    pub groups: Vec<Arc<TextElementGroup>>,
    /// World-space polylines of geometry that must occlude labels
    /// (e.g. tunnel mouths); reserved in the collision index before any
    /// label is placed.
    pub blocking_paths: Vec<Vec<Vec3>>,
    /// Set by the provider when the tile's label set changed since the last
    /// frame.
    pub text_changed: bool,
}

impl TileLabels {
    pub fn new(key: TileKey, groups: Vec<Arc<TextElementGroup>>) -> Self {
        Self {
            key,
            groups,
            blocking_paths: Vec::new(),
            text_changed: true,
        }
    }

    /// Total candidate label count, line markers expanded per point.
    pub fn label_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.elements())
            .map(|e| e.shape().point_count())
            .sum()
    }
}

//! Per-frame camera and viewing snapshot consumed by the placement pipeline.

use std::collections::HashSet;

use glam::{Mat4, Vec3};

use crate::element::LabelKind;

/// Immutable view of the camera for one frame.
#[derive(Debug, Clone)]
pub struct ViewState {
    /// Combined view-projection matrix.
    pub view_proj: Mat4,
    /// Camera position in world space.
    pub eye: Vec3,
    /// Point the camera looks at.
    pub world_center: Vec3,
    pub zoom_level: f32,
    /// Distance from the camera to the look-at point.
    pub look_at_distance: f32,
    /// Largest world distance at which anything is rendered.
    pub max_visibility_distance: f32,
    /// Monotonic frame counter.
    pub frame_number: u64,
    /// Frame time in milliseconds.
    pub time: f64,
    pub camera_is_moving: bool,
    /// Label categories suppressed by the host this frame.
    pub hidden_kinds: HashSet<LabelKind>,
}

impl ViewState {
    pub fn is_kind_hidden(&self, kind: LabelKind) -> bool {
        self.hidden_kinds.contains(&kind)
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            view_proj: Mat4::IDENTITY,
            eye: Vec3::ZERO,
            world_center: Vec3::ZERO,
            zoom_level: 10.0,
            look_at_distance: 1000.0,
            max_visibility_distance: 10_000.0,
            frame_number: 0,
            time: 0.0,
            camera_is_moving: false,
            hidden_kinds: HashSet::new(),
        }
    }
}

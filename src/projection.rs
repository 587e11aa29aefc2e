//! World-to-screen projection for label anchors and paths.

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Margin (in NDC units) tolerated outside the frustum so labels anchored
/// just off the edge can still slide in.
const NDC_MARGIN: f32 = 0.2;

/// Projects world coordinates to screen coordinates.
pub struct ScreenProjector {
    screen_width: f32,
    screen_height: f32,
}

impl ScreenProjector {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen_width: width as f32,
            screen_height: height as f32,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.screen_width = width as f32;
        self.screen_height = height as f32;
    }

    pub fn screen_size(&self) -> Vec2 {
        Vec2::new(self.screen_width, self.screen_height)
    }

    /// Project a world position to screen pixels.
    ///
    /// Returns `Some((screen_pos, depth))` with normalized depth (0 = near,
    /// 1 = far) when the point passes the near/far clip test and lies within
    /// the (slightly widened) frustum, `None` otherwise.
    pub fn project(&self, world_pos: Vec3, view_proj: Mat4) -> Option<(Vec2, f32)> {
        let clip = view_proj * Vec4::new(world_pos.x, world_pos.y, world_pos.z, 1.0);

        // w <= 0 means behind or at the camera plane.
        if clip.w <= 1e-4 {
            return None;
        }

        let ndc = Vec3::new(clip.x / clip.w, clip.y / clip.w, clip.z / clip.w);

        if ndc.x < -1.0 - NDC_MARGIN
            || ndc.x > 1.0 + NDC_MARGIN
            || ndc.y < -1.0 - NDC_MARGIN
            || ndc.y > 1.0 + NDC_MARGIN
        {
            return None;
        }
        if ndc.z < 0.0 || ndc.z > 1.0 {
            return None;
        }

        Some((self.ndc_to_screen(ndc), ndc.z))
    }

    /// Project each vertex of a world-space path, appending `Some(screen)`
    /// or `None` per vertex into `out`. Returns the number of visible
    /// vertices.
    pub fn project_path(
        &self,
        path: &[Vec3],
        view_proj: Mat4,
        out: &mut Vec<Option<Vec2>>,
    ) -> usize {
        out.clear();
        let mut visible = 0;
        for point in path {
            let projected = self.project(*point, view_proj).map(|(p, _)| p);
            visible += usize::from(projected.is_some());
            out.push(projected);
        }
        visible
    }

    fn ndc_to_screen(&self, ndc: Vec3) -> Vec2 {
        // NDC y points up, screen y points down.
        Vec2::new(
            (ndc.x + 1.0) * 0.5 * self.screen_width,
            (1.0 - ndc.y) * 0.5 * self.screen_height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_maps_origin_to_center() {
        let projector = ScreenProjector::new(800, 600);
        let (pos, _depth) = projector
            .project(Vec3::ZERO, Mat4::IDENTITY)
            .expect("visible");
        assert!((pos.x - 400.0).abs() < 1.0);
        assert!((pos.y - 300.0).abs() < 1.0);
    }

    #[test]
    fn test_behind_camera_is_clipped() {
        let projector = ScreenProjector::new(800, 600);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::Z, Vec3::Y);
        let proj = Mat4::perspective_rh(1.0, 800.0 / 600.0, 0.1, 100.0);
        let view_proj = proj * view;

        assert!(projector
            .project(Vec3::new(0.0, 0.0, -10.0), view_proj)
            .is_none());
    }

    #[test]
    fn test_project_path_counts_visible() {
        let projector = ScreenProjector::new(800, 600);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::Z, Vec3::Y);
        let proj = Mat4::perspective_rh(1.0, 800.0 / 600.0, 0.1, 100.0);
        let view_proj = proj * view;

        let path = vec![
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::new(1.0, 0.0, 10.0),
            Vec3::new(0.0, 0.0, -10.0),
        ];
        let mut out = Vec::new();
        let visible = projector.project_path(&path, view_proj, &mut out);
        assert_eq!(visible, 2);
        assert_eq!(out.len(), 3);
        assert!(out[2].is_none());
    }
}

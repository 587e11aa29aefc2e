//! Screen-space collision index.
//!
//! An R-tree over already-reserved screen rectangles. The renderer resets it
//! every frame, pre-allocates blocking geometry (e.g. tunnels that must
//! occlude labels), then lets placement try to allocate label boxes in
//! priority order.

use glam::Vec2;
use rstar::{RTree, RTreeObject, AABB};

/// Id stored for boxes that never take part in picking (blocking geometry,
/// reserved-only space).
pub const NO_LABEL_ID: u64 = u64::MAX;

/// A reserved screen rectangle.
#[derive(Debug, Clone, Copy)]
pub struct CollisionBox {
    /// Opaque id supplied by the caller; `NO_LABEL_ID` for non-label boxes.
    pub id: u64,
    /// Bounding box [x0, y0, x1, y1] in screen pixels.
    pub bounds: [f32; 4],
}

impl RTreeObject for CollisionBox {
    type Envelope = AABB<[f32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds[0], self.bounds[1]],
            [self.bounds[2], self.bounds[3]],
        )
    }
}

/// R-tree based screen-space occupancy structure.
pub struct ScreenCollisions {
    tree: RTree<CollisionBox>,
    width: f32,
    height: f32,
}

impl ScreenCollisions {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            tree: RTree::new(),
            width: width as f32,
            height: height as f32,
        }
    }

    /// Drop all reserved space. Called once per frame before placement.
    pub fn reset(&mut self) {
        self.tree = RTree::new();
    }

    /// Update screen dimensions, clearing all reservations.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width as f32;
        self.height = height as f32;
        self.reset();
    }

    pub fn screen_size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    /// Whether the box lies at least partially on screen.
    pub fn is_on_screen(&self, bounds: [f32; 4]) -> bool {
        let [x0, y0, x1, y1] = bounds;
        x1 > 0.0 && y1 > 0.0 && x0 < self.width && y0 < self.height && x0 < x1 && y0 < y1
    }

    /// Try to reserve a rectangle. Returns `false` without reserving when it
    /// intersects already-reserved space or is completely off screen.
    pub fn allocate(&mut self, id: u64, bounds: [f32; 4]) -> bool {
        let Some(clamped) = self.clamp(bounds) else {
            return false;
        };
        if self.intersects_clamped(clamped) {
            return false;
        }
        self.tree.insert(CollisionBox { id, bounds: clamped });
        true
    }

    /// Reserve a rectangle unconditionally (blocking geometry, labels that
    /// may overlap but still reserve their space).
    pub fn reserve(&mut self, id: u64, bounds: [f32; 4]) {
        if let Some(clamped) = self.clamp(bounds) {
            self.tree.insert(CollisionBox { id, bounds: clamped });
        }
    }

    /// Whether a rectangle intersects already-reserved space. Off-screen
    /// counts as occupied.
    pub fn is_allocated(&self, bounds: [f32; 4]) -> bool {
        match self.clamp(bounds) {
            Some(clamped) => self.intersects_clamped(clamped),
            None => true,
        }
    }

    /// All reserved boxes intersecting the given rectangle.
    pub fn query_intersecting(&self, bounds: [f32; 4]) -> impl Iterator<Item = &CollisionBox> {
        let envelope = AABB::from_corners([bounds[0], bounds[1]], [bounds[2], bounds[3]]);
        self.tree.locate_in_envelope_intersecting(&envelope)
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    fn clamp(&self, bounds: [f32; 4]) -> Option<[f32; 4]> {
        let [x0, y0, x1, y1] = bounds;
        let x0 = x0.max(0.0);
        let y0 = y0.max(0.0);
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some([x0, y0, x1, y1])
    }

    fn intersects_clamped(&self, bounds: [f32; 4]) -> bool {
        let envelope = AABB::from_corners([bounds[0], bounds[1]], [bounds[2], bounds[3]]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .any(|existing| rects_overlap(bounds, existing.bounds))
    }
}

/// Check if two axis-aligned rectangles overlap.
#[inline]
fn rects_overlap(a: [f32; 4], b: [f32; 4]) -> bool {
    a[0] < b[2] && a[2] > b[0] && a[1] < b[3] && a[3] > b[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_collision() {
        let mut collisions = ScreenCollisions::new(100, 100);
        assert!(collisions.allocate(1, [0.0, 0.0, 10.0, 10.0]));
        assert!(collisions.allocate(2, [50.0, 50.0, 60.0, 60.0]));
        assert_eq!(collisions.len(), 2);
    }

    #[test]
    fn test_collision() {
        let mut collisions = ScreenCollisions::new(100, 100);
        assert!(collisions.allocate(1, [0.0, 0.0, 20.0, 20.0]));
        assert!(!collisions.allocate(2, [10.0, 10.0, 30.0, 30.0]));
        assert_eq!(collisions.len(), 1);
    }

    #[test]
    fn test_reset() {
        let mut collisions = ScreenCollisions::new(100, 100);
        assert!(collisions.allocate(1, [0.0, 0.0, 50.0, 50.0]));
        collisions.reset();
        assert!(collisions.allocate(2, [0.0, 0.0, 50.0, 50.0]));
    }

    #[test]
    fn test_reserve_blocks_allocation() {
        let mut collisions = ScreenCollisions::new(100, 100);
        collisions.reserve(NO_LABEL_ID, [0.0, 0.0, 40.0, 40.0]);
        assert!(collisions.is_allocated([10.0, 10.0, 20.0, 20.0]));
        assert!(!collisions.allocate(1, [10.0, 10.0, 20.0, 20.0]));
    }

    #[test]
    fn test_off_screen_counts_as_occupied() {
        let collisions = ScreenCollisions::new(100, 100);
        assert!(collisions.is_allocated([-50.0, -50.0, -10.0, -10.0]));
    }

    #[test]
    fn test_query() {
        let mut collisions = ScreenCollisions::new(100, 100);
        collisions.allocate(1, [0.0, 0.0, 20.0, 20.0]);
        collisions.allocate(2, [50.0, 50.0, 70.0, 70.0]);
        let hits = collisions.query_intersecting([10.0, 10.0, 60.0, 60.0]).count();
        assert_eq!(hits, 2);
    }
}

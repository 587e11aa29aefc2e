//! Per-frame placement statistics.
//!
//! Injectable collaborator rather than module-level globals: the renderer
//! owns one instance, clears it each frame and exposes it read-only.

use log::debug;

/// Counters for one frame of the placement pipeline.
#[derive(Debug, Clone, Default)]
pub struct PlacementStats {
    /// Candidate labels considered this frame (expanded count).
    pub total: usize,
    /// Rejected early: outside zoom range or kind hidden.
    pub not_visible: usize,
    /// Rejected early: beyond the maximum view distance.
    pub too_far: usize,
    /// Skipped: glyphs still loading.
    pub not_ready: usize,
    /// Skipped: POI icon not yet renderable.
    pub poi_not_rendered: usize,
    /// Suppressed as cross-tile duplicates.
    pub duplicates: usize,
    /// On screen but lost the collision test.
    pub rejected: usize,
    /// Off screen or behind the camera.
    pub invisible: usize,
    /// Successfully placed this frame.
    pub placed: usize,
    /// Labels whose update was deferred by the overload budget.
    pub deferred: usize,
    /// Wall-clock duration of the update phase in milliseconds.
    pub update_time_ms: f64,
    /// Wall-clock duration of the placement phases in milliseconds.
    pub placement_time_ms: f64,
}

impl PlacementStats {
    pub fn clear(&mut self) {
        *self = PlacementStats::default();
    }

    /// Dump the frame's counters at debug level.
    pub fn log_debug(&self) {
        debug!(
            "labels: total={} placed={} rejected={} invisible={} dup={} \
             not_visible={} too_far={} not_ready={} poi_pending={} deferred={} \
             update={:.2}ms place={:.2}ms",
            self.total,
            self.placed,
            self.rejected,
            self.invisible,
            self.duplicates,
            self.not_visible,
            self.too_far,
            self.not_ready,
            self.poi_not_rendered,
            self.deferred,
            self.update_time_ms,
            self.placement_time_ms,
        );
    }
}

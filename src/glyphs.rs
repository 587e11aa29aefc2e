//! Collaborator traits: glyph/font service, POI renderer and the GPU-facing
//! text canvas.
//!
//! Glyph rasterization, font catalogs and icon atlases are black boxes to
//! the placement engine. Charset loading is asynchronous on the host side;
//! from the engine's point of view it is poll-based: request once, skip the
//! label this frame, retry when the status flips to ready.

use glam::Vec2;

use crate::element::{Icon, LabelStyle};
use crate::error::LabelResult;

/// Measured footprint of a shaped text run, in pixels at scale 1.
#[derive(Debug, Clone, Copy)]
pub struct GlyphMeasurement {
    pub width: f32,
    pub height: f32,
}

/// Load status of the glyphs needed for one text/style combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetStatus {
    /// Glyphs still loading; the label is skipped this frame and retried.
    Loading,
    Ready,
    /// The font catalog cannot supply these glyphs.
    Failed,
}

/// Font/glyph service. Measuring is only available once the charset for the
/// text is ready.
pub trait GlyphService {
    /// Kick off (or re-kick) loading of the glyphs for `text`. Idempotent;
    /// completion is observed through [`GlyphService::charset_status`].
    fn request_charset(&mut self, text: &str, style: &LabelStyle);

    fn charset_status(&self, text: &str, style: &LabelStyle) -> CharsetStatus;

    /// Measure the shaped text; `None` while the charset is not ready.
    fn measure_text(&self, text: &str, style: &LabelStyle) -> Option<GlyphMeasurement>;
}

/// Icon/POI renderer.
pub trait PoiRenderer {
    /// Prepare the icon for rendering at the given zoom. Returns whether the
    /// icon is ready; a not-ready icon defers its label to a later frame.
    fn prepare_render(&mut self, icon: &Icon, zoom_level: f32) -> bool;

    /// Emit one icon instance.
    fn render_poi(&mut self, icon: &Icon, screen_pos: Vec2, scale: f32, opacity: f32);
}

/// Placement info for a single glyph of a path label.
#[derive(Debug, Clone, Copy)]
pub struct GlyphPlacement {
    pub screen_pos: Vec2,
    /// Rotation in radians, tangent to the path.
    pub rotation: f32,
    pub scale: f32,
}

/// GPU-facing text sink. Implementations typically batch into a glyph
/// instance buffer; `add_*` fails with `CapacityExceeded` when the buffer is
/// full, which the renderer treats as "skip the rest of this frame".
pub trait TextCanvas {
    /// Drop all instances from the previous frame.
    fn reset(&mut self);

    /// Add a horizontally laid out text run.
    fn add_text(
        &mut self,
        text: &str,
        screen_pos: Vec2,
        scale: f32,
        opacity: f32,
        style: &LabelStyle,
    ) -> LabelResult<()>;

    /// Add a text run following a path, one placement per glyph.
    fn add_path_text(
        &mut self,
        text: &str,
        glyphs: &[GlyphPlacement],
        opacity: f32,
        style: &LabelStyle,
    ) -> LabelResult<()>;
}

//! cartotext: real-time text label placement for tiled 3D map renderers.
//!
//! The crate takes the label candidates of the currently renderable map
//! tiles and decides, every frame, which labels are drawn where: screen
//! projection, priority ordering, collision handling with anchor fallback,
//! cross-tile deduplication, fade animations that survive tile reloads, and
//! soft time budgets for heavily labeled views.
//!
//! Rasterization stays with the host: glyphs, icons and the final draw
//! calls are reached through the [`GlyphService`], [`PoiRenderer`] and
//! [`TextCanvas`] traits. The pipeline is single-threaded; one
//! [`TextElementsRenderer`] serves one view.
//!
//! ```no_run
//! use cartotext::{TextElementsRenderer, TextRendererOptions, ViewState};
//! # fn demo(glyphs: Box<dyn cartotext::GlyphService>,
//! #         pois: Box<dyn cartotext::PoiRenderer>,
//! #         tiles: Vec<cartotext::TileLabels>) -> cartotext::LabelResult<()> {
//! let mut renderer =
//!     TextElementsRenderer::new(1920, 1080, TextRendererOptions::default(), glyphs, pois)?;
//! renderer.place_text(&tiles, &ViewState::default());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod collision;
pub mod element;
pub mod error;
pub mod glyphs;
pub mod group;
pub mod layout;
pub mod placement;
pub mod projection;
pub mod render_state;
pub mod renderer;
pub mod stats;
pub mod tile;
pub mod view_state;

pub use cache::TextElementStateCache;
pub use collision::{CollisionBox, ScreenCollisions, NO_LABEL_ID};
pub use element::{
    GlyphLoadState, GroupId, Icon, LabelKind, LabelShape, LabelStyle, TextElement, TileKey,
};
pub use error::{LabelError, LabelResult};
pub use glyphs::{
    CharsetStatus, GlyphMeasurement, GlyphPlacement, GlyphService, PoiRenderer, TextCanvas,
};
pub use group::{TextElementGroup, TextElementGroupState, TextElementState};
pub use layout::{HorizontalPlacement, LayoutState, TextPlacement, VerticalPlacement};
pub use placement::{PlacementResult, PrePlacementResult};
pub use render_state::{FadingState, RenderState, DEFAULT_FADE_TIME};
pub use renderer::{
    OverlayText, PickResult, PlacedGeometry, PlacedIcon, PlacedLabel, TextElementsRenderer,
    TextRendererOptions, DEFAULT_MAX_VISIBLE_LABELS,
};
pub use stats::PlacementStats;
pub use tile::TileLabels;
pub use view_state::ViewState;

//! Anchor placement for point labels.
//!
//! A point label may offer several alternative anchor placements (e.g.
//! right-of-point, above-point). [`LayoutState`] remembers which placement a
//! label currently uses so it stays put between frames, and placement only
//! falls back to alternatives when the current one collides.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Horizontal anchoring of the text box relative to the anchor point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HorizontalPlacement {
    Left,
    #[default]
    Center,
    Right,
}

/// Vertical anchoring of the text box relative to the anchor point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerticalPlacement {
    Above,
    #[default]
    Center,
    Below,
}

/// One candidate anchor placement for a point label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextPlacement {
    pub horizontal: HorizontalPlacement,
    pub vertical: VerticalPlacement,
}

impl TextPlacement {
    pub const CENTER: TextPlacement = TextPlacement {
        horizontal: HorizontalPlacement::Center,
        vertical: VerticalPlacement::Center,
    };

    /// Offset of the text box center from the anchor point for a box of the
    /// given size, with `margin` pixels of clearance from the anchor.
    pub fn box_offset(&self, width: f32, height: f32, margin: f32) -> Vec2 {
        let x = match self.horizontal {
            HorizontalPlacement::Left => -(width * 0.5 + margin),
            HorizontalPlacement::Center => 0.0,
            HorizontalPlacement::Right => width * 0.5 + margin,
        };
        let y = match self.vertical {
            VerticalPlacement::Above => -(height * 0.5 + margin),
            VerticalPlacement::Center => 0.0,
            VerticalPlacement::Below => height * 0.5 + margin,
        };
        Vec2::new(x, y)
    }
}

/// Tracks which anchor placement a label instance currently uses.
#[derive(Debug, Clone, Default)]
pub struct LayoutState {
    placement: TextPlacement,
}

impl LayoutState {
    pub fn new(placement: TextPlacement) -> Self {
        Self { placement }
    }

    /// The placement used the last time this label was placed.
    pub fn placement(&self) -> TextPlacement {
        self.placement
    }

    pub fn set_placement(&mut self, placement: TextPlacement) {
        self.placement = placement;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_has_no_offset() {
        let offset = TextPlacement::CENTER.box_offset(100.0, 20.0, 2.0);
        assert_eq!(offset, Vec2::ZERO);
    }

    #[test]
    fn test_right_above_offset() {
        let placement = TextPlacement {
            horizontal: HorizontalPlacement::Right,
            vertical: VerticalPlacement::Above,
        };
        let offset = placement.box_offset(100.0, 20.0, 2.0);
        assert!((offset.x - 52.0).abs() < 1e-6);
        assert!((offset.y + 12.0).abs() < 1e-6);
    }
}

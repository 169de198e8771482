//! Resolution-independent watermark placement.
//!
//! A [`NormalizedTransform`] stores the watermark's top-left corner as a
//! fraction of the background's width and height, so the same placement can be
//! applied to backgrounds of any size. Converting back to pixels must use the
//! dimensions of the background being rendered; see [`crate::clamp`].

use serde::{Deserialize, Serialize};

/// Watermark height as a fraction of the background height for the default placement.
pub const DEFAULT_HEIGHT_FRACTION: f64 = 0.2;

/// Zoom factor of one "bigger" step in the editor.
pub const SCALE_STEP_UP: f64 = 1.1;

/// Zoom factor of one "smaller" step in the editor.
pub const SCALE_STEP_DOWN: f64 = 0.9;

/// Degrees of one rotate step in the editor.
pub const ROTATION_STEP_DEGREES: f64 = 15.0;

/// Watermark placement relative to a background.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTransform {
    /// Left edge of the unrotated watermark box, as a fraction of background width.
    pub x: f64,
    /// Top edge of the unrotated watermark box, as a fraction of background height.
    pub y: f64,
    /// Horizontal multiplier on the watermark's natural width.
    pub scale_x: f64,
    /// Vertical multiplier on the watermark's natural height.
    pub scale_y: f64,
    /// Visual rotation around the box center, in degrees.
    ///
    /// Not taken into account when clamping the box to the background.
    #[serde(default, alias = "rotation")]
    pub rotation_degrees: f64,
}

impl Default for NormalizedTransform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation_degrees: 0.0,
        }
    }
}

/// Nine placement presets, each naming where the watermark's center should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    /// Upper-left corner.
    TopLeft,
    /// Middle of the top edge.
    TopCenter,
    /// Upper-right corner.
    TopRight,
    /// Middle of the left edge.
    MiddleLeft,
    /// Center of the background.
    Center,
    /// Middle of the right edge.
    MiddleRight,
    /// Lower-left corner.
    BottomLeft,
    /// Middle of the bottom edge.
    BottomCenter,
    /// Lower-right corner.
    BottomRight,
}

impl Anchor {
    /// All presets, row by row.
    pub const ALL: [Anchor; 9] = [
        Anchor::TopLeft,
        Anchor::TopCenter,
        Anchor::TopRight,
        Anchor::MiddleLeft,
        Anchor::Center,
        Anchor::MiddleRight,
        Anchor::BottomLeft,
        Anchor::BottomCenter,
        Anchor::BottomRight,
    ];

    /// Desired watermark center as `(x, y)` fractions of the background.
    #[must_use]
    pub fn center_fraction(self) -> (f64, f64) {
        match self {
            Anchor::TopLeft => (0.0, 0.0),
            Anchor::TopCenter => (0.5, 0.0),
            Anchor::TopRight => (1.0, 0.0),
            Anchor::MiddleLeft => (0.0, 0.5),
            Anchor::Center => (0.5, 0.5),
            Anchor::MiddleRight => (1.0, 0.5),
            Anchor::BottomLeft => (0.0, 1.0),
            Anchor::BottomCenter => (0.5, 1.0),
            Anchor::BottomRight => (1.0, 1.0),
        }
    }

    /// Parse a preset name such as `"bottom-right"` or `"center"`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase().replace('_', "-");
        let anchor = match normalized.as_str() {
            "top-left" => Anchor::TopLeft,
            "top-center" | "top" => Anchor::TopCenter,
            "top-right" => Anchor::TopRight,
            "middle-left" | "left" => Anchor::MiddleLeft,
            "center" | "middle-center" | "middle" => Anchor::Center,
            "middle-right" | "right" => Anchor::MiddleRight,
            "bottom-left" => Anchor::BottomLeft,
            "bottom-center" | "bottom" => Anchor::BottomCenter,
            "bottom-right" => Anchor::BottomRight,
            _ => return None,
        };
        Some(anchor)
    }
}

impl NormalizedTransform {
    /// Uniform-scale placement with no rotation.
    #[must_use]
    pub fn new(x: f64, y: f64, scale: f64) -> Self {
        Self {
            x,
            y,
            scale_x: scale,
            scale_y: scale,
            rotation_degrees: 0.0,
        }
    }

    /// Default placement used when a watermark is first loaded.
    ///
    /// The watermark is scaled to a fifth of the background height and its box
    /// is centered.
    #[must_use]
    pub fn centered(bg_width: u32, bg_height: u32, wm_width: u32, wm_height: u32) -> Self {
        let scale = if wm_height == 0 {
            1.0
        } else {
            f64::from(bg_height) * DEFAULT_HEIGHT_FRACTION / f64::from(wm_height)
        };
        Self::anchored(Anchor::Center, scale, bg_width, bg_height, wm_width, wm_height)
    }

    /// Place the watermark so its center lands on `anchor`.
    ///
    /// The resulting top-left fraction is kept within `[0, 1 - wm/bg]` on each
    /// axis so the box stays inside the background it was computed against.
    #[must_use]
    pub fn anchored(
        anchor: Anchor,
        scale: f64,
        bg_width: u32,
        bg_height: u32,
        wm_width: u32,
        wm_height: u32,
    ) -> Self {
        let (cx, cy) = anchor.center_fraction();
        let x = top_left_fraction(cx, f64::from(wm_width) * scale, f64::from(bg_width));
        let y = top_left_fraction(cy, f64::from(wm_height) * scale, f64::from(bg_height));
        Self::new(x, y, scale)
    }

    /// Same placement with both scales multiplied by `factor`.
    #[must_use]
    pub fn scaled_by(self, factor: f64) -> Self {
        Self {
            scale_x: self.scale_x * factor,
            scale_y: self.scale_y * factor,
            ..self
        }
    }

    /// Same placement rotated by an extra `degrees`.
    #[must_use]
    pub fn rotated_by(self, degrees: f64) -> Self {
        Self {
            rotation_degrees: self.rotation_degrees + degrees,
            ..self
        }
    }

    /// Same scale and rotation at a new top-left fraction.
    #[must_use]
    pub fn with_position(self, x: f64, y: f64) -> Self {
        Self { x, y, ..self }
    }

    /// Rotation in radians.
    #[must_use]
    pub fn rotation_radians(&self) -> f64 {
        self.rotation_degrees.to_radians()
    }
}

fn top_left_fraction(center: f64, wm_size: f64, bg_size: f64) -> f64 {
    if bg_size <= 0.0 {
        return 0.0;
    }
    let center = center.clamp(0.0, 1.0);
    let relative = wm_size / bg_size;
    let left = center - relative / 2.0;
    // max() last so an oversize watermark pins to 0 instead of going negative
    left.min(1.0 - relative).max(0.0)
}

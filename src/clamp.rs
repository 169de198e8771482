//! Edge clamping: from a normalized transform to a pixel box.
//!
//! The clamp runs the left/top check first and the right/bottom check second.
//! The second check is unconditional, so a watermark wider than the background
//! minus both margins ends up with a negative `x` (likewise for `y`). Rotation is
//! ignored here; the returned box is the unrotated axis-aligned box.

use serde::{Deserialize, Serialize};

use crate::transform::NormalizedTransform;

/// Minimum gap in pixels kept between the watermark box and a background edge.
pub const EDGE_MARGIN: f64 = 4.0;

/// Watermark box in background pixel coordinates, before rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Box width.
    pub width: f64,
    /// Box height.
    pub height: f64,
}

impl PixelBox {
    /// Center point `(cx, cy)`.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Larger of width and height; the blur halo's outer radius.
    #[must_use]
    pub fn max_side(&self) -> f64 {
        self.width.max(self.height)
    }

    /// Whether the box has no drawable area.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// How the watermark's pixel size is derived.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum WatermarkSizing {
    /// Natural watermark size times `scale_x` / `scale_y`.
    #[default]
    Scale,
    /// Width is a fraction of the background's shorter edge, capped at
    /// `max_ratio`; height follows the watermark's aspect ratio.
    ShortEdgeRatio {
        /// Largest allowed width as a fraction of the shorter edge.
        max_ratio: f64,
    },
}

impl WatermarkSizing {
    /// Watermark `(width, height)` in pixels on the given background.
    #[must_use]
    pub fn box_size(
        self,
        transform: &NormalizedTransform,
        bg_width: f64,
        bg_height: f64,
        wm_width: f64,
        wm_height: f64,
    ) -> (f64, f64) {
        match self {
            WatermarkSizing::Scale => (wm_width * transform.scale_x, wm_height * transform.scale_y),
            WatermarkSizing::ShortEdgeRatio { max_ratio } => {
                let base = bg_width.min(bg_height);
                let scale = if bg_width < bg_height {
                    transform.scale_x
                } else {
                    transform.scale_y
                };
                let width = base * scale.min(max_ratio);
                let height = if wm_width > 0.0 {
                    width * wm_height / wm_width
                } else {
                    0.0
                };
                (width, height)
            }
        }
    }
}

/// Compute the clamped watermark box for one background.
#[must_use]
pub fn clamp(
    transform: &NormalizedTransform,
    bg_width: u32,
    bg_height: u32,
    wm_width: u32,
    wm_height: u32,
) -> PixelBox {
    clamp_with_sizing(
        transform,
        WatermarkSizing::Scale,
        bg_width,
        bg_height,
        wm_width,
        wm_height,
    )
}

/// Like [`clamp`], with the box size derived by `sizing`.
#[must_use]
pub fn clamp_with_sizing(
    transform: &NormalizedTransform,
    sizing: WatermarkSizing,
    bg_width: u32,
    bg_height: u32,
    wm_width: u32,
    wm_height: u32,
) -> PixelBox {
    let bg_w = f64::from(bg_width);
    let bg_h = f64::from(bg_height);
    let (width, height) =
        sizing.box_size(transform, bg_w, bg_h, f64::from(wm_width), f64::from(wm_height));

    PixelBox {
        x: clamp_axis(transform.x * bg_w, width, bg_w),
        y: clamp_axis(transform.y * bg_h, height, bg_h),
        width,
        height,
    }
}

fn clamp_axis(mut pos: f64, size: f64, bg_size: f64) -> f64 {
    if pos < 0.0 {
        pos = EDGE_MARGIN;
    }
    if pos + size > bg_size {
        pos = bg_size - size - EDGE_MARGIN;
    }
    pos
}

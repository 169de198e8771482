//! Raster primitives behind the compositor.
//!
//! [`Rasterizer`] is the set of canvas operations the compositor needs: a
//! full-image blur, a radial-gradient erase inside a rectangle
//! (`destination-out`), an underlay (`destination-over`), a rotated scaled draw
//! (`source-over`) and encoding. [`SoftwareRasterizer`] implements them on
//! straight-alpha RGBA buffers with the `image` crate, so everything runs
//! headless and deterministically.

use std::borrow::Cow;
use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::clamp::PixelBox;
use crate::error::{Error, Result};

/// Output container for composited images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossy JPEG, honours the job's quality.
    #[default]
    Jpeg,
    /// Lossless PNG, quality is ignored.
    Png,
}

impl OutputFormat {
    /// File extension used in suggested filenames.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }

    /// Parse `"jpeg"`, `"jpg"` or `"png"` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] for anything else.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Radial gradient from opaque at `center` to transparent at `outer_radius`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialGradient {
    /// Gradient center in canvas pixels.
    pub center: (f64, f64),
    /// Distance at which the gradient reaches zero alpha.
    pub outer_radius: f64,
}

impl RadialGradient {
    /// Mask strength in `[0, 1]` at a point: 1 at the center, 0 at and beyond
    /// the outer radius.
    #[must_use]
    pub fn alpha_at(&self, x: f64, y: f64) -> f64 {
        if self.outer_radius <= 0.0 {
            return 0.0;
        }
        let dist = (x - self.center.0).hypot(y - self.center.1);
        (1.0 - dist / self.outer_radius).clamp(0.0, 1.0)
    }
}

/// Canvas operations used by the compositor.
///
/// Canvases are straight-alpha RGBA buffers. Implementations must not mutate
/// any input other than the `canvas` argument.
pub trait Rasterizer: Send + Sync {
    /// Blurred copy of the whole image.
    fn blur(&self, image: &RgbaImage, radius: u32) -> RgbaImage;

    /// Scale the canvas alpha down by the gradient, for pixels inside `rect` only.
    fn erase_radial(&self, canvas: &mut RgbaImage, rect: &PixelBox, gradient: &RadialGradient);

    /// Composite `under` beneath `canvas`.
    fn underlay(&self, canvas: &mut RgbaImage, under: &RgbaImage);

    /// Draw `image` stretched to `dest`, rotated about the center of `dest`.
    fn draw_rotated(
        &self,
        canvas: &mut RgbaImage,
        image: &RgbaImage,
        dest: &PixelBox,
        rotation_degrees: f64,
        opacity: f32,
    );

    /// Encode the canvas.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the encoder rejects the buffer.
    fn encode(&self, canvas: &RgbaImage, format: OutputFormat, quality: f32) -> Result<Vec<u8>>;
}

/// CPU implementation of [`Rasterizer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareRasterizer;

impl Rasterizer for SoftwareRasterizer {
    fn blur(&self, image: &RgbaImage, radius: u32) -> RgbaImage {
        if radius == 0 {
            return image.clone();
        }
        // a stack blur of radius r is close to a gaussian with sigma r / 2
        #[allow(clippy::cast_precision_loss)]
        let sigma = radius as f32 / 2.0;
        imageops::blur(image, sigma)
    }

    fn erase_radial(&self, canvas: &mut RgbaImage, rect: &PixelBox, gradient: &RadialGradient) {
        let Some((x0, y0, x1, y1)) = covered_pixels(rect, canvas.width(), canvas.height()) else {
            return;
        };
        for py in y0..y1 {
            for px in x0..x1 {
                let mask = gradient.alpha_at(f64::from(px) + 0.5, f64::from(py) + 0.5);
                if mask <= 0.0 {
                    continue;
                }
                let pixel = canvas.get_pixel_mut(px, py);
                pixel[3] = to_channel(f64::from(pixel[3]) * (1.0 - mask));
            }
        }
    }

    fn underlay(&self, canvas: &mut RgbaImage, under: &RgbaImage) {
        let width = canvas.width().min(under.width());
        let height = canvas.height().min(under.height());
        for py in 0..height {
            for px in 0..width {
                let top = *canvas.get_pixel(px, py);
                if top[3] == u8::MAX {
                    continue;
                }
                *canvas.get_pixel_mut(px, py) = over(top, *under.get_pixel(px, py), 1.0);
            }
        }
    }

    fn draw_rotated(
        &self,
        canvas: &mut RgbaImage,
        image: &RgbaImage,
        dest: &PixelBox,
        rotation_degrees: f64,
        opacity: f32,
    ) {
        if dest.is_empty() || image.width() == 0 || image.height() == 0 || opacity <= 0.0 {
            return;
        }

        let texture = shrink_to_box(image, dest);
        let fx = f64::from(texture.width()) / dest.width;
        let fy = f64::from(texture.height()) / dest.height;

        let (cx, cy) = dest.center();
        let (sin, cos) = rotation_degrees.to_radians().sin_cos();
        let half_w = dest.width / 2.0;
        let half_h = dest.height / 2.0;

        // bounding box of the rotated rectangle
        let ext_x = half_w * cos.abs() + half_h * sin.abs();
        let ext_y = half_w * sin.abs() + half_h * cos.abs();
        let bounds = PixelBox {
            x: cx - ext_x,
            y: cy - ext_y,
            width: 2.0 * ext_x,
            height: 2.0 * ext_y,
        };
        let Some((x0, y0, x1, y1)) = covered_pixels(&bounds, canvas.width(), canvas.height())
        else {
            return;
        };

        for py in y0..y1 {
            for px in x0..x1 {
                let dx = f64::from(px) + 0.5 - cx;
                let dy = f64::from(py) + 0.5 - cy;
                // inverse rotation back into the unrotated box
                let lx = dx * cos + dy * sin + half_w;
                let ly = -dx * sin + dy * cos + half_h;
                if lx < 0.0 || ly < 0.0 || lx >= dest.width || ly >= dest.height {
                    continue;
                }
                let src = sample_bilinear(&texture, lx * fx, ly * fy);
                if src[3] == 0 {
                    continue;
                }
                let dst = *canvas.get_pixel(px, py);
                *canvas.get_pixel_mut(px, py) = over(src, dst, opacity);
            }
        }
    }

    fn encode(&self, canvas: &RgbaImage, format: OutputFormat, quality: f32) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        match format {
            OutputFormat::Jpeg => {
                let rgb = flatten_to_rgb(canvas);
                let mut encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, jpeg_quality(quality));
                encoder.encode_image(&rgb).map_err(Error::Encode)?;
            }
            OutputFormat::Png => {
                canvas
                    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                    .map_err(Error::Encode)?;
            }
        }
        Ok(bytes)
    }
}

/// Map a `0.0..=1.0` quality onto the JPEG encoder's `1..=100` scale.
#[must_use]
pub fn jpeg_quality(quality: f32) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        (quality * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

/// Pixel index range `[x0, x1) x [y0, y1)` whose centers fall inside `rect`,
/// clipped to the canvas.
fn covered_pixels(rect: &PixelBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if rect.is_empty() {
        return None;
    }
    let x0 = first_center_at_or_after(rect.x, width);
    let y0 = first_center_at_or_after(rect.y, height);
    let x1 = first_center_at_or_after(rect.x + rect.width, width);
    let y1 = first_center_at_or_after(rect.y + rect.height, height);
    (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
}

fn first_center_at_or_after(edge: f64, limit: u32) -> u32 {
    let idx = (edge - 0.5).ceil().clamp(0.0, f64::from(limit));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        idx as u32
    }
}

/// Downscale `image` toward the box size; never enlarges.
///
/// Enlarged draws sample the source directly; the texture is never larger
/// than the watermark itself.
fn shrink_to_box<'a>(image: &'a RgbaImage, dest: &PixelBox) -> Cow<'a, RgbaImage> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (w, h) = (
        (dest.width.ceil().max(1.0).min(f64::from(image.width()))) as u32,
        (dest.height.ceil().max(1.0).min(f64::from(image.height()))) as u32,
    );
    if (w, h) == image.dimensions() {
        return Cow::Borrowed(image);
    }
    Cow::Owned(imageops::resize(image, w, h, FilterType::Triangle))
}

fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let max_x = image.width() - 1;
    let max_y = image.height() - 1;
    let sx = (x - 0.5).max(0.0);
    let sy = (y - 0.5).max(0.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (x0, y0) = ((sx.floor() as u32).min(max_x), (sy.floor() as u32).min(max_y));
    let x1 = (x0 + 1).min(max_x);
    let y1 = (y0 + 1).min(max_y);
    let tx = sx - sx.floor();
    let ty = sy - sy.floor();

    let corners = [
        (image.get_pixel(x0, y0), (1.0 - tx) * (1.0 - ty)),
        (image.get_pixel(x1, y0), tx * (1.0 - ty)),
        (image.get_pixel(x0, y1), (1.0 - tx) * ty),
        (image.get_pixel(x1, y1), tx * ty),
    ];

    // interpolate premultiplied so transparent texels do not bleed color
    let mut acc = [0.0f64; 4];
    for (pixel, weight) in corners {
        let a = f64::from(pixel[3]) / 255.0;
        for (ch, slot) in acc.iter_mut().take(3).enumerate() {
            *slot += f64::from(pixel[ch]) * a * weight;
        }
        acc[3] += a * weight;
    }
    if acc[3] <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    Rgba([
        to_channel(acc[0] / acc[3]),
        to_channel(acc[1] / acc[3]),
        to_channel(acc[2] / acc[3]),
        to_channel(acc[3] * 255.0),
    ])
}

/// Straight-alpha `src over dst`, with `src` alpha scaled by `opacity`.
fn over(src: Rgba<u8>, dst: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let sa = f64::from(src[3]) / 255.0 * f64::from(opacity.clamp(0.0, 1.0));
    let da = f64::from(dst[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let mut out = [0u8; 4];
    for ch in 0..3 {
        let s = f64::from(src[ch]);
        let d = f64::from(dst[ch]);
        out[ch] = to_channel((s * sa + d * da * (1.0 - sa)) / out_a);
    }
    out[3] = to_channel(out_a * 255.0);
    Rgba(out)
}

fn flatten_to_rgb(canvas: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(canvas.width(), canvas.height(), |x, y| {
        let p = canvas.get_pixel(x, y);
        Rgb([p[0], p[1], p[2]])
    })
}

fn to_channel(value: f64) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        value.round().clamp(0.0, 255.0) as u8
    }
}

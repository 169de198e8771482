//! Rasterizes and encodes one watermarked image.
//!
//! Drawing order is fixed: background, then (with the blur halo) erase the
//! sharp background through a radial gradient inside the watermark box and
//! slide a blurred copy underneath, then the rotated watermark on top.

use image::RgbaImage;

use crate::clamp::PixelBox;
use crate::error::Result;
use crate::raster::{OutputFormat, RadialGradient, Rasterizer, SoftwareRasterizer};

/// Blur radius of the halo, in pixels.
pub const HALO_BLUR_RADIUS: u32 = 20;

/// Per-image drawing and encoding options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeOptions {
    /// Show a blurred, radially faded patch of background behind the watermark.
    pub blur_halo: bool,
    /// Encoder quality in `[0.5, 1.0]`; only JPEG uses it.
    pub quality: f32,
    /// Output container.
    pub format: OutputFormat,
    /// Watermark opacity in `[0, 1]`.
    pub opacity: f32,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            blur_halo: false,
            quality: 0.9,
            format: OutputFormat::Jpeg,
            opacity: 1.0,
        }
    }
}

/// Encoded output buffer with a single owner.
///
/// The bytes are freed when this value is dropped, whichever path drops it.
#[derive(Debug)]
pub struct EncodedImage {
    bytes: Vec<u8>,
    format: OutputFormat,
}

impl EncodedImage {
    /// Wrap already-encoded bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>, format: OutputFormat) -> Self {
        Self { bytes, format }
    }

    /// The encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Container of the bytes.
    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Take ownership of the bytes.
    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

impl Drop for EncodedImage {
    fn drop(&mut self) {
        if !self.bytes.is_empty() {
            tracing::trace!(bytes = self.bytes.len(), "released encoded buffer");
        }
    }
}

/// Draws watermarks with a [`Rasterizer`] backend.
#[derive(Debug, Clone, Default)]
pub struct Compositor<R = SoftwareRasterizer> {
    rasterizer: R,
}

impl Compositor<SoftwareRasterizer> {
    /// Compositor backed by the CPU rasterizer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rasterizer: SoftwareRasterizer,
        }
    }
}

impl<R: Rasterizer> Compositor<R> {
    /// Compositor backed by a custom rasterizer.
    #[must_use]
    pub fn with_rasterizer(rasterizer: R) -> Self {
        Self { rasterizer }
    }

    /// The backend in use.
    #[must_use]
    pub fn rasterizer(&self) -> &R {
        &self.rasterizer
    }

    /// Draw one watermarked canvas without encoding it.
    ///
    /// `watermark_box` must already be clamped against `background`'s size.
    #[must_use]
    pub fn render(
        &self,
        background: &RgbaImage,
        watermark: &RgbaImage,
        watermark_box: &PixelBox,
        rotation_degrees: f64,
        opts: &CompositeOptions,
    ) -> RgbaImage {
        let mut canvas = background.clone();

        if opts.blur_halo && !watermark_box.is_empty() {
            let blurred = self.rasterizer.blur(background, HALO_BLUR_RADIUS);
            let gradient = RadialGradient {
                center: watermark_box.center(),
                outer_radius: watermark_box.max_side(),
            };
            self.rasterizer
                .erase_radial(&mut canvas, watermark_box, &gradient);
            self.rasterizer.underlay(&mut canvas, &blurred);
        }

        self.rasterizer.draw_rotated(
            &mut canvas,
            watermark,
            watermark_box,
            rotation_degrees,
            opts.opacity,
        );
        canvas
    }

    /// Draw and encode one watermarked image.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Encode`] if encoding fails.
    pub fn composite(
        &self,
        background: &RgbaImage,
        watermark: &RgbaImage,
        watermark_box: &PixelBox,
        rotation_degrees: f64,
        opts: &CompositeOptions,
    ) -> Result<EncodedImage> {
        let canvas = self.render(background, watermark, watermark_box, rotation_degrees, opts);
        let bytes = self.rasterizer.encode(&canvas, opts.format, opts.quality)?;
        Ok(EncodedImage::new(bytes, opts.format))
    }
}

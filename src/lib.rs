//! Stamp one watermark onto many images.
//!
//! Placement is resolution independent: a [`NormalizedTransform`] stores the
//! watermark's top-left corner as fractions of the background size plus a
//! scale and a rotation. For every background the placement is turned into a
//! pixel box by [`clamp`], which keeps a 4 px margin from the edges, and the
//! [`Compositor`] draws the background, an optional blur halo, and the rotated
//! watermark before encoding JPEG or PNG.
//!
//! [`BatchPipeline`] exports whole jobs in bounded batches with progress
//! events, cancellation and a choice of fail-fast or per-item isolation.
//!
//! # Quick Start
//!
//! ```no_run
//! use watermark_batch::{
//!     BatchJob, BatchPipeline, DirectorySink, JobConfig, NoopObserver, NormalizedTransform,
//!     SourceImage, WatermarkImage, CancellationToken,
//! };
//!
//! let watermark = WatermarkImage::open("logo.png".as_ref()).expect("watermark");
//! let sources = vec![SourceImage::open("photo.jpg".as_ref()).expect("photo")];
//! let config = JobConfig {
//!     transform: NormalizedTransform::new(0.8, 0.85, 0.5),
//!     blur_halo: true,
//!     ..JobConfig::default()
//! };
//!
//! let job = BatchJob::new(sources, watermark, config);
//! let mut sink = DirectorySink::new("out");
//! let report = BatchPipeline::new()
//!     .run(&job, &mut sink, &mut NoopObserver, &CancellationToken::new())
//!     .expect("export failed");
//! println!("{} of {} delivered", report.delivered, report.total);
//! ```
//!
//! # Single image
//!
//! ```no_run
//! use watermark_batch::{clamp, CompositeOptions, Compositor, NormalizedTransform};
//!
//! let bg = image::open("photo.jpg").unwrap().to_rgba8();
//! let wm = image::open("logo.png").unwrap().to_rgba8();
//! let placement = NormalizedTransform::centered(bg.width(), bg.height(), wm.width(), wm.height());
//! let wm_box = clamp(&placement, bg.width(), bg.height(), wm.width(), wm.height());
//! let encoded = Compositor::new()
//!     .composite(&bg, &wm, &wm_box, placement.rotation_degrees, &CompositeOptions::default())
//!     .unwrap();
//! std::fs::write("watermarked.jpeg", encoded.as_bytes()).unwrap();
//! ```

#![deny(missing_docs)]

pub mod clamp;
pub mod compositor;
pub mod debounce;
pub mod error;
mod files;
pub mod pipeline;
pub mod profiler;
pub mod raster;
pub mod sink;
pub mod transform;

pub use clamp::{clamp, clamp_with_sizing, PixelBox, WatermarkSizing, EDGE_MARGIN};
pub use compositor::{CompositeOptions, Compositor, EncodedImage};
pub use debounce::{DebounceHandle, Debouncer};
pub use error::{Error, Result};
pub use files::{collect_inputs, is_supported_image};
pub use pipeline::{
    BatchJob, BatchPipeline, BatchReport, BatchSizing, CancellationToken, CompositeResult,
    reference_source, FailurePolicy, JobConfig, NoopObserver, PipelineObserver, Progress,
    SourceImage, WatermarkImage,
};
pub use profiler::{BatchHints, HostCapabilities};
pub use raster::{OutputFormat, Rasterizer, SoftwareRasterizer};
pub use sink::{DirectorySink, MemorySink, ResultSink};
pub use transform::{Anchor, NormalizedTransform};

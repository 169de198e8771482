//! Batch export: many backgrounds, one watermark, one placement.
//!
//! Sources are split into ordered batches. Each batch fans out over a bounded
//! rayon pool and is joined completely before the next batch starts. Results
//! are handed to a [`ResultSink`] one by one, with a progress event before each
//! delivery.
//!
//! Under [`FailurePolicy::FailFast`] (the default) the first failing item stops
//! the run: earlier batches stay delivered, nothing from the failing batch is
//! delivered, and no later batch runs. [`FailurePolicy::Isolate`] reports the
//! failure and keeps going.

use std::io::Cursor;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clamp::{clamp_with_sizing, WatermarkSizing};
use crate::compositor::{CompositeOptions, Compositor, EncodedImage};
use crate::error::{Error, Result};
use crate::profiler::HostCapabilities;
use crate::raster::{OutputFormat, Rasterizer, SoftwareRasterizer};
use crate::sink::{MemorySink, ResultSink};
use crate::transform::NormalizedTransform;

/// Batch size used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Pause between two batches.
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Lowest accepted encoder quality.
pub const MIN_QUALITY: f32 = 0.5;

/// Highest accepted encoder quality.
pub const MAX_QUALITY: f32 = 1.0;

/// One background image, kept encoded until it is composited.
#[derive(Debug, Clone)]
pub struct SourceImage {
    id: String,
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl SourceImage {
    /// Wrap encoded bytes, reading the dimensions from the image header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the header cannot be read.
    pub fn from_bytes(id: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let id = id.into();
        let (width, height) = image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| Error::decode(format!("source image {id}"), e))?;
        Ok(Self {
            id,
            bytes,
            width,
            height,
        })
    }

    /// Wrap encoded bytes whose dimensions the caller already knows.
    ///
    /// Nothing is checked until the image is decoded for compositing.
    #[must_use]
    pub fn from_raw_parts(id: impl Into<String>, bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            bytes,
            width,
            height,
        }
    }

    /// Read an image file; its file name becomes the id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, or [`Error::Decode`]
    /// if its header is not a supported image.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(Self::id_for_path(path), bytes)
    }

    /// Id [`SourceImage::open`] gives a file: its file name.
    #[must_use]
    pub fn id_for_path(path: &Path) -> String {
        path.file_name().map_or_else(
            || path.display().to_string(),
            |f| f.to_string_lossy().into_owned(),
        )
    }

    /// Caller-supplied identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Encoded bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Natural width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Natural height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Encoded size in megabytes.
    #[must_use]
    pub fn size_mb(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let len = self.bytes.len() as f64;
        len / (1024.0 * 1024.0)
    }

    /// Decode to RGBA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the bytes are not a supported image.
    pub fn decode(&self) -> Result<RgbaImage> {
        image::load_from_memory(&self.bytes)
            .map(|img| img.to_rgba8())
            .map_err(|e| Error::decode(format!("source image {}", self.id), e))
    }
}

/// The shared watermark raster. Read-only for the whole batch.
#[derive(Debug, Clone)]
pub struct WatermarkImage {
    image: RgbaImage,
}

impl WatermarkImage {
    /// Use an already decoded raster.
    #[must_use]
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Decode encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the bytes are not a supported image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::decode("watermark", e))?
            .to_rgba8();
        Ok(Self { image })
    }

    /// Read and decode an image file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Decode`].
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// The decoded raster.
    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Natural width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Natural height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Where the batch size comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchSizing {
    /// A fixed number of images per batch.
    Fixed(usize),
    /// Ask the host profiler, using the job's average input size.
    Adaptive,
}

impl Default for BatchSizing {
    fn default() -> Self {
        BatchSizing::Fixed(DEFAULT_BATCH_SIZE)
    }
}

/// What happens when one item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the whole run at the first failure.
    #[default]
    FailFast,
    /// Report the failure and continue with the remaining items.
    Isolate,
}

/// Request-scoped job settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobConfig {
    /// Placement shared by every image.
    pub transform: NormalizedTransform,
    /// How the watermark's pixel size is derived.
    pub sizing: WatermarkSizing,
    /// Encoder quality in `[0.5, 1.0]`.
    pub quality: f32,
    /// Draw the blur halo behind the watermark.
    pub blur_halo: bool,
    /// Watermark opacity in `[0, 1]`.
    pub opacity: f32,
    /// Output container.
    pub format: OutputFormat,
    /// Batch partitioning.
    pub batch_size: BatchSizing,
    /// Worker threads; defaults to the batch size or the profiler's hint.
    pub concurrency: Option<usize>,
    /// Failure handling.
    pub failure_policy: FailurePolicy,
    /// Extra attempts for an item before it counts as failed.
    pub max_retries: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            transform: NormalizedTransform::default(),
            sizing: WatermarkSizing::default(),
            quality: 0.9,
            blur_halo: false,
            opacity: 1.0,
            format: OutputFormat::default(),
            batch_size: BatchSizing::default(),
            concurrency: None,
            failure_policy: FailurePolicy::default(),
            max_retries: 0,
        }
    }
}

impl JobConfig {
    /// Parse a JSON job configuration. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON job configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Config`].
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check every field is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_QUALITY..=MAX_QUALITY).contains(&self.quality) {
            return Err(invalid(format!(
                "quality {} outside {MIN_QUALITY}..={MAX_QUALITY}",
                self.quality
            )));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(invalid(format!("opacity {} outside 0..=1", self.opacity)));
        }
        if self.batch_size == BatchSizing::Fixed(0) {
            return Err(invalid("batch size must be at least 1".to_string()));
        }
        if self.concurrency == Some(0) {
            return Err(invalid("concurrency must be at least 1".to_string()));
        }
        let t = &self.transform;
        if !(t.x.is_finite() && t.y.is_finite() && t.rotation_degrees.is_finite()) {
            return Err(invalid("transform position and rotation must be finite".to_string()));
        }
        for (name, scale) in [("scaleX", t.scale_x), ("scaleY", t.scale_y)] {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(invalid(format!("{name} {scale} must be a positive number")));
            }
        }
        if let WatermarkSizing::ShortEdgeRatio { max_ratio } = self.sizing {
            if !(max_ratio.is_finite() && max_ratio > 0.0) {
                return Err(invalid(format!("maxRatio {max_ratio} must be a positive number")));
            }
        }
        Ok(())
    }

    /// Drawing options for each image.
    #[must_use]
    pub fn composite_options(&self) -> CompositeOptions {
        CompositeOptions {
            blur_halo: self.blur_halo,
            quality: self.quality,
            format: self.format,
            opacity: self.opacity,
        }
    }
}

fn invalid(msg: String) -> Error {
    Error::InvalidConfig(msg)
}

/// Everything one export needs.
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Backgrounds, in output order.
    pub sources: Vec<SourceImage>,
    /// The watermark stamped on every background.
    pub watermark: WatermarkImage,
    /// Placement and output settings.
    pub config: JobConfig,
}

impl BatchJob {
    /// New job.
    #[must_use]
    pub fn new(sources: Vec<SourceImage>, watermark: WatermarkImage, config: JobConfig) -> Self {
        Self {
            sources,
            watermark,
            config,
        }
    }

    /// Average encoded source size in megabytes.
    #[must_use]
    pub fn average_size_mb(&self) -> f64 {
        if self.sources.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = self.sources.len() as f64;
        self.sources.iter().map(SourceImage::size_mb).sum::<f64>() / count
    }
}

/// One finished image on its way to the sink.
#[derive(Debug)]
pub struct CompositeResult {
    /// Zero-based position of the source in the job.
    pub index: usize,
    /// Encoded output, released when this result is dropped.
    pub image: EncodedImage,
    /// `watermarked-{index + 1}.{ext}`.
    pub suggested_filename: String,
}

impl CompositeResult {
    /// Result for source `index`, named after its 1-based position.
    #[must_use]
    pub fn new(index: usize, image: EncodedImage) -> Self {
        let suggested_filename = output_filename(index, image.format());
        Self {
            index,
            image,
            suggested_filename,
        }
    }
}

/// Output file name for the source at zero-based `index`.
#[must_use]
pub fn output_filename(index: usize, format: OutputFormat) -> String {
    format!("watermarked-{}.{}", index + 1, format.extension())
}

/// Items finished so far out of the job total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Items processed, delivered or failed.
    pub completed: usize,
    /// Items that produced a result for the sink.
    pub delivered: usize,
    /// Items in the job.
    pub total: usize,
}

impl Progress {
    /// Share of the job delivered, in `[0, 100]`.
    ///
    /// Failed items advance `completed` but not the percentage, so 100 is
    /// reached only when every item was delivered.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = self.delivered as f64 / self.total as f64 * 100.0;
        pct.min(100.0)
    }
}

/// Summary of a run that was not aborted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Items in the job.
    pub total: usize,
    /// Items handed to the sink.
    pub delivered: usize,
    /// Indices of items that failed (only under [`FailurePolicy::Isolate`]).
    pub failed: Vec<usize>,
    /// Batches that ran.
    pub batches: usize,
    /// The run stopped early because its token was cancelled.
    pub cancelled: bool,
}

impl BatchReport {
    /// Every item delivered.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed.is_empty() && self.delivered == self.total
    }
}

/// Callbacks fired while a run progresses. All methods default to no-ops.
pub trait PipelineObserver {
    /// A batch covering `items` is about to be composited.
    fn on_batch_start(&mut self, _batch: usize, _items: Range<usize>) {}

    /// One more item finished.
    fn on_progress(&mut self, _progress: Progress) {}

    /// An item failed and the run continues.
    fn on_item_error(&mut self, _index: usize, _error: &Error) {}

    /// The run finished without aborting.
    fn on_complete(&mut self, _report: &BatchReport) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Stops a run before its next batch.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Fresh, not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect before the next batch starts.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// First source with known, non-zero dimensions.
///
/// Unreadable inputs kept as 0×0 placeholders are skipped.
#[must_use]
pub fn reference_source(sources: &[SourceImage]) -> Option<&SourceImage> {
    sources.iter().find(|s| s.width() > 0 && s.height() > 0)
}

/// Split `len` items into consecutive ranges of at most `batch_size`.
#[must_use]
pub fn partition(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Batch size and worker count for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    /// Items per batch.
    pub batch_size: usize,
    /// Worker threads.
    pub concurrency: usize,
}

/// Drives the compositor over a [`BatchJob`].
#[derive(Debug, Clone)]
pub struct BatchPipeline<R = SoftwareRasterizer> {
    compositor: Compositor<R>,
    batch_pause: Duration,
    host: Option<HostCapabilities>,
}

impl Default for BatchPipeline<SoftwareRasterizer> {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchPipeline<SoftwareRasterizer> {
    /// Pipeline using the CPU rasterizer and the default pause.
    #[must_use]
    pub fn new() -> Self {
        Self::with_compositor(Compositor::new())
    }
}

impl<R: Rasterizer> BatchPipeline<R> {
    /// Pipeline around a custom compositor.
    #[must_use]
    pub fn with_compositor(compositor: Compositor<R>) -> Self {
        Self {
            compositor,
            batch_pause: DEFAULT_BATCH_PAUSE,
            host: None,
        }
    }

    /// Change the pause between batches.
    #[must_use]
    pub fn batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    /// Use fixed host capabilities for adaptive sizing instead of probing.
    #[must_use]
    pub fn host(mut self, host: HostCapabilities) -> Self {
        self.host = Some(host);
        self
    }

    /// Resolve batch size and concurrency for `job`.
    #[must_use]
    pub fn plan(&self, job: &BatchJob) -> BatchPlan {
        let (batch_size, hinted) = match job.config.batch_size {
            BatchSizing::Fixed(n) => (n.max(1), n.max(1)),
            BatchSizing::Adaptive => {
                let host = self.host.unwrap_or_else(HostCapabilities::detect);
                let hints = host.suggest(job.average_size_mb());
                (hints.batch_size, hints.concurrency)
            }
        };
        BatchPlan {
            batch_size,
            concurrency: job.config.concurrency.unwrap_or(hinted).max(1),
        }
    }

    /// Composite one source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] or [`Error::Encode`].
    pub fn process(&self, job: &BatchJob, index: usize) -> Result<CompositeResult> {
        let config = &job.config;
        let source = job.sources.get(index).ok_or_else(|| {
            invalid(format!("no source at index {index} ({} in job)", job.sources.len()))
        })?;
        let background = source.decode()?;
        let watermark_box = clamp_with_sizing(
            &config.transform,
            config.sizing,
            background.width(),
            background.height(),
            job.watermark.width(),
            job.watermark.height(),
        );
        debug!(index, id = source.id(), ?watermark_box, "compositing");

        let image = self.compositor.composite(
            &background,
            job.watermark.image(),
            &watermark_box,
            config.transform.rotation_degrees,
            &config.composite_options(),
        )?;
        Ok(CompositeResult::new(index, image))
    }

    fn process_with_retries(&self, job: &BatchJob, index: usize) -> Result<CompositeResult> {
        let mut attempt = 0;
        loop {
            match self.process(job, index) {
                Ok(result) => return Ok(result),
                Err(e) if attempt < job.config.max_retries => {
                    attempt += 1;
                    warn!(index, attempt, error = %e, "retrying item");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the whole job, delivering every result to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a bad job, [`Error::WorkerPool`] if
    /// the pool cannot start, and under [`FailurePolicy::FailFast`]
    /// [`Error::ItemFailed`] for the first item that fails to composite or
    /// deliver.
    pub fn run(
        &self,
        job: &BatchJob,
        sink: &mut dyn ResultSink,
        observer: &mut dyn PipelineObserver,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        job.config.validate()?;
        let plan = self.plan(job);
        let total = job.sources.len();
        let batches = partition(total, plan.batch_size);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(plan.concurrency)
            .thread_name(|i| format!("watermark-{i}"))
            .build()?;

        info!(
            total,
            batch_size = plan.batch_size,
            concurrency = plan.concurrency,
            batches = batches.len(),
            "starting batch export"
        );

        let mut report = BatchReport {
            total,
            ..BatchReport::default()
        };
        let mut completed = 0;

        for (batch, items) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(batch, delivered = report.delivered, "export cancelled");
                report.cancelled = true;
                break;
            }
            observer.on_batch_start(batch, items.clone());

            let outcomes: Vec<Result<CompositeResult>> = pool.install(|| {
                items
                    .clone()
                    .into_par_iter()
                    .map(|index| self.process_with_retries(job, index))
                    .collect()
            });
            report.batches += 1;

            match job.config.failure_policy {
                FailurePolicy::FailFast => {
                    let results = outcomes
                        .into_iter()
                        .zip(items.clone())
                        .map(|(outcome, index)| outcome.map_err(|e| item_failed(index, e)))
                        .collect::<Result<Vec<_>>>()?;
                    for result in results {
                        completed += 1;
                        observer.on_progress(Progress {
                            completed,
                            delivered: completed,
                            total,
                        });
                        let index = result.index;
                        sink.deliver(result).map_err(|e| item_failed(index, e))?;
                        report.delivered += 1;
                    }
                }
                FailurePolicy::Isolate => {
                    for (outcome, index) in outcomes.into_iter().zip(items.clone()) {
                        completed += 1;
                        match outcome.and_then(|result| sink.deliver(result)) {
                            Ok(()) => report.delivered += 1,
                            Err(e) => {
                                warn!(index, error = %e, "item failed, continuing");
                                observer.on_item_error(index, &e);
                                report.failed.push(index);
                            }
                        }
                        observer.on_progress(Progress {
                            completed,
                            delivered: report.delivered,
                            total,
                        });
                    }
                }
            }
            debug!(batch, completed, total, "batch finished");

            if batch + 1 < batches.len() && !self.batch_pause.is_zero() {
                std::thread::sleep(self.batch_pause);
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "batch export finished"
        );
        observer.on_complete(&report);
        Ok(report)
    }

    /// Run the job and collect every result in memory.
    ///
    /// # Errors
    ///
    /// Same as [`BatchPipeline::run`].
    pub fn run_collect(&self, job: &BatchJob) -> Result<Vec<CompositeResult>> {
        let mut sink = MemorySink::new();
        self.run(job, &mut sink, &mut NoopObserver, &CancellationToken::new())?;
        Ok(sink.into_results())
    }
}

fn item_failed(index: usize, source: Error) -> Error {
    warn!(index, error = %source, "item failed, stopping export");
    Error::ItemFailed {
        index,
        source: Box::new(source),
    }
}

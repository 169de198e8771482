use std::io::Cursor;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use watermark_batch::profiler::suggest;
use watermark_batch::{
    clamp, BatchHints, BatchJob, BatchPipeline, BatchReport, BatchSizing, CancellationToken,
    Compositor, DirectorySink, Error, FailurePolicy, HostCapabilities, JobConfig, MemorySink,
    NormalizedTransform, OutputFormat, PipelineObserver, PixelBox, Progress, Rasterizer,
    ResultSink, SoftwareRasterizer, SourceImage, WatermarkImage,
};

fn encoded_background(w: u32, h: u32, seed: u8) -> Vec<u8> {
    let img = RgbaImage::from_fn(w, h, |x, y| {
        let v = u8::try_from((x + y) % 7 * 30).unwrap().wrapping_add(seed);
        Rgba([v, 255 - v, seed, 255])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn sources(n: usize) -> Vec<SourceImage> {
    (0..n)
        .map(|i| {
            let seed = u8::try_from(i * 10).unwrap();
            SourceImage::from_bytes(format!("img-{i}.png"), encoded_background(48, 36, seed))
                .unwrap()
        })
        .collect()
}

fn watermark() -> WatermarkImage {
    WatermarkImage::from_image(RgbaImage::from_pixel(12, 6, Rgba([255, 255, 255, 220])))
}

fn job(n: usize) -> BatchJob {
    let config = JobConfig {
        transform: NormalizedTransform::new(0.9, 0.9, 1.0),
        ..JobConfig::default()
    };
    BatchJob::new(sources(n), watermark(), config)
}

fn pipeline() -> BatchPipeline {
    BatchPipeline::new().batch_pause(Duration::ZERO)
}

#[derive(Default)]
struct Recorder {
    batches: Vec<Range<usize>>,
    progress: Vec<Progress>,
    errors: Vec<usize>,
    completed: Option<BatchReport>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl PipelineObserver for Recorder {
    fn on_batch_start(&mut self, _batch: usize, items: Range<usize>) {
        self.batches.push(items);
    }

    fn on_progress(&mut self, progress: Progress) {
        self.progress.push(progress);
        if let Some((after, token)) = &self.cancel_after {
            if progress.completed == *after {
                token.cancel();
            }
        }
    }

    fn on_item_error(&mut self, index: usize, _error: &Error) {
        self.errors.push(index);
    }

    fn on_complete(&mut self, report: &BatchReport) {
        self.completed = Some(report.clone());
    }
}

fn delivered_indices(sink: &MemorySink) -> Vec<usize> {
    sink.results().iter().map(|r| r.index).collect()
}

#[test]
fn clamp_matches_documented_examples() {
    let t = NormalizedTransform::new(0.97, 0.97, 0.5);
    let b = clamp(&t, 1000, 800, 200, 100);
    assert!((b.x - 896.0).abs() < 1e-6);
    assert!((b.y - 746.0).abs() < 1e-6);

    let t = NormalizedTransform::new(-0.1, 0.5, 0.5);
    let b = clamp(&t, 1000, 800, 200, 100);
    assert!((b.x - 4.0).abs() < 1e-6);
}

#[test]
fn profiler_matches_documented_examples() {
    assert_eq!(
        suggest(3.0, 8, 8.0),
        BatchHints {
            batch_size: 4,
            concurrency: 10
        }
    );
    assert_eq!(
        suggest(8.0, 8, 8.0),
        BatchHints {
            batch_size: 3,
            concurrency: 8
        }
    );
}

#[test]
fn twelve_items_run_in_three_ordered_batches() {
    let job = job(12);
    let mut sink = MemorySink::new();
    let mut rec = Recorder::default();
    let report = pipeline()
        .run(&job, &mut sink, &mut rec, &CancellationToken::new())
        .unwrap();

    assert_eq!(rec.batches, vec![0..5, 5..10, 10..12]);
    assert_eq!(report.batches, 3);
    assert!(report.is_success());
    assert_eq!(delivered_indices(&sink), (0..12).collect::<Vec<_>>());

    let at_batch_ends: Vec<f64> = [4, 9, 11]
        .iter()
        .map(|&i| rec.progress[i].percent())
        .collect();
    assert!((at_batch_ends[0] - 41.67).abs() < 0.01);
    assert!((at_batch_ends[1] - 83.33).abs() < 0.01);
    assert!((at_batch_ends[2] - 100.0).abs() < f64::EPSILON);

    let percents: Vec<f64> = rec.progress.iter().map(Progress::percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(rec.completed, Some(report));

    let names: Vec<_> = sink
        .results()
        .iter()
        .map(|r| r.suggested_filename.clone())
        .collect();
    assert_eq!(names[0], "watermarked-1.jpeg");
    assert_eq!(names[11], "watermarked-12.jpeg");
}

#[test]
fn fail_fast_stops_after_the_failing_batch() {
    let mut job = job(12);
    job.sources[6] = SourceImage::from_raw_parts("broken.png", b"garbage".to_vec(), 48, 36);
    let mut sink = MemorySink::new();
    let mut rec = Recorder::default();

    let err = pipeline()
        .run(&job, &mut sink, &mut rec, &CancellationToken::new())
        .unwrap_err();

    match err {
        Error::ItemFailed { index, source } => {
            assert_eq!(index, 6);
            assert!(matches!(*source, Error::Decode { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(delivered_indices(&sink), vec![0, 1, 2, 3, 4]);
    assert_eq!(rec.batches, vec![0..5, 5..10]);
    assert_eq!(rec.progress.len(), 5);
    assert!(rec.completed.is_none());
}

#[test]
fn isolate_reports_the_failure_and_finishes() {
    let mut job = job(12);
    job.config.failure_policy = FailurePolicy::Isolate;
    job.sources[6] = SourceImage::from_raw_parts("broken.png", b"garbage".to_vec(), 48, 36);
    let mut sink = MemorySink::new();
    let mut rec = Recorder::default();

    let report = pipeline()
        .run(&job, &mut sink, &mut rec, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.delivered, 11);
    assert_eq!(report.failed, vec![6]);
    assert!(!report.is_success());
    assert_eq!(rec.errors, vec![6]);
    assert_eq!(rec.progress.len(), 12);
    assert_eq!(rec.progress[11].completed, 12);
    assert_eq!(rec.progress[11].delivered, 11);
    assert!(rec.progress.iter().all(|p| p.percent() < 100.0));
    assert!((rec.progress[11].percent() - 91.67).abs() < 0.01);
    let percents: Vec<f64> = rec.progress.iter().map(Progress::percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert!(!delivered_indices(&sink).contains(&6));
}

struct FailingSink {
    accept: usize,
    inner: MemorySink,
}

impl ResultSink for FailingSink {
    fn deliver(&mut self, result: watermark_batch::CompositeResult) -> watermark_batch::Result<()> {
        if self.inner.results().len() == self.accept {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "disk full",
            )));
        }
        self.inner.deliver(result)
    }
}

#[test]
fn delivery_failure_stops_fail_fast_run() {
    let job = job(6);
    let mut sink = FailingSink {
        accept: 2,
        inner: MemorySink::new(),
    };
    let err = pipeline()
        .run(&job, &mut sink, &mut Recorder::default(), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::ItemFailed { index: 2, .. }));
    assert_eq!(delivered_indices(&sink.inner), vec![0, 1]);
}

#[test]
fn cancellation_takes_effect_before_next_batch() {
    let job = job(12);
    let token = CancellationToken::new();
    let mut rec = Recorder {
        cancel_after: Some((3, token.clone())),
        ..Recorder::default()
    };
    let mut sink = MemorySink::new();

    let report = pipeline().run(&job, &mut sink, &mut rec, &token).unwrap();

    assert!(report.cancelled);
    assert_eq!(report.batches, 1);
    assert_eq!(report.delivered, 5);
    assert_eq!(sink.results().len(), 5);
}

struct FlakyRasterizer {
    failures_left: AtomicUsize,
}

impl Rasterizer for FlakyRasterizer {
    fn blur(&self, image: &RgbaImage, radius: u32) -> RgbaImage {
        SoftwareRasterizer.blur(image, radius)
    }

    fn erase_radial(
        &self,
        canvas: &mut RgbaImage,
        rect: &PixelBox,
        gradient: &watermark_batch::raster::RadialGradient,
    ) {
        SoftwareRasterizer.erase_radial(canvas, rect, gradient);
    }

    fn underlay(&self, canvas: &mut RgbaImage, under: &RgbaImage) {
        SoftwareRasterizer.underlay(canvas, under);
    }

    fn draw_rotated(
        &self,
        canvas: &mut RgbaImage,
        image: &RgbaImage,
        dest: &PixelBox,
        rotation_degrees: f64,
        opacity: f32,
    ) {
        SoftwareRasterizer.draw_rotated(canvas, image, dest, rotation_degrees, opacity);
    }

    fn encode(
        &self,
        canvas: &RgbaImage,
        format: OutputFormat,
        quality: f32,
    ) -> watermark_batch::Result<Vec<u8>> {
        let took_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took_failure {
            return Err(Error::Encode(image::ImageError::IoError(
                std::io::Error::other("encoder hiccup"),
            )));
        }
        SoftwareRasterizer.encode(canvas, format, quality)
    }
}

fn flaky_pipeline(failures: usize) -> BatchPipeline<FlakyRasterizer> {
    BatchPipeline::with_compositor(Compositor::with_rasterizer(FlakyRasterizer {
        failures_left: AtomicUsize::new(failures),
    }))
    .batch_pause(Duration::ZERO)
}

#[test]
fn retries_absorb_transient_encode_failures() {
    let mut job = job(1);
    job.config.max_retries = 2;
    let results = flaky_pipeline(2).run_collect(&job).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn without_retries_encode_failure_is_terminal() {
    let job = job(1);
    let err = flaky_pipeline(1).run_collect(&job).unwrap_err();
    match err {
        Error::ItemFailed { index: 0, source } => {
            assert!(matches!(*source, Error::Encode(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn identical_jobs_produce_identical_bytes() {
    let job = job(3);
    let first = pipeline().run_collect(&job).unwrap();
    let second = pipeline().run_collect(&job).unwrap();
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.image.as_bytes(), b.image.as_bytes());
    }
}

#[test]
fn png_output_with_halo_and_rotation_keeps_dimensions() {
    let mut job = job(3);
    job.config.format = OutputFormat::Png;
    job.config.blur_halo = true;
    job.config.transform = NormalizedTransform::new(0.3, 0.3, 2.0).rotated_by(30.0);
    job.config.opacity = 0.6;

    let results = pipeline().run_collect(&job).unwrap();
    for (result, source) in results.iter().zip(&job.sources) {
        assert!(result.suggested_filename.ends_with(".png"));
        let decoded = image::load_from_memory(result.image.as_bytes())
            .unwrap()
            .to_rgba8();
        assert_eq!(decoded.dimensions(), (source.width(), source.height()));
        assert!(decoded.pixels().all(|p| p[3] > 200));
    }
}

#[test]
fn placement_is_recomputed_per_background_size() {
    let mut job = job(0);
    job.config.format = OutputFormat::Png;
    job.config.transform = NormalizedTransform::new(0.5, 0.5, 1.0);
    job.watermark = WatermarkImage::from_image(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])));
    let black = |w, h| {
        let img = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    };
    job.sources = vec![
        SourceImage::from_bytes("small", black(20, 20)).unwrap(),
        SourceImage::from_bytes("large", black(100, 60)).unwrap(),
    ];

    let results = pipeline().run_collect(&job).unwrap();
    let small = image::load_from_memory(results[0].image.as_bytes())
        .unwrap()
        .to_rgba8();
    let large = image::load_from_memory(results[1].image.as_bytes())
        .unwrap()
        .to_rgba8();
    assert_eq!(*small.get_pixel(10, 10), Rgba([255, 0, 0, 255]));
    assert_eq!(*small.get_pixel(9, 10), Rgba([0, 0, 0, 255]));
    assert_eq!(*large.get_pixel(50, 30), Rgba([255, 0, 0, 255]));
    assert_eq!(*large.get_pixel(49, 30), Rgba([0, 0, 0, 255]));
}

#[test]
fn adaptive_sizing_uses_profiler_hints() {
    let mut job = job(7);
    job.config.batch_size = BatchSizing::Adaptive;
    let pipeline = pipeline().host(HostCapabilities {
        logical_cores: Some(6),
        memory_gb: Some(2.0),
    });
    let mut rec = Recorder::default();
    let report = pipeline
        .run(&job, &mut MemorySink::new(), &mut rec, &CancellationToken::new())
        .unwrap();
    assert_eq!(rec.batches, vec![0..3, 3..6, 6..7]);
    assert_eq!(report.delivered, 7);
}

#[test]
fn directory_sink_receives_numbered_files() {
    let tmp = tempfile::tempdir().unwrap();
    let job = job(4);
    let mut sink = DirectorySink::new(tmp.path().join("out"));
    let report = pipeline()
        .run(&job, &mut sink, &mut Recorder::default(), &CancellationToken::new())
        .unwrap();
    assert!(report.is_success());
    for i in 1..=4 {
        let path = tmp.path().join("out").join(format!("watermarked-{i}.jpeg"));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}

#[test]
fn invalid_config_is_rejected_before_any_work() {
    let mut job = job(3);
    job.config.quality = 0.2;
    let mut sink = MemorySink::new();
    let mut rec = Recorder::default();
    let err = pipeline()
        .run(&job, &mut sink, &mut rec, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert!(rec.batches.is_empty());
    assert!(sink.results().is_empty());
}

#[test]
fn empty_job_completes_immediately() {
    let job = job(0);
    let mut rec = Recorder::default();
    let report = pipeline()
        .run(&job, &mut MemorySink::new(), &mut rec, &CancellationToken::new())
        .unwrap();
    assert_eq!(report.total, 0);
    assert!(report.is_success());
    assert!(rec.completed.is_some());
}

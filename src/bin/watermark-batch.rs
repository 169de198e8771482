use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use watermark_batch::{
    collect_inputs, Anchor, BatchJob, BatchPipeline, BatchReport, BatchSizing, CancellationToken,
    reference_source, DirectorySink, Error, FailurePolicy, JobConfig, NormalizedTransform,
    OutputFormat, PipelineObserver, Progress, SourceImage, WatermarkImage,
};

#[derive(Parser)]
#[command(
    name = "watermark-batch",
    about = "Stamp one watermark onto many images",
    version,
    after_help = "Simple usage: watermark-batch logo.png photos/ -o out/  (centered, 20% of image height)\n\n\
                  Placement flags (--x, --y, --scale, --rotation) override a --config file.\n\
                  --x/--y are the watermark's top-left corner as fractions of each image."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Watermark image
    watermark: PathBuf,

    /// Background image files or directories
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "watermarked")]
    output: PathBuf,

    /// JSON job configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Left edge as a fraction of image width
    #[arg(long, allow_negative_numbers = true)]
    x: Option<f64>,

    /// Top edge as a fraction of image height
    #[arg(long, allow_negative_numbers = true)]
    y: Option<f64>,

    /// Multiplier on the watermark's natural size
    #[arg(long)]
    scale: Option<f64>,

    /// Rotation in degrees around the watermark center
    #[arg(long, allow_negative_numbers = true)]
    rotation: Option<f64>,

    /// Preset placement: top-left, top-center, ..., center, ..., bottom-right
    #[arg(long, conflicts_with_all = ["x", "y"])]
    anchor: Option<String>,

    /// Encoder quality (0.5-1.0)
    #[arg(long)]
    quality: Option<f32>,

    /// Blur the background behind the watermark
    #[arg(long)]
    blur_halo: bool,

    /// Output format: jpeg or png
    #[arg(long)]
    format: Option<String>,

    /// Watermark opacity (0.0-1.0)
    #[arg(long)]
    opacity: Option<f32>,

    /// Images per batch
    #[arg(long, conflicts_with = "adaptive")]
    batch_size: Option<usize>,

    /// Pick batch size and concurrency from this machine's cores and memory
    #[arg(long)]
    adaptive: bool,

    /// Worker threads
    #[arg(long)]
    concurrency: Option<usize>,

    /// Keep going when an image fails instead of stopping the run
    #[arg(long)]
    keep_going: bool,

    /// Extra attempts per image before it counts as failed
    #[arg(long)]
    retries: Option<u32>,

    /// Pause between batches in milliseconds
    #[arg(long, default_value = "100")]
    pause_ms: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

struct CliObserver {
    names: Vec<String>,
    quiet: bool,
    last_failed: Option<usize>,
}

impl PipelineObserver for CliObserver {
    fn on_batch_start(&mut self, batch: usize, items: std::ops::Range<usize>) {
        tracing::debug!(batch, first = items.start + 1, last = items.end, "batch started");
    }

    fn on_progress(&mut self, progress: Progress) {
        let index = progress.completed - 1;
        // failed items were already printed by on_item_error
        if !self.quiet && self.last_failed != Some(index) {
            let name = self.names.get(index).map_or("", String::as_str);
            eprintln!(
                "[{:>3.0}%] {}/{} {name}",
                progress.percent(),
                progress.completed,
                progress.total
            );
        }
    }

    fn on_item_error(&mut self, index: usize, error: &Error) {
        self.last_failed = Some(index);
        let name = self.names.get(index).map_or("", String::as_str);
        eprintln!("[FAIL] {name}: {error}");
    }

    fn on_complete(&mut self, report: &BatchReport) {
        if self.quiet {
            return;
        }
        eprintln!();
        eprint!("[Summary] Delivered: {}", report.delivered);
        if !report.failed.is_empty() {
            eprint!(", Failed: {}", report.failed.len());
        }
        if report.cancelled {
            eprint!(", Cancelled");
        }
        eprintln!(" (Total: {})", report.total);
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut config = match &cli.config {
        Some(path) => JobConfig::from_path(path).unwrap_or_else(|e| {
            fatal(&format!("Failed to read config {}: {e}", path.display()))
        }),
        None => JobConfig::default(),
    };

    let watermark = WatermarkImage::open(&cli.watermark)
        .unwrap_or_else(|e| fatal(&format!("Failed to load watermark: {e}")));

    let paths = collect_inputs(&cli.inputs)
        .unwrap_or_else(|e| fatal(&format!("Failed to read inputs: {e}")));
    if paths.is_empty() {
        fatal("No input images found");
    }
    let sources: Vec<SourceImage> = paths
        .iter()
        .map(|p| load_source(p, cli.keep_going))
        .collect();

    if let Err(e) = apply_flags(&cli, &mut config, &sources, &watermark) {
        fatal(&e.to_string());
    }
    if let Err(e) = config.validate() {
        fatal(&e.to_string());
    }

    if !cli.quiet {
        eprintln!(
            "Watermarking {} image(s) into {} (x={:.3}, y={:.3}, scale={:.3}, rotation={:.1})",
            sources.len(),
            cli.output.display(),
            config.transform.x,
            config.transform.y,
            config.transform.scale_x,
            config.transform.rotation_degrees,
        );
        eprintln!();
    }

    let names = sources.iter().map(|s| s.id().to_string()).collect();
    let job = BatchJob::new(sources, watermark, config);
    let pipeline = BatchPipeline::new().batch_pause(Duration::from_millis(cli.pause_ms));
    let mut sink = DirectorySink::new(&cli.output);
    let mut observer = CliObserver {
        names,
        quiet: cli.quiet,
        last_failed: None,
    };

    match pipeline.run(&job, &mut sink, &mut observer, &CancellationToken::new()) {
        Ok(report) if report.is_success() => {}
        Ok(_) => process::exit(1),
        Err(e) => {
            eprintln!("[FAIL] {e}");
            process::exit(1);
        }
    }
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_source(path: &Path, keep_going: bool) -> SourceImage {
    match SourceImage::open(path) {
        Ok(source) => source,
        Err(e) if keep_going => {
            // keep the slot so output numbering matches input order; it fails again at decode
            tracing::warn!(path = %path.display(), error = %e, "unreadable input");
            let id = SourceImage::id_for_path(path);
            SourceImage::from_raw_parts(id, std::fs::read(path).unwrap_or_default(), 0, 0)
        }
        Err(e) => fatal(&format!("Failed to load {}: {e}", path.display())),
    }
}

/// Fold command-line overrides into the job configuration.
fn apply_flags(
    cli: &Cli,
    config: &mut JobConfig,
    sources: &[SourceImage],
    watermark: &WatermarkImage,
) -> watermark_batch::Result<()> {
    // placement is authored against the first readable image, like the editor's preview
    let reference = reference_source(sources)
        .ok_or_else(|| Error::InvalidConfig("no readable input image".to_string()))?;
    let (bg_w, bg_h) = (reference.width(), reference.height());
    let (wm_w, wm_h) = (watermark.width(), watermark.height());

    let mut transform = if cli.config.is_some() {
        config.transform
    } else {
        NormalizedTransform::centered(bg_w, bg_h, wm_w, wm_h)
    };

    if let Some(name) = &cli.anchor {
        let anchor = Anchor::from_name(name)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown anchor '{name}'")))?;
        let scale = cli.scale.unwrap_or(transform.scale_x);
        transform = NormalizedTransform::anchored(anchor, scale, bg_w, bg_h, wm_w, wm_h)
            .rotated_by(transform.rotation_degrees);
    } else if let Some(scale) = cli.scale {
        transform.scale_x = scale;
        transform.scale_y = scale;
    }
    if let Some(x) = cli.x {
        transform.x = x;
    }
    if let Some(y) = cli.y {
        transform.y = y;
    }
    if let Some(rotation) = cli.rotation {
        transform.rotation_degrees = rotation;
    }
    config.transform = transform;

    if let Some(quality) = cli.quality {
        config.quality = quality;
    }
    if cli.blur_halo {
        config.blur_halo = true;
    }
    if let Some(format) = &cli.format {
        config.format = OutputFormat::from_name(format)?;
    }
    if let Some(opacity) = cli.opacity {
        config.opacity = opacity;
    }
    if cli.adaptive {
        config.batch_size = BatchSizing::Adaptive;
    } else if let Some(n) = cli.batch_size {
        config.batch_size = BatchSizing::Fixed(n);
    }
    if cli.concurrency.is_some() {
        config.concurrency = cli.concurrency;
    }
    if cli.keep_going {
        config.failure_policy = FailurePolicy::Isolate;
    }
    if let Some(retries) = cli.retries {
        config.max_retries = retries;
    }
    Ok(())
}

fn fatal(msg: &str) -> ! {
    eprintln!("Error: {msg}");
    process::exit(1);
}

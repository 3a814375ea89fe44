use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mvs_image_cache::{
    CacheConfig, CacheError, Color, DecodeError, ImageBuffer, ImageCache, ImageDecoder, ImageId,
    SlotPlan, ViewSet,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "MVS_CACHE_LOG";

#[derive(Debug, Parser)]
#[command(name = "mvs-cache")]
#[command(about = "Inspect and exercise the multi-view image cache")]
pub struct Cli {
    /// Read cache settings from a config file instead of the environment.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print how many slots a view set gets under the memory budget.
    Plan {
        #[arg(long)]
        views: usize,
        #[arg(long)]
        max_width: u32,
        #[arg(long)]
        max_height: u32,
        #[command(flatten)]
        cache: CacheArgs,
    },
    /// Run random access waves against a synthetic view set.
    Simulate {
        #[arg(long, default_value_t = 64)]
        views: usize,
        #[arg(long, default_value_t = 256)]
        width: u32,
        #[arg(long, default_value_t = 192)]
        height: u32,
        /// Caller threads per wave.
        #[arg(long, default_value_t = 4)]
        clients: usize,
        #[arg(long, default_value_t = 4)]
        waves: usize,
        /// Accesses per caller thread and wave.
        #[arg(long, default_value_t = 100)]
        accesses: usize,
        /// Images prefetched in the background before each wave.
        #[arg(long, default_value_t = 4)]
        prefetch: usize,
        /// Simulated decode time per image, in milliseconds.
        #[arg(long, default_value_t = 0)]
        decode_ms: u64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[command(flatten)]
        cache: CacheArgs,
    },
    /// Sample one image of a view set of image files.
    Sample {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
        /// Index of the view to sample, in file order.
        #[arg(long, default_value_t = 0)]
        image: ImageId,
        #[arg(long, allow_negative_numbers = true)]
        x: f32,
        #[arg(long, allow_negative_numbers = true)]
        y: f32,
        #[command(flatten)]
        cache: CacheArgs,
    },
    /// Print CLI version.
    Version,
}

/// Overrides applied on top of the file or environment settings
#[derive(Debug, Default, Args)]
struct CacheArgs {
    #[arg(long)]
    budget_mb: Option<usize>,
    #[arg(long)]
    min_slots: Option<usize>,
    /// Background loader threads.
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    views: usize,
    max_width: u32,
    max_height: u32,
    per_image_bytes: usize,
    memory_budget: usize,
    min_slots: usize,
    slot_count: usize,
    reserved_bytes: usize,
    covers_all_views: bool,
}

impl PlanOutput {
    fn new(views: &ViewSet, plan: &SlotPlan) -> Self {
        Self {
            views: plan.view_count,
            max_width: views.max_width,
            max_height: views.max_height,
            per_image_bytes: plan.per_image_bytes,
            memory_budget: plan.memory_budget,
            min_slots: plan.min_slots,
            slot_count: plan.slot_count,
            reserved_bytes: plan.reserved_bytes(),
            covers_all_views: plan.covers_all_views(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SimulateOutput {
    slot_count: usize,
    views: usize,
    accesses: u64,
    hits: u64,
    misses: u64,
    loads: u64,
    evictions: u64,
    hit_rate: f64,
    async_joined: usize,
    async_failures: usize,
    evicted_before_read: u64,
    mismatched_samples: u64,
    elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
struct SampleOutput {
    path: String,
    image: ImageId,
    width: u32,
    height: u32,
    x: f32,
    y: f32,
    color: [f32; 3],
    slot_count: usize,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Plan { views, max_width, max_height, cache } => {
            run_plan(ViewSet::new(views, max_width, max_height), &resolve_config(config, &cache)?)
        }
        Commands::Simulate {
            views,
            width,
            height,
            clients,
            waves,
            accesses,
            prefetch,
            decode_ms,
            seed,
            cache,
        } => {
            let workload = Workload {
                clients: clients.max(1),
                waves,
                accesses,
                prefetch,
                seed,
            };
            let decoder = SyntheticDecoder {
                width,
                height,
                delay: Duration::from_millis(decode_ms),
            };
            run_simulate(
                ViewSet::new(views, width, height),
                &resolve_config(config, &cache)?,
                decoder,
                &workload,
            )
        }
        Commands::Sample { files, image, x, y, cache } => {
            run_sample(files, image, x, y, &resolve_config(config, &cache)?)
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed when `run` is called repeatedly
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn resolve_config(path: Option<&Path>, overrides: &CacheArgs) -> Result<CacheConfig> {
    let mut config = match path {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?,
        None => CacheConfig::from_env().context("invalid cache settings in environment")?,
    };

    if let Some(mb) = overrides.budget_mb {
        config = config.with_budget_mb(mb);
    }
    if let Some(min_slots) = overrides.min_slots {
        config = config.with_min_slots(min_slots);
    }
    if let Some(workers) = overrides.workers {
        config = config.with_worker_threads(workers);
    }
    Ok(config)
}

fn run_plan(views: ViewSet, config: &CacheConfig) -> Result<()> {
    let plan = SlotPlan::compute(&views, config).context("failed to size the cache")?;
    print_json(&PlanOutput::new(&views, &plan))
}

/// Decoder producing an affine gradient, so any integer sample can be checked
struct SyntheticDecoder {
    width: u32,
    height: u32,
    delay: Duration,
}

impl SyntheticDecoder {
    fn expected(id: ImageId, x: u32, y: u32) -> Color {
        Color::new(id as f32, x as f32, y as f32)
    }
}

impl ImageDecoder for SyntheticDecoder {
    fn decode(&self, id: ImageId, target: &mut ImageBuffer) -> Result<(), DecodeError> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let width = self.width;
        let pixels = target.prepare(self.width, self.height)?;
        for (index, pixel) in pixels.iter_mut().enumerate() {
            let x = index as u32 % width;
            let y = index as u32 / width;
            *pixel = Self::expected(id, x, y);
        }
        Ok(())
    }
}

struct Workload {
    clients: usize,
    waves: usize,
    accesses: usize,
    prefetch: usize,
    seed: u64,
}

#[derive(Default)]
struct ClientCounters {
    accesses: AtomicU64,
    evicted_before_read: AtomicU64,
    mismatched_samples: AtomicU64,
}

fn run_simulate(
    views: ViewSet,
    config: &CacheConfig,
    decoder: SyntheticDecoder,
    workload: &Workload,
) -> Result<()> {
    let cache = ImageCache::new(views, config, decoder).context("failed to create cache")?;
    let counters = ClientCounters::default();
    let mut rng = StdRng::seed_from_u64(workload.seed);
    let mut async_joined = 0;
    let mut async_failures = 0;
    let start = Instant::now();

    for wave in 0..workload.waves {
        let prefetch: Vec<ImageId> =
            (0..workload.prefetch).map(|_| rng.gen_range(0..views.view_count)).collect();
        cache.ensure_loaded_batch_async(prefetch).context("failed to schedule prefetch")?;

        let seeds: Vec<u64> = (0..workload.clients).map(|_| rng.gen()).collect();
        thread::scope(|scope| -> Result<()> {
            let clients: Vec<_> = seeds
                .into_iter()
                .map(|seed| {
                    let cache = &cache;
                    let counters = &counters;
                    scope.spawn(move || run_client(cache, counters, &views, workload.accesses, seed))
                })
                .collect();
            for client in clients {
                client.join().map_err(|_| anyhow::anyhow!("client thread panicked"))??;
            }
            Ok(())
        })?;

        let report = cache.drain();
        tracing::debug!(wave, joined = report.joined, failed = report.failures.len(), "wave drained");
        async_joined += report.joined;
        async_failures += report.failures.len();
    }

    let stats = cache.stats();
    let output = SimulateOutput {
        slot_count: stats.slot_count,
        views: views.view_count,
        accesses: counters.accesses.load(Ordering::Relaxed),
        hits: stats.hits,
        misses: stats.misses,
        loads: stats.loads,
        evictions: stats.evictions,
        hit_rate: stats.hit_rate(),
        async_joined,
        async_failures,
        evicted_before_read: counters.evicted_before_read.load(Ordering::Relaxed),
        mismatched_samples: counters.mismatched_samples.load(Ordering::Relaxed),
        elapsed_ms: start.elapsed().as_millis(),
    };
    print_json(&output)
}

fn run_client(
    cache: &ImageCache<SyntheticDecoder>,
    counters: &ClientCounters,
    views: &ViewSet,
    accesses: usize,
    seed: u64,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..accesses {
        let id = rng.gen_range(0..views.view_count);
        let x = rng.gen_range(0..views.max_width);
        let y = rng.gen_range(0..views.max_height);

        cache.ensure_loaded(id).with_context(|| format!("failed to load image {id}"))?;
        counters.accesses.fetch_add(1, Ordering::Relaxed);

        // Other clients may evict the image before it is read
        match cache.sample(id, x as f32, y as f32) {
            Ok(color) if color == SyntheticDecoder::expected(id, x, y) => {}
            Ok(_) => {
                counters.mismatched_samples.fetch_add(1, Ordering::Relaxed);
            }
            Err(CacheError::NotResident { .. }) => {
                counters.evicted_before_read.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => return Err(err).context("sample failed"),
        }
    }
    Ok(())
}

/// Decodes view `id` from the `id`-th file with the `image` crate
struct FileDecoder {
    paths: Vec<PathBuf>,
}

impl ImageDecoder for FileDecoder {
    fn decode(&self, id: ImageId, target: &mut ImageBuffer) -> Result<(), DecodeError> {
        let path = self
            .paths
            .get(id)
            .ok_or_else(|| DecodeError::Format(format!("no file for image {id}")))?;

        let decoded = image::open(path).map_err(|err| match err {
            image::ImageError::IoError(err) => DecodeError::from(err),
            other => DecodeError::Format(other.to_string()),
        })?;
        let rgb = decoded.to_rgb32f();

        let pixels = target.prepare(rgb.width(), rgb.height())?;
        for (pixel, source) in pixels.iter_mut().zip(rgb.pixels()) {
            *pixel = Color::from(source.0);
        }
        Ok(())
    }
}

fn run_sample(files: Vec<PathBuf>, view: ImageId, x: f32, y: f32, config: &CacheConfig) -> Result<()> {
    let dimensions = files
        .iter()
        .map(|path| {
            image::image_dimensions(path)
                .with_context(|| format!("failed to read image header of {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let views = ViewSet::from_dimensions(dimensions);

    let path = files
        .get(view)
        .with_context(|| format!("--image {view} is out of range for {} file(s)", files.len()))?
        .display()
        .to_string();

    let cache = ImageCache::new(views, config, FileDecoder { paths: files })
        .context("failed to create cache")?;
    cache.ensure_loaded(view).with_context(|| format!("failed to load {path}"))?;

    let (width, height) =
        cache.image_dimensions(view).with_context(|| format!("image {view} was evicted"))?;
    let color = cache.sample(view, x, y).context("failed to sample image")?;

    print_json(&SampleOutput {
        path,
        image: view,
        width,
        height,
        x,
        y,
        color: color.to_array(),
        slot_count: cache.slot_count(),
    })
}

fn print_json<T: Serialize>(payload: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(payload)?;
    println!("{json}");
    Ok(())
}

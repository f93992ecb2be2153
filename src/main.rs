use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use flexi_logger::Logger;
use log::{info, warn};
use seed_sizer::batch::{discover_images, run_batch, BatchOptions};
use seed_sizer::common::{ClumpStrategy, Config, Foreground};
use seed_sizer::output::SummaryWriter;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Strategy {
    Heuristic,
    Watershed,
}

impl From<Strategy> for ClumpStrategy {
    fn from(value: Strategy) -> Self {
        match value {
            Strategy::Heuristic => ClumpStrategy::Heuristic,
            Strategy::Watershed => ClumpStrategy::Watershed,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "seed-sizer")]
#[command(version, about = "Count and measure seeds on flatbed scans", long_about = None)]
struct Cli {
    /// Image file or directory of scans
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Summary table
    #[arg(short, long, value_name = "FILE", default_value = "output.csv")]
    output: PathBuf,

    /// Append to an existing summary table instead of replacing it
    #[arg(long)]
    append: bool,

    /// Write a per-seed table for every image into this directory
    #[arg(long, value_name = "DIR")]
    regions_dir: Option<PathBuf>,

    /// YAML configuration file; flags below override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scan resolution in pixels per inch
    #[arg(long, value_name = "N")]
    ppi: Option<f64>,

    /// Noise floor in mm²
    #[arg(long, value_name = "MM2")]
    filter: Option<f64>,

    /// Drop regions smaller than this fraction of the median area
    #[arg(long, value_name = "FRACTION")]
    min_size: Option<f64>,

    /// Regions above this multiple of the mean area are clumps
    #[arg(long, value_name = "X")]
    clump_multiplier: Option<f64>,

    /// Clump resolution strategy
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// Watershed marker window in pixels, about one seed length
    #[arg(long, value_name = "N")]
    footprint: Option<usize>,

    /// Seeds are darker than the background
    #[arg(long)]
    dark_seeds: bool,

    /// Take the resolution from TIFF tags when present
    #[arg(long)]
    metadata_ppi: bool,

    /// Number of images processed in parallel
    #[arg(short = 'j', long, value_name = "N", default_value_t = 2)]
    jobs: usize,

    /// Log level (error, warn, info, debug, trace) or a flexi_logger spec
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(ppi) = self.ppi {
            config.pixels_per_inch = ppi;
        }
        if let Some(filter) = self.filter {
            config.min_object_area_mm2 = filter;
        }
        if let Some(min_size) = self.min_size {
            config.min_fraction_of_median = min_size;
        }
        if let Some(multiplier) = self.clump_multiplier {
            config.clump_threshold_multiplier = multiplier;
        }
        if let Some(strategy) = self.strategy {
            config.clump_strategy = strategy.into();
        }
        if let Some(footprint) = self.footprint {
            config.watershed_peak_footprint_size = footprint;
        }
        if self.dark_seeds {
            config.foreground = Foreground::Dark;
        }
        if self.metadata_ppi {
            config.resolution_from_metadata = true;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _logger = Logger::try_with_str(&cli.log_level)?
        .log_to_stderr()
        .start()?;

    let config = cli.config()?;
    let paths = discover_images(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;
    if paths.is_empty() {
        bail!("no images found in {}", cli.input.display());
    }
    info!(
        "{} images, {} ppi, {:?} clump strategy",
        paths.len(),
        config.pixels_per_inch,
        config.clump_strategy
    );

    let writer = SummaryWriter::create(&cli.output, cli.append)
        .with_context(|| format!("opening {}", cli.output.display()))?;
    let options = BatchOptions {
        workers: cli.jobs,
        regions_dir: cli.regions_dir.clone(),
    };
    let cancel = AtomicBool::new(false);
    let report = run_batch(&paths, &config, &writer, &options, &cancel)?;

    for skipped in report.skipped.iter() {
        warn!("skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    info!(
        "wrote {} rows to {}",
        report.processed,
        writer.path().display()
    );
    Ok(())
}

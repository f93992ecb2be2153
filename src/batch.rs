//! Directory batch driver.
//!
//! Images are handed out one at a time in sorted order to `workers` image loops. Each loop
//! decodes, analyzes and writes its image before taking the next one, so at most `workers`
//! decoded scans are alive at once. The loops run on a pool with at least as many threads as
//! the global one, so the row-stripe stages of a single image still use every core.

use crate::common::Config;
use crate::error::{Error, Result};
use crate::io::{load_image, read_tiff_ppi, IMAGE_EXTENSIONS};
use crate::output::{region_table_path, write_region_table, SummaryWriter};
use crate::pipeline::{analyze_image, ImageAnalysis};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Images processed concurrently.
    pub workers: usize,
    /// Where per-image region tables go, if anywhere.
    pub regions_dir: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            regions_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: Vec<SkippedImage>,
    /// True when the cancel flag stopped the run before every image was started.
    pub cancelled: bool,
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
}

/// Lists the images to process: the file itself, or the image files directly inside a
/// directory, sorted by path.
pub fn discover_images(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut images = Vec::new();
    for entry in std::fs::read_dir(input)? {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path) {
            images.push(path);
        }
    }
    images.sort();
    debug!("found {} images in {}", images.len(), input.display());
    Ok(images)
}

/// Display name of an image in logs and in the summary table.
pub fn image_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Loads and analyzes one image, taking the scan resolution from its TIFF tags when
/// configured to.
pub fn process_image(path: &Path, config: &Config) -> Result<ImageAnalysis> {
    let id = image_id(path);
    let mut config = Cow::Borrowed(config);
    if config.resolution_from_metadata {
        match read_tiff_ppi(path)? {
            Some(pixels_per_inch) => {
                debug!("{id}: {pixels_per_inch} ppi from metadata");
                config.to_mut().pixels_per_inch = pixels_per_inch;
            }
            None => debug!("{id}: no resolution tags, using {} ppi", config.pixels_per_inch),
        }
    }
    let image = load_image(path)?;
    analyze_image(&id, image, &config)
}

/// Pool the image loops run on. The per-image stages parallelize inside it, so it gets as many
/// threads as the global pool and never fewer than `workers`.
fn worker_pool(workers: usize) -> Result<rayon::ThreadPool> {
    let threads = rayon::current_num_threads().max(workers);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("seed-sizer-{i}"))
        .build()
        .map_err(|e| Error::Configuration(format!("cannot start {threads} threads: {e}")))
}

/// Processes `paths` with `options.workers` images in flight and appends one summary row per
/// image to `writer`.
///
/// Input errors (undecodable files, bad TIFF tags) skip the image. Any other error stops the
/// batch and is returned once running images finish. Setting `cancel` stops new images from
/// starting.
pub fn run_batch(
    paths: &[PathBuf],
    config: &Config,
    writer: &SummaryWriter,
    options: &BatchOptions,
    cancel: &AtomicBool,
) -> Result<BatchReport> {
    config.validate()?;
    let workers = options.workers.max(1);
    let pool = worker_pool(workers)?;
    debug!(
        "{workers} images in flight on {} threads",
        pool.current_num_threads()
    );
    if let Some(dir) = options.regions_dir.as_deref() {
        std::fs::create_dir_all(dir)?;
    }

    let next = AtomicUsize::new(0);
    let processed = AtomicUsize::new(0);
    let skipped: Mutex<Vec<SkippedImage>> = Mutex::new(Vec::new());
    let fatal: Mutex<Option<Error>> = Mutex::new(None);
    let stop = AtomicBool::new(false);

    let run_one = |path: &Path| -> Result<()> {
        let analysis = match process_image(path, config) {
            Ok(analysis) => analysis,
            Err(e) if e.is_input_error() => {
                warn!("skipping {}: {e}", path.display());
                skipped.lock().push(SkippedImage {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        writer.write(&analysis.summary)?;
        if let Some(dir) = options.regions_dir.as_deref() {
            write_region_table(&region_table_path(dir, path), &analysis.regions)?;
        }
        processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    };

    pool.scope(|s| {
        for _ in 0..workers {
            s.spawn(|_| loop {
                if cancel.load(Ordering::Relaxed) || stop.load(Ordering::Relaxed) {
                    break;
                }
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(path) = paths.get(index) else {
                    break;
                };
                if let Err(e) = run_one(path.as_path()) {
                    stop.store(true, Ordering::Relaxed);
                    fatal.lock().get_or_insert(e);
                    break;
                }
            });
        }
    });

    if let Some(e) = fatal.into_inner() {
        return Err(e);
    }
    let report = BatchReport {
        processed: processed.into_inner(),
        skipped: skipped.into_inner(),
        cancelled: next.into_inner() < paths.len(),
    };
    info!(
        "processed {} of {} images, {} skipped{}",
        report.processed,
        paths.len(),
        report.skipped.len(),
        if report.cancelled { ", cancelled" } else { "" }
    );
    Ok(report)
}

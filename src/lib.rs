//! Seed counting and morphometry for flatbed scans in Rust.
//!
//! This crate segments a scanned tray of seeds into individual regions, corrects the count for
//! seeds that touch or overlap, and reports per-image and per-seed statistics (count, area,
//! length, width, eccentricity, solidity, aspect ratio) in millimeters derived from the scan
//! resolution.
//!
//! The pipeline is grayscale reduction, Otsu thresholding, removal of small objects,
//! connected-component labeling, region measurement, a size filter relative to the median
//! region, clump resolution and statistics. Clumps are resolved either by estimating how many
//! mean-sized seeds fit into an oversized region or by a distance-transform watershed that
//! splits them.
//!
//! The following example measures a synthetic tray:
//!
//! ```rust
//! use seed_sizer::arrays::Array2D;
//! use seed_sizer::common::Config;
//! use seed_sizer::pipeline::analyze_image;
//! use seed_sizer::synthetic::{fill_disk_grid, render_scan};
//!
//! fn main() -> seed_sizer::Result<()> {
//!     // 8 round seeds, 40 px across, on a dark background
//!     let mut mask = Array2D::from_fill(false, 240, 120);
//!     fill_disk_grid(&mut mask, 4, 2, 60.0, 20.0);
//!     let scan = render_scan(&mask, 20, 200)?;
//!     // defaults: 1200 PPI, bright seeds, heuristic clump resolution
//!     let config = Config::default();
//!     let analysis = analyze_image("tray.tif", scan, &config)?;
//!     assert_eq!(analysis.summary.seed_count, 8);
//!     Ok(())
//! }
//! ```
//!
//! Scans on disk are read with [`io::load_image`]; [`batch::run_batch`] processes a whole
//! directory on a bounded worker pool and writes one CSV row per image through
//! [`output::SummaryWriter`]. The `seed-sizer` binary wraps that.
//!
//! Scans are large (a letter-size tray at 1200 PPI is around 135 megapixels), so every stage is
//! parallelized over row stripes with rayon, also inside a batch, and it's strongly recommended
//! to use this in release build. Labeling uses `assume!` to avoid boundary checks in hot loops
//! in release builds.
//!

pub mod arrays;
pub mod batch;
pub mod binarize;
pub mod clump;
pub mod common;
pub mod error;
pub mod filter;
pub mod grayscale;
pub mod io;
pub mod labeling;
pub mod measure;
pub mod output;
pub mod pipeline;
pub mod stats;
pub mod synthetic;
pub mod watershed;

pub use error::{Error, Result};

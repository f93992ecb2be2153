use crate::arrays::{GrayscaleField, RawImage};
use crate::binarize::binarize;
use crate::clump::ClumpRecord;
use crate::common::Config;
use crate::error::Result;
use crate::filter::size_filter;
use crate::grayscale::reduce_to_grayscale;
use crate::labeling::label_components;
use crate::measure::{measure_regions, RegionRecord};
use crate::stats::{summarize, ImageSummary};
use log::{debug, info, warn};

/// Everything measured on one scan.
#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    pub summary: ImageSummary,
    /// Final regions, ordered by label.
    pub regions: Vec<RegionRecord>,
    pub clumps: Vec<ClumpRecord>,
}

/// Runs the whole pipeline on a decoded scan. The sample buffer is released right after the
/// grayscale reduction.
pub fn analyze_image(id: &str, image: RawImage, config: &Config) -> Result<ImageAnalysis> {
    debug!(
        "{id}: {}x{} px, {} channels",
        image.width, image.height, image.channels
    );
    let field = reduce_to_grayscale(image);
    analyze_field(id, &field, config)
}

/// Runs the pipeline from the grayscale field on.
pub fn analyze_field(id: &str, field: &GrayscaleField, config: &Config) -> Result<ImageAnalysis> {
    config.validate()?;
    let binarization = binarize(field, config);
    if binarization.degenerate {
        warn!("{id}: image has a single intensity, no seeds can be found");
    }
    debug!("{id}: otsu threshold {:.4}", binarization.threshold);

    let labeled = label_components(&binarization.mask, config.connectivity);
    let regions = measure_regions(&labeled, &config.calibration());
    debug!(
        "{id}: {} components, {} measured",
        labeled.num_labels,
        regions.len()
    );
    let filtered = size_filter(regions, config.min_fraction_of_median);
    let resolution = config
        .clump_strategy
        .resolver()
        .resolve(&labeled, filtered.retained, config);
    if resolution.regions.is_empty() && !binarization.degenerate {
        warn!("{id}: no seeds survived thresholding and filtering");
    }

    let summary = summarize(id, config.pixels_per_inch, binarization.threshold, &resolution);
    info!(
        "{id}: {} seeds in {} regions, {} clumps",
        summary.seed_count, summary.region_count, summary.clump_count
    );
    Ok(ImageAnalysis {
        summary,
        regions: resolution.regions,
        clumps: resolution.clumps,
    })
}

#[cfg(test)]
mod tests {
    use super::analyze_image;
    use crate::arrays::{Array2D, RawImage};
    use crate::common::{ClumpStrategy, Config, Foreground};
    use crate::synthetic::{fill_disk, fill_disk_grid, render_scan};

    fn tray(columns: usize, rows: usize) -> RawImage {
        let mut mask = Array2D::from_fill(false, columns * 60, rows * 60);
        fill_disk_grid(&mut mask, columns, rows, 60.0, 20.0);
        render_scan(&mask, 20, 200).unwrap()
    }

    #[test]
    fn counts_separate_seeds() {
        for strategy in [ClumpStrategy::Heuristic, ClumpStrategy::Watershed] {
            let config = Config {
                clump_strategy: strategy,
                ..Config::default()
            };
            let analysis = analyze_image("tray.tif", tray(5, 3), &config).unwrap();
            assert_eq!(analysis.summary.seed_count, 15, "{strategy:?}");
            assert_eq!(analysis.summary.region_count, 15);
            assert_eq!(analysis.summary.clump_count, 0);
            assert_eq!(analysis.regions.len(), 15);
            let threshold = analysis.summary.threshold;
            assert!(threshold > 20.0 / 255.0 && threshold < 190.0 / 255.0);
        }
    }

    #[test]
    fn blank_scan_has_no_statistics() {
        let image = RawImage::from_luma8(vec![35; 64 * 48], 64, 48).unwrap();
        let analysis = analyze_image("blank.tif", image, &Config::default()).unwrap();
        assert_eq!(analysis.summary.seed_count, 0);
        assert_eq!(analysis.summary.area_mean_mm2, None);
        assert_eq!(analysis.summary.area_std_mm2, None);
        assert_eq!(analysis.summary.mixed_mean_area_mm2, None);
        assert!(analysis.regions.is_empty());
    }

    #[test]
    fn dark_seeds_on_bright_background() {
        let mut mask = Array2D::from_fill(false, 180, 60);
        fill_disk_grid(&mut mask, 3, 1, 60.0, 20.0);
        let samples = mask.data.iter().map(|fg| if *fg { 40 } else { 220 }).collect();
        let inverted = RawImage::from_luma8(samples, 180, 60).unwrap();
        let config = Config {
            foreground: Foreground::Dark,
            ..Config::default()
        };
        let analysis = analyze_image("dark.tif", inverted, &config).unwrap();
        assert_eq!(analysis.summary.seed_count, 3);
    }

    #[test]
    fn doubling_resolution_quarters_area() {
        let at_1200 = analyze_image("a", tray(3, 2), &Config::default()).unwrap();
        let config = Config {
            pixels_per_inch: 2400.0,
            ..Config::default()
        };
        let at_2400 = analyze_image("a", tray(3, 2), &config).unwrap();
        let ratio = at_1200.summary.area_mean_mm2.unwrap() / at_2400.summary.area_mean_mm2.unwrap();
        assert!((ratio - 4.0).abs() < 1e-9, "{ratio}");
        assert_eq!(at_2400.summary.pixels_per_inch, 2400.0);
    }

    #[test]
    fn touching_pair_is_counted_twice() {
        let mut mask = Array2D::from_fill(false, 240, 210);
        fill_disk_grid(&mut mask, 6, 4, 40.0, 12.0);
        fill_disk(&mut mask, 40.0, 180.0, 12.0);
        fill_disk(&mut mask, 64.0, 180.0, 12.0);
        for strategy in [ClumpStrategy::Heuristic, ClumpStrategy::Watershed] {
            let config = Config {
                clump_strategy: strategy,
                ..Config::default()
            };
            let image = render_scan(&mask, 20, 200).unwrap();
            let analysis = analyze_image("pair.tif", image, &config).unwrap();
            assert_eq!(analysis.summary.seed_count, 26, "{strategy:?}");
            assert_eq!(analysis.summary.clump_count, 1, "{strategy:?}");
            assert_eq!(analysis.clumps[0].multiplicity, 2);
        }
    }

    #[test]
    fn same_input_gives_identical_rows() {
        let row = || {
            let analysis = analyze_image("tray.tif", tray(4, 2), &Config::default()).unwrap();
            let mut summary = csv::Writer::from_writer(Vec::new());
            summary.serialize(&analysis.summary).unwrap();
            let mut regions = csv::Writer::from_writer(Vec::new());
            for region in analysis.regions.iter() {
                regions.serialize(region).unwrap();
            }
            (summary.into_inner().unwrap(), regions.into_inner().unwrap())
        };
        assert_eq!(row(), row());
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = Config {
            pixels_per_inch: 0.0,
            ..Config::default()
        };
        assert!(analyze_image("x", tray(1, 1), &config).is_err());
    }
}

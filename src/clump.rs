//! Correction of seed counts for touching or overlapping seeds.
//!
//! Two strategies sit behind [`ClumpResolver`]. The heuristic one estimates how many seeds a
//! large region holds from the mean region area; the watershed one re-segments the filtered
//! mask and counts the pieces.

use crate::common::{ClumpStrategy, Config};
use crate::labeling::LabeledRegionSet;
use crate::measure::{measure_regions, RegionRecord};
use crate::stats::mean;
use crate::watershed::split_touching;
use log::debug;

/// A region believed to hold several seeds.
#[derive(Debug, Clone, PartialEq)]
pub struct ClumpRecord {
    pub region: RegionRecord,
    /// Estimated number of seeds, at least 2.
    pub multiplicity: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Final region set the statistics are computed over.
    pub regions: Vec<RegionRecord>,
    pub clumps: Vec<ClumpRecord>,
    pub corrected_count: u64,
    /// Mean area over every region handed to the resolver.
    pub mixed_mean_area_mm2: Option<f64>,
    /// Mean area over the regions counted as single seeds.
    pub single_mean_area_mm2: Option<f64>,
}

impl Resolution {
    pub fn empty() -> Self {
        Resolution {
            regions: Vec::new(),
            clumps: Vec::new(),
            corrected_count: 0,
            mixed_mean_area_mm2: None,
            single_mean_area_mm2: None,
        }
    }
}

pub trait ClumpResolver {
    /// Resolves clumps among `regions`, the size-filtered records measured from `labeled` in
    /// label order.
    fn resolve(
        &self,
        labeled: &LabeledRegionSet,
        regions: Vec<RegionRecord>,
        config: &Config,
    ) -> Resolution;
}

/// Flags regions far above the mean area and divides them by it.
///
/// A region past the cut whose area rounds to a single mean area still counts as one seed.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicResolver;

impl ClumpResolver for HeuristicResolver {
    fn resolve(
        &self,
        _labeled: &LabeledRegionSet,
        regions: Vec<RegionRecord>,
        config: &Config,
    ) -> Resolution {
        let areas: Vec<f64> = regions.iter().map(|r| r.area_mm2).collect();
        let Some(mixed_mean) = mean(&areas).filter(|m| *m > 0.0) else {
            return Resolution::empty();
        };
        let cut = config.clump_threshold_multiplier * mixed_mean;

        let mut clumps = Vec::new();
        let mut single_areas = Vec::new();
        for region in regions.iter() {
            // exact halves go to the even neighbor
            let multiplicity = (region.area_mm2 / mixed_mean).round_ties_even() as u32;
            if region.area_mm2 > cut && multiplicity >= 2 {
                clumps.push(ClumpRecord {
                    region: region.clone(),
                    multiplicity,
                });
            } else {
                single_areas.push(region.area_mm2);
            }
        }
        let corrected_count =
            single_areas.len() as u64 + clumps.iter().map(|c| c.multiplicity as u64).sum::<u64>();
        debug!(
            "heuristic: mean {mixed_mean:.4}, cut {cut:.4} mm2, {} clumps, {corrected_count} seeds",
            clumps.len()
        );
        Resolution {
            regions,
            clumps,
            corrected_count,
            mixed_mean_area_mm2: Some(mixed_mean),
            single_mean_area_mm2: mean(&single_areas),
        }
    }
}

/// Splits every region with a distance-transform watershed and counts the pieces.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatershedResolver;

impl ClumpResolver for WatershedResolver {
    fn resolve(
        &self,
        labeled: &LabeledRegionSet,
        regions: Vec<RegionRecord>,
        config: &Config,
    ) -> Resolution {
        if regions.is_empty() {
            return Resolution::empty();
        }
        let areas: Vec<f64> = regions.iter().map(|r| r.area_mm2).collect();

        // restrict the label image to the filtered regions, renumbered in record order
        let mut keep = vec![false; labeled.num_labels as usize + 1];
        for region in regions.iter() {
            keep[region.label as usize] = true;
        }
        let filtered = labeled.retain(&keep);
        let split = split_touching(
            &filtered,
            config.watershed_peak_footprint_size,
            config.connectivity,
        );
        let pieces = measure_regions(&split.regions, &config.calibration());

        let mut pieces_per_source = vec![0u32; filtered.num_labels as usize + 1];
        for piece in pieces.iter() {
            pieces_per_source[split.sources[piece.label as usize] as usize] += 1;
        }
        let clumps: Vec<ClumpRecord> = regions
            .iter()
            .zip(pieces_per_source.iter().skip(1))
            .filter(|(_, n)| **n >= 2)
            .map(|(region, n)| ClumpRecord {
                region: region.clone(),
                multiplicity: *n,
            })
            .collect();
        debug!(
            "watershed: {} regions split into {} pieces, {} clumps",
            regions.len(),
            pieces.len(),
            clumps.len()
        );
        let piece_areas: Vec<f64> = pieces.iter().map(|r| r.area_mm2).collect();
        Resolution {
            corrected_count: pieces.len() as u64,
            single_mean_area_mm2: mean(&piece_areas),
            mixed_mean_area_mm2: mean(&areas),
            regions: pieces,
            clumps,
        }
    }
}

impl ClumpStrategy {
    pub fn resolver(self) -> Box<dyn ClumpResolver + Send + Sync> {
        match self {
            ClumpStrategy::Heuristic => Box::new(HeuristicResolver),
            ClumpStrategy::Watershed => Box::new(WatershedResolver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClumpResolver, HeuristicResolver, WatershedResolver};
    use crate::arrays::Array2D;
    use crate::common::{ClumpStrategy, Config, Connectivity};
    use crate::filter::tests::record;
    use crate::labeling::label_components;
    use crate::measure::measure_regions;
    use crate::synthetic::{fill_disk, fill_disk_grid};

    fn empty_labels() -> crate::labeling::LabeledRegionSet {
        label_components(&Array2D::from_fill(false, 1, 1), Connectivity::Eight)
    }

    #[test]
    fn merged_blob_counts_as_several_seeds() {
        let mut regions: Vec<_> = (1..=20).map(|i| record(i, 1.0)).collect();
        regions.push(record(21, 3.0));
        let resolution = HeuristicResolver.resolve(&empty_labels(), regions, &Config::default());
        let mixed = 23.0 / 21.0;
        assert!((resolution.mixed_mean_area_mm2.unwrap() - mixed).abs() < 1e-12);
        assert_eq!(resolution.clumps.len(), 1);
        assert_eq!(resolution.clumps[0].multiplicity, 3);
        assert_eq!(resolution.clumps[0].region.label, 21);
        assert_eq!(resolution.corrected_count, 23);
        assert_eq!(resolution.single_mean_area_mm2, Some(1.0));
        assert_eq!(resolution.regions.len(), 21);
    }

    #[test]
    fn equal_regions_have_no_clumps() {
        let regions: Vec<_> = (1..=7).map(|i| record(i, 0.8)).collect();
        let resolution = HeuristicResolver.resolve(&empty_labels(), regions, &Config::default());
        assert!(resolution.clumps.is_empty());
        assert_eq!(resolution.corrected_count, 7);
    }

    #[test]
    fn low_multiplier_never_yields_single_seed_clumps() {
        let mut regions: Vec<_> = (1..=10).map(|i| record(i, 1.0)).collect();
        regions.push(record(11, 1.4));
        let config = Config {
            clump_threshold_multiplier: 1.1,
            ..Config::default()
        };
        let resolution = HeuristicResolver.resolve(&empty_labels(), regions, &config);
        assert!(resolution.clumps.is_empty());
        assert_eq!(resolution.corrected_count, 11);
        let mixed = resolution.mixed_mean_area_mm2.unwrap();
        assert!((resolution.single_mean_area_mm2.unwrap() - mixed).abs() < 1e-12);
    }

    #[test]
    fn half_way_ratio_rounds_to_even() {
        // mean 2.0, the large region holds exactly 2.5 means
        let mut regions: Vec<_> = (1..=3).map(|i| record(i, 1.0)).collect();
        regions.push(record(4, 5.0));
        let resolution = HeuristicResolver.resolve(&empty_labels(), regions, &Config::default());
        assert_eq!(resolution.mixed_mean_area_mm2, Some(2.0));
        assert_eq!(resolution.clumps.len(), 1);
        assert_eq!(resolution.clumps[0].multiplicity, 2);
        assert_eq!(resolution.corrected_count, 5);
        assert!(resolution.clumps.iter().all(|c| c.multiplicity >= 2));
    }

    #[test]
    fn nothing_to_resolve() {
        for strategy in [ClumpStrategy::Heuristic, ClumpStrategy::Watershed] {
            let resolution = strategy
                .resolver()
                .resolve(&empty_labels(), Vec::new(), &Config::default());
            assert_eq!(resolution.corrected_count, 0);
            assert_eq!(resolution.mixed_mean_area_mm2, None);
            assert_eq!(resolution.single_mean_area_mm2, None);
        }
    }

    #[test]
    fn strategies_agree_on_touching_pair() {
        // 24 singles and one pair of disks touching in a single pixel
        let mut mask = Array2D::from_fill(false, 240, 210);
        fill_disk_grid(&mut mask, 6, 4, 40.0, 12.0);
        fill_disk(&mut mask, 40.0, 180.0, 12.0);
        fill_disk(&mut mask, 64.0, 180.0, 12.0);
        let config = Config::default();
        let labeled = label_components(&mask, config.connectivity);
        assert_eq!(labeled.num_labels, 25);
        let regions = measure_regions(&labeled, &config.calibration());
        assert_eq!(regions.len(), 25);

        let heuristic = HeuristicResolver.resolve(&labeled, regions.clone(), &config);
        let watershed = WatershedResolver.resolve(&labeled, regions, &config);
        assert_eq!(heuristic.corrected_count, 26);
        assert_eq!(watershed.corrected_count, 26);
        assert_eq!(heuristic.clumps.len(), 1);
        assert_eq!(watershed.clumps.len(), 1);
        assert_eq!(heuristic.clumps[0].multiplicity, 2);
        assert_eq!(watershed.clumps[0].multiplicity, 2);
        assert_eq!(heuristic.clumps[0].region.label, watershed.clumps[0].region.label);
        // the watershed pieces are single seeds
        let single = heuristic.single_mean_area_mm2.unwrap();
        let pieces = watershed.single_mean_area_mm2.unwrap();
        assert!((pieces - single).abs() / single < 0.01);
    }
}

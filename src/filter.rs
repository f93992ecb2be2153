use crate::measure::RegionRecord;
use log::debug;

/// Regions kept by [`size_filter`] and the cut that selected them.
#[derive(Debug, Clone)]
pub struct SizeFilterOutcome {
    pub retained: Vec<RegionRecord>,
    /// Median area of all regions before filtering, `None` without regions.
    pub median_area_mm2: Option<f64>,
    /// Smallest area kept.
    pub min_area_mm2: Option<f64>,
    pub removed: usize,
}

/// Median with the mean of the two middle values for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Keeps regions with `area_mm2 >= min_fraction_of_median * median(area_mm2)`.
///
/// The cut scales with the sample, so debris and edge fragments are removed whatever the seed
/// size is.
pub fn size_filter(regions: Vec<RegionRecord>, min_fraction_of_median: f64) -> SizeFilterOutcome {
    let areas: Vec<f64> = regions.iter().map(|r| r.area_mm2).collect();
    let Some(median_area) = median(&areas) else {
        return SizeFilterOutcome {
            retained: regions,
            median_area_mm2: None,
            min_area_mm2: None,
            removed: 0,
        };
    };
    let min_area = min_fraction_of_median * median_area;
    let total = regions.len();
    let retained: Vec<RegionRecord> = regions
        .into_iter()
        .filter(|r| r.area_mm2 >= min_area)
        .collect();
    debug!(
        "size filter: median {median_area:.4} mm2, cut {min_area:.4} mm2, kept {} of {total}",
        retained.len()
    );
    SizeFilterOutcome {
        removed: total - retained.len(),
        retained,
        median_area_mm2: Some(median_area),
        min_area_mm2: Some(min_area),
    }
}

use crate::clump::Resolution;
use crate::filter::median;
use serde::Serialize;

/// Column order of the summary table. Matches the field order of [`ImageSummary`].
pub const SUMMARY_COLUMNS: &[&str] = &[
    "file",
    "pixels_per_inch",
    "threshold",
    "seed_count",
    "region_count",
    "clump_count",
    "area_mean_mm2",
    "area_median_mm2",
    "area_std_mm2",
    "area_variance_mm2",
    "mixed_mean_area_mm2",
    "single_mean_area_mm2",
    "length_mean_mm",
    "length_std_mm",
    "width_mean_mm",
    "width_std_mm",
    "eccentricity_mean",
    "eccentricity_std",
    "aspect_ratio_mean",
    "aspect_ratio_std",
    "solidity_mean",
    "solidity_std",
    "total_area_mm2",
];

/// One row of the summary table.
///
/// Statistics without enough data are `None` and serialize to empty fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSummary {
    pub file: String,
    pub pixels_per_inch: f64,
    pub threshold: f64,
    /// Region count corrected for clumps.
    pub seed_count: u64,
    pub region_count: u64,
    pub clump_count: u64,
    pub area_mean_mm2: Option<f64>,
    pub area_median_mm2: Option<f64>,
    pub area_std_mm2: Option<f64>,
    pub area_variance_mm2: Option<f64>,
    pub mixed_mean_area_mm2: Option<f64>,
    pub single_mean_area_mm2: Option<f64>,
    pub length_mean_mm: Option<f64>,
    pub length_std_mm: Option<f64>,
    pub width_mean_mm: Option<f64>,
    pub width_std_mm: Option<f64>,
    pub eccentricity_mean: Option<f64>,
    pub eccentricity_std: Option<f64>,
    pub aspect_ratio_mean: Option<f64>,
    pub aspect_ratio_std: Option<f64>,
    pub solidity_mean: Option<f64>,
    pub solidity_std: Option<f64>,
    pub total_area_mm2: f64,
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (`n - 1` denominator). `None` below two values.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let squares: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some(squares / (values.len() - 1) as f64)
}

pub fn sample_std(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Aggregates the final region set of one image into a summary row.
pub fn summarize(
    file: &str,
    pixels_per_inch: f64,
    threshold: f32,
    resolution: &Resolution,
) -> ImageSummary {
    let column = |f: fn(&crate::measure::RegionRecord) -> f64| -> Vec<f64> {
        resolution.regions.iter().map(f).collect()
    };
    let areas = column(|r| r.area_mm2);
    let lengths = column(|r| r.length_mm);
    let widths = column(|r| r.width_mm);
    let eccentricities = column(|r| r.eccentricity);
    let aspect_ratios = column(|r| r.aspect_ratio);
    let solidities = column(|r| r.solidity);

    ImageSummary {
        file: file.to_owned(),
        pixels_per_inch,
        threshold: threshold as f64,
        seed_count: resolution.corrected_count,
        region_count: resolution.regions.len() as u64,
        clump_count: resolution.clumps.len() as u64,
        area_mean_mm2: mean(&areas),
        area_median_mm2: median(&areas),
        area_std_mm2: sample_std(&areas),
        area_variance_mm2: sample_variance(&areas),
        mixed_mean_area_mm2: resolution.mixed_mean_area_mm2,
        single_mean_area_mm2: resolution.single_mean_area_mm2,
        length_mean_mm: mean(&lengths),
        length_std_mm: sample_std(&lengths),
        width_mean_mm: mean(&widths),
        width_std_mm: sample_std(&widths),
        eccentricity_mean: mean(&eccentricities),
        eccentricity_std: sample_std(&eccentricities),
        aspect_ratio_mean: mean(&aspect_ratios),
        aspect_ratio_std: sample_std(&aspect_ratios),
        solidity_mean: mean(&solidities),
        solidity_std: sample_std(&solidities),
        total_area_mm2: areas.iter().sum(),
    }
}

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// Millimeters per inch.
pub const MM_PER_INCH: f64 = 25.4;

/// Pixel neighborhood used when grouping foreground pixels into regions.
///
/// The same policy is used for noise removal and for labeling, so a region that survives
/// the noise floor is exactly one labeled region.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Horizontal and vertical neighbors only.
    Four,
    /// Horizontal, vertical and diagonal neighbors.
    Eight,
}

/// Which side of the Otsu threshold is foreground.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Foreground {
    /// Seeds brighter than the tray (the usual flatbed setup with a black lid).
    Bright,
    /// Seeds darker than the tray.
    Dark,
}

/// How touching seeds are counted.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClumpStrategy {
    /// Estimate the number of seeds in an oversized region from its area relative to the
    /// mean region area. Cheap, no pixels are re-segmented.
    Heuristic,
    /// Split merged regions with a distance transform and a marker-controlled watershed,
    /// then count the resulting regions.
    Watershed,
}

/// Main config for the processing.
///
/// All stages receive the same immutable value. A batch that needs a different scan
/// resolution for one image makes a copy with another `pixels_per_inch` instead of
/// mutating shared state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scan resolution. Every area and length conversion of an image goes through this value.
    pub pixels_per_inch: f64,
    /// Noise floor in mm². Connected foreground smaller than this is removed right after
    /// thresholding.
    pub min_object_area_mm2: f64,
    /// Regions smaller than this fraction of the median region area are dropped before clump
    /// resolution. Self-calibrating, so it works for any seed size.
    pub min_fraction_of_median: f64,
    /// A region larger than this multiple of the mean region area is treated as a clump by the
    /// heuristic strategy.
    pub clump_threshold_multiplier: f64,
    pub clump_strategy: ClumpStrategy,
    /// Side of the square window used to pick watershed markers on the distance map.
    ///
    /// Should be close to the length of one seed in pixels. The ridge of an elongated seed can
    /// hold several separate maxima, and a window much shorter than the seed marks each of
    /// them, splitting the seed; a window much longer than one seed merges touching ones. The
    /// default suits seeds of about 15 px (0.3 mm at 1200 ppi).
    pub watershed_peak_footprint_size: usize,
    pub connectivity: Connectivity,
    pub foreground: Foreground,
    /// Take the scan resolution from TIFF metadata when present (batch driver only).
    pub resolution_from_metadata: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pixels_per_inch: 1200.0,
            min_object_area_mm2: 0.1,
            min_fraction_of_median: 0.5,
            clump_threshold_multiplier: 1.9,
            clump_strategy: ClumpStrategy::Heuristic,
            watershed_peak_footprint_size: 15,
            connectivity: Connectivity::Eight,
            foreground: Foreground::Bright,
            resolution_from_metadata: false,
        }
    }
}

impl Config {
    /// Reads a YAML config. Missing keys keep their defaults. The result is validated.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Config = serde_yml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value for its valid range.
    pub fn validate(&self) -> Result<()> {
        if !(self.pixels_per_inch.is_finite() && self.pixels_per_inch > 0.0) {
            return Err(Error::Configuration(format!(
                "pixels_per_inch must be positive, got {}",
                self.pixels_per_inch
            )));
        }
        if !(self.min_object_area_mm2.is_finite() && self.min_object_area_mm2 >= 0.0) {
            return Err(Error::Configuration(format!(
                "min_object_area_mm2 must be non-negative, got {}",
                self.min_object_area_mm2
            )));
        }
        if !(0.0..=1.0).contains(&self.min_fraction_of_median) {
            return Err(Error::Configuration(format!(
                "min_fraction_of_median must be within 0..=1, got {}",
                self.min_fraction_of_median
            )));
        }
        if !(self.clump_threshold_multiplier.is_finite() && self.clump_threshold_multiplier > 1.0)
        {
            return Err(Error::Configuration(format!(
                "clump_threshold_multiplier must be greater than 1, got {}",
                self.clump_threshold_multiplier
            )));
        }
        if self.watershed_peak_footprint_size == 0 {
            return Err(Error::Configuration(
                "watershed_peak_footprint_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn calibration(&self) -> Calibration {
        Calibration::new(self.pixels_per_inch)
    }

    /// Noise floor converted to whole pixels (truncated).
    pub fn min_object_pixels(&self) -> usize {
        (self.min_object_area_mm2 * self.calibration().pixels_per_mm2()) as usize
    }
}

/// Pixel to physical unit conversion for one scan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub pixels_per_inch: f64,
}

impl Calibration {
    pub fn new(pixels_per_inch: f64) -> Self {
        Self { pixels_per_inch }
    }

    #[inline]
    pub fn pixels_per_mm(&self) -> f64 {
        self.pixels_per_inch / MM_PER_INCH
    }

    #[inline]
    pub fn pixels_per_mm2(&self) -> f64 {
        let ppmm = self.pixels_per_mm();
        ppmm * ppmm
    }

    #[inline]
    pub fn area_mm2(&self, area_px: f64) -> f64 {
        area_px / self.pixels_per_mm2()
    }

    #[inline]
    pub fn length_mm(&self, length_px: f64) -> f64 {
        length_px / self.pixels_per_mm()
    }
}

/// Splits `0..length` into `splits` contiguous ranges whose sizes differ by at most one.
/// Empty ranges are dropped, so short inputs yield fewer than `splits` ranges.
pub(crate) fn split_length_to_ranges(length: usize, splits: usize) -> Vec<Range<usize>> {
    let splits = splits.max(1);
    let chunk_size = length / splits;
    let rem = length % splits;
    (0..splits)
        .scan((rem, 0usize), |(r, acc), _split| {
            let mut size = chunk_size;
            if *r > 0 {
                *r -= 1;
                size += 1;
            }
            let out = (*acc, *acc + size);
            *acc += size;
            Some(out.0..out.1)
        })
        .filter(|r| !r.is_empty())
        .collect()
}

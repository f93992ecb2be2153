//! Global thresholding and noise removal.

use crate::arrays::{Array2D, BinaryMask, GrayscaleField};
use crate::common::{Config, Connectivity, Foreground};
use crate::labeling::label_components;
use log::debug;
use rayon::prelude::*;

const OTSU_BINS: usize = 256;

/// Output of [`binarize`].
#[derive(Debug, Clone)]
pub struct Binarization {
    /// Intensity separating foreground from background.
    pub threshold: f32,
    /// True when the field held a single intensity and no threshold could be chosen.
    pub degenerate: bool,
    /// Foreground mask with sub-floor components removed.
    pub mask: BinaryMask,
}

fn intensity_range(field: &GrayscaleField) -> Option<(f32, f32)> {
    field
        .data
        .par_iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(
            || None,
            |acc: Option<(f32, f32)>, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            },
        )
        .reduce(
            || None,
            |a, b| match (a, b) {
                (Some((lo_a, hi_a)), Some((lo_b, hi_b))) => Some((lo_a.min(lo_b), hi_a.max(hi_b))),
                (a, None) => a,
                (None, b) => b,
            },
        )
}

/// Otsu's threshold on a 256-bin histogram spanning the intensity range of the field.
///
/// Returns the center of the bin that maximizes the between-class variance (the first one on
/// ties), or `None` when every sample has the same value.
pub fn otsu_threshold(field: &GrayscaleField) -> Option<f32> {
    let (lo, hi) = intensity_range(field)?;
    if hi <= lo {
        return None;
    }
    let lo = lo as f64;
    let bin_width = (hi as f64 - lo) / OTSU_BINS as f64;
    let histogram: Vec<u64> = field
        .data
        .par_chunks(field.width.max(1))
        .fold(
            || vec![0u64; OTSU_BINS],
            |mut acc, row| {
                for v in row.iter().filter(|v| v.is_finite()) {
                    let bin = ((*v as f64 - lo) / bin_width) as usize;
                    acc[bin.min(OTSU_BINS - 1)] += 1;
                }
                acc
            },
        )
        .reduce(
            || vec![0u64; OTSU_BINS],
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a
            },
        );
    let centers: Vec<f64> = (0..OTSU_BINS)
        .map(|i| lo + bin_width * (i as f64 + 0.5))
        .collect();

    // class weights and sums below (inclusive) and above (exclusive) each split
    let total_weight: f64 = histogram.iter().map(|c| *c as f64).sum();
    let total_sum: f64 = histogram
        .iter()
        .zip(&centers)
        .map(|(c, x)| *c as f64 * x)
        .sum();
    let mut weight_below = 0f64;
    let mut sum_below = 0f64;
    let mut best = (f64::NEG_INFINITY, 0usize);
    for split in 0..OTSU_BINS - 1 {
        weight_below += histogram[split] as f64;
        sum_below += histogram[split] as f64 * centers[split];
        let weight_above = total_weight - weight_below;
        if weight_below == 0.0 || weight_above <= 0.0 {
            continue;
        }
        let mean_below = sum_below / weight_below;
        let mean_above = (total_sum - sum_below) / weight_above;
        let variance = weight_below * weight_above * (mean_below - mean_above).powi(2);
        if variance > best.0 {
            best = (variance, split);
        }
    }
    Some(centers[best.1] as f32)
}

pub fn threshold_mask(
    field: &GrayscaleField,
    threshold: f32,
    foreground: Foreground,
) -> BinaryMask {
    let mut mask = Array2D::from_fill(false, field.width, field.height);
    mask.data
        .par_chunks_mut(field.width.max(1))
        .zip(field.data.par_chunks(field.width.max(1)))
        .for_each(|(out, row)| {
            for (o, v) in out.iter_mut().zip(row) {
                *o = match foreground {
                    Foreground::Bright => *v > threshold,
                    Foreground::Dark => *v <= threshold,
                };
            }
        });
    mask
}

/// Clears every connected component with fewer than `min_size` pixels.
pub fn remove_small_objects(
    mask: &BinaryMask,
    min_size: usize,
    connectivity: Connectivity,
) -> BinaryMask {
    if min_size <= 1 {
        return mask.clone();
    }
    let labeled = label_components(mask, connectivity);
    let sizes = labeled.region_sizes();
    let mut keep: Vec<bool> = sizes.iter().map(|s| *s >= min_size as u64).collect();
    keep[0] = false;
    debug!(
        "noise floor {min_size} px removed {} of {} components",
        keep.iter().skip(1).filter(|k| !**k).count(),
        labeled.num_labels
    );
    labeled.retain(&keep).to_mask()
}

/// Thresholds the field with Otsu's method and removes objects below the configured noise
/// floor.
///
/// A field without contrast produces an all-background mask.
pub fn binarize(field: &GrayscaleField, config: &Config) -> Binarization {
    match otsu_threshold(field) {
        Some(threshold) => {
            let mask = threshold_mask(field, threshold, config.foreground);
            let mask = remove_small_objects(&mask, config.min_object_pixels(), config.connectivity);
            Binarization {
                threshold,
                degenerate: false,
                mask,
            }
        }
        None => Binarization {
            threshold: field.data.first().copied().unwrap_or(0.0),
            degenerate: true,
            mask: Array2D::from_fill(false, field.width, field.height),
        },
    }
}

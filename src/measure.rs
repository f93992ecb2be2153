//! Per-region shape descriptors.
//!
//! One pass over the label image collects exact integer moments and convex-hull candidates
//! for every label, row stripes in parallel. Descriptors follow the equivalent-ellipse
//! convention: axis lengths are `4 * sqrt(λ)` of the area-normalized central second-moment
//! matrix, so a filled disk of radius `r` measures `2r` on both axes.

use crate::common::{split_length_to_ranges, Calibration};
use crate::labeling::LabeledRegionSet;
use log::debug;
use multiversion::multiversion;
use rayon::current_num_threads;
use rayon::prelude::*;
use serde::Serialize;
use std::ops::Range;

/// Column order of per-region tables. Matches the field order of [`RegionRecord`].
pub const REGION_COLUMNS: &[&str] = &[
    "label",
    "area_px",
    "area_mm2",
    "centroid_x",
    "centroid_y",
    "orientation",
    "major_axis_px",
    "minor_axis_px",
    "length_mm",
    "width_mm",
    "aspect_ratio",
    "eccentricity",
    "solidity",
    "bbox_min_x",
    "bbox_min_y",
    "bbox_max_x",
    "bbox_max_y",
];

/// Geometric descriptors of one labeled region.
///
/// Coordinates are in pixels with `x` to the right and `y` down; `orientation` is the angle of
/// the major axis from the +x axis in radians, in `(-π/2, π/2]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionRecord {
    pub label: u32,
    pub area_px: u64,
    pub area_mm2: f64,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub orientation: f64,
    pub major_axis_px: f64,
    pub minor_axis_px: f64,
    /// Major axis in mm.
    pub length_mm: f64,
    /// Minor axis in mm.
    pub width_mm: f64,
    pub aspect_ratio: f64,
    pub eccentricity: f64,
    /// Region area over the area of its convex hull, in `(0, 1]`.
    pub solidity: f64,
    pub bbox_min_x: u32,
    pub bbox_min_y: u32,
    pub bbox_max_x: u32,
    pub bbox_max_y: u32,
}

#[derive(Debug, Clone)]
struct RegionAccumulator {
    count: u64,
    sum_x: u64,
    sum_y: u64,
    sum_xx: u128,
    sum_yy: u128,
    sum_xy: u128,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    /// Pixel centers that can lie on the convex hull (run endpoints).
    hull: Vec<(i64, i64)>,
}

impl Default for RegionAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum_x: 0,
            sum_y: 0,
            sum_xx: 0,
            sum_yy: 0,
            sum_xy: 0,
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
            hull: Vec::new(),
        }
    }
}

/// Sum of squares `0² + 1² + ... + n²`.
#[inline(always)]
fn sum_of_squares(n: u128) -> u128 {
    n * (n + 1) * (2 * n + 1) / 6
}

impl RegionAccumulator {
    #[inline(always)]
    fn add_run(&mut self, y: usize, start: usize, end: usize) {
        let n = (end - start + 1) as u64;
        let y64 = y as u64;
        let sx = (start + end) as u64 * n / 2;
        let sxx = sum_of_squares(end as u128)
            - if start > 0 {
                sum_of_squares(start as u128 - 1)
            } else {
                0
            };
        self.count += n;
        self.sum_x += sx;
        self.sum_y += y64 * n;
        self.sum_xx += sxx;
        self.sum_yy += (y64 as u128) * (y64 as u128) * n as u128;
        self.sum_xy += (y64 as u128) * sx as u128;
        self.min_x = self.min_x.min(start as u32);
        self.max_x = self.max_x.max(end as u32);
        self.min_y = self.min_y.min(y as u32);
        self.max_y = self.max_y.max(y as u32);
        self.hull.push((start as i64, y as i64));
        if end != start {
            self.hull.push((end as i64, y as i64));
        }
    }

    fn absorb(&mut self, other: RegionAccumulator) {
        if other.count == 0 {
            return;
        }
        self.count += other.count;
        self.sum_x += other.sum_x;
        self.sum_y += other.sum_y;
        self.sum_xx += other.sum_xx;
        self.sum_yy += other.sum_yy;
        self.sum_xy += other.sum_xy;
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
        self.hull.extend(other.hull);
    }

    /// Central second moments normalized by area: (μ20, μ02, μ11).
    fn central_moments(&self) -> (f64, f64, f64) {
        let n = self.count as i128;
        let sx = self.sum_x as i128;
        let sy = self.sum_y as i128;
        let n2 = (self.count as f64) * (self.count as f64);
        let mu20 = (n * self.sum_xx as i128 - sx * sx) as f64 / n2;
        let mu02 = (n * self.sum_yy as i128 - sy * sy) as f64 / n2;
        let mu11 = (n * self.sum_xy as i128 - sx * sy) as f64 / n2;
        (mu20, mu02, mu11)
    }

    fn finalize(&self, label: u32, calibration: &Calibration) -> Option<RegionRecord> {
        if self.count == 0 {
            return None;
        }
        let area = self.count as f64;
        let (mu20, mu02, mu11) = self.central_moments();
        let half_trace = (mu20 + mu02) / 2.0;
        let spread = (((mu20 - mu02) / 2.0).powi(2) + mu11 * mu11).sqrt();
        let lambda_major = half_trace + spread;
        let lambda_minor = (half_trace - spread).max(0.0);
        let major_axis_px = 4.0 * lambda_major.sqrt();
        let minor_axis_px = 4.0 * lambda_minor.sqrt();
        if minor_axis_px <= 0.0 {
            return None;
        }
        let eccentricity = (1.0 - lambda_minor / lambda_major).max(0.0).sqrt();
        let orientation = 0.5 * (2.0 * mu11).atan2(mu20 - mu02);
        let solidity = area / convex_hull_pixel_count(&self.hull) as f64;
        let record = RegionRecord {
            label,
            area_px: self.count,
            area_mm2: calibration.area_mm2(area),
            centroid_x: self.sum_x as f64 / area,
            centroid_y: self.sum_y as f64 / area,
            orientation,
            major_axis_px,
            minor_axis_px,
            length_mm: calibration.length_mm(major_axis_px),
            width_mm: calibration.length_mm(minor_axis_px),
            aspect_ratio: major_axis_px / minor_axis_px,
            eccentricity,
            solidity,
            bbox_min_x: self.min_x,
            bbox_min_y: self.min_y,
            bbox_max_x: self.max_x,
            bbox_max_y: self.max_y,
        };
        record.is_finite().then_some(record)
    }
}

impl RegionRecord {
    fn is_finite(&self) -> bool {
        [
            self.area_mm2,
            self.centroid_x,
            self.centroid_y,
            self.orientation,
            self.major_axis_px,
            self.minor_axis_px,
            self.length_mm,
            self.width_mm,
            self.aspect_ratio,
            self.eccentricity,
            self.solidity,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

#[inline(always)]
fn cross(o: (i64, i64), a: (i64, i64), b: (i64, i64)) -> i128 {
    (a.0 - o.0) as i128 * (b.1 - o.1) as i128 - (a.1 - o.1) as i128 * (b.0 - o.0) as i128
}

/// Andrew's monotone chain. Returns the hull counter-clockwise without collinear points.
pub(crate) fn convex_hull(points: &mut Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    points.sort_unstable();
    points.dedup();
    if points.len() < 3 {
        return points.clone();
    }
    let mut hull: Vec<(i64, i64)> = Vec::with_capacity(points.len() + 1);
    for &p in points.iter() {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Number of pixel centers inside or on the convex hull of `points`.
///
/// Uses Pick's theorem on the lattice polygon: `interior + boundary = A + B/2 + 1`. The same
/// expression holds for the degenerate single-point and segment hulls.
pub(crate) fn convex_hull_pixel_count(points: &[(i64, i64)]) -> u64 {
    let mut points = points.to_vec();
    let hull = convex_hull(&mut points);
    match hull.len() {
        0 => return 0,
        1 => return 1,
        _ => {}
    }
    let mut twice_area: i128 = 0;
    let mut boundary: u64 = 0;
    for (i, a) in hull.iter().enumerate() {
        let b = hull[(i + 1) % hull.len()];
        twice_area += a.0 as i128 * b.1 as i128 - b.0 as i128 * a.1 as i128;
        boundary += gcd((b.0 - a.0).unsigned_abs(), (b.1 - a.1).unsigned_abs());
    }
    let twice_area = twice_area.unsigned_abs() as u64;
    (twice_area + boundary) / 2 + 1
}

#[multiversion(targets = "simd")]
fn accumulate_stripe(
    labeled: &LabeledRegionSet,
    rows: Range<usize>,
    num_labels: usize,
) -> Vec<RegionAccumulator> {
    let mut local: Vec<RegionAccumulator> = vec![RegionAccumulator::default(); num_labels + 1];
    let width = labeled.width();
    for y in rows {
        let row = labeled.labels.get_row(y);
        let mut x = 0;
        while x < width {
            let label = row[x];
            if label == 0 {
                x += 1;
                continue;
            }
            let start = x;
            while x < width && row[x] == label {
                x += 1;
            }
            local[label as usize].add_run(y, start, x - 1);
        }
    }
    for acc in local.iter_mut().filter(|a| a.hull.len() > 2) {
        acc.hull = convex_hull(&mut acc.hull);
    }
    local
}

/// Measures every label of `labeled`.
///
/// Regions whose descriptors are not finite (a single row or column of pixels has a zero
/// minor axis) are dropped. Records are ordered by label.
pub fn measure_regions(labeled: &LabeledRegionSet, calibration: &Calibration) -> Vec<RegionRecord> {
    let num_labels = labeled.num_labels as usize;
    if num_labels == 0 {
        return Vec::new();
    }
    let stripes: Vec<Vec<RegionAccumulator>> =
        split_length_to_ranges(labeled.height(), current_num_threads())
            .into_par_iter()
            .map(|rows| accumulate_stripe(labeled, rows, num_labels))
            .collect();
    let mut merged: Vec<RegionAccumulator> = vec![RegionAccumulator::default(); num_labels + 1];
    for stripe in stripes {
        for (acc, part) in merged.iter_mut().zip(stripe) {
            acc.absorb(part);
        }
    }
    let records: Vec<RegionRecord> = merged
        .par_iter()
        .enumerate()
        .skip(1)
        .filter_map(|(label, acc)| acc.finalize(label as u32, calibration))
        .collect();
    if records.len() != num_labels {
        debug!(
            "dropped {} of {num_labels} regions with degenerate shape",
            num_labels - records.len()
        );
    }
    records
}

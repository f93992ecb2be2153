//! Distance-transform watershed for splitting touching seeds.
//!
//! The filtered foreground is turned into its exact Euclidean distance map, every component
//! is seeded with the plateaus of its local distance maxima, and the markers are grown over
//! the negated distance until the foreground is covered. A component that ends up with more
//! than one sub-region was a clump.

use crate::arrays::{Array2D, BinaryMask};
use crate::common::Connectivity;
use crate::labeling::{DisjointSet, LabeledRegionSet};
use log::debug;
use multiversion::multiversion;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Stand-in for an infinite squared distance; large but finite so parabola intersections stay
/// well defined.
const FAR: f64 = 1e20;

/// Output of [`split_touching`].
#[derive(Debug, Clone)]
pub struct WatershedSplit {
    /// One label per grown marker, numbered in raster order of the marker.
    pub regions: LabeledRegionSet,
    /// Component label each region was grown in, indexed by region label. Entry 0 is unused.
    pub sources: Vec<u32>,
}

/// Squared distance to the nearest zero of `f` along one line (Felzenszwalb & Huttenlocher).
///
/// `vertices` and `bounds` are scratch buffers of at least `f.len()` and `f.len() + 1` entries.
fn squared_distance_1d(f: &[f64], out: &mut [f64], vertices: &mut [usize], bounds: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let intersection = |q: usize, p: usize| -> f64 {
        ((f[q] + (q * q) as f64) - (f[p] + (p * p) as f64)) / (2.0 * q as f64 - 2.0 * p as f64)
    };
    let mut k = 0usize;
    vertices[0] = 0;
    bounds[0] = f64::NEG_INFINITY;
    bounds[1] = f64::INFINITY;
    for q in 1..n {
        let mut s = intersection(q, vertices[k]);
        while s <= bounds[k] {
            k -= 1;
            s = intersection(q, vertices[k]);
        }
        k += 1;
        vertices[k] = q;
        bounds[k] = s;
        bounds[k + 1] = f64::INFINITY;
    }
    k = 0;
    for (q, o) in out.iter_mut().enumerate() {
        while bounds[k + 1] < q as f64 {
            k += 1;
        }
        let p = vertices[k];
        let d = q as f64 - p as f64;
        *o = d * d + f[p];
    }
}

/// Exact Euclidean distance from every foreground pixel to the nearest background pixel.
///
/// Background pixels are 0. Pixels outside the image do not count as background; a mask
/// without any background maps to `f32::MAX`.
pub fn euclidean_distance_transform(mask: &BinaryMask) -> Array2D<f32> {
    let (width, height) = (mask.width, mask.height);
    let mut distance = Array2D::from_fill(0f32, width, height);
    if mask.is_empty() {
        return distance;
    }

    // column pass into a transposed buffer, one column per chunk
    let mut columns = vec![0f64; width * height];
    columns
        .par_chunks_mut(height)
        .enumerate()
        .for_each_init(
            || (vec![0f64; height], vec![0usize; height], vec![0f64; height + 1]),
            |(f, vertices, bounds), (x, column)| {
                for (y, v) in f.iter_mut().enumerate() {
                    *v = if mask[(x, y)] { FAR } else { 0.0 };
                }
                squared_distance_1d(f, column, vertices, bounds);
            },
        );

    distance
        .data
        .par_chunks_mut(width)
        .enumerate()
        .for_each_init(
            || {
                (
                    vec![0f64; width],
                    vec![0f64; width],
                    vec![0usize; width],
                    vec![0f64; width + 1],
                )
            },
            |(f, squared, vertices, bounds), (y, row)| {
                for (x, v) in f.iter_mut().enumerate() {
                    *v = columns[x * height + y];
                }
                squared_distance_1d(f, squared, vertices, bounds);
                for (o, d) in row.iter_mut().zip(squared.iter()) {
                    *o = if *d >= FAR { f32::MAX } else { d.sqrt() as f32 };
                }
            },
        );
    distance
}

/// Marks pixels whose distance is the maximum of the `footprint` window around them, looking
/// only at pixels of the same component.
#[multiversion(targets = "simd")]
fn peak_candidates(
    distance: &Array2D<f32>,
    components: &LabeledRegionSet,
    half: usize,
) -> BinaryMask {
    let (width, height) = (distance.width, distance.height);
    let mut candidates = Array2D::from_fill(false, width, height);

    let is_window_max = |x: usize, y: usize, reach: usize| -> bool {
        let label = components.labels[(x, y)];
        let value = distance[(x, y)];
        for wy in y.saturating_sub(reach)..(y + reach + 1).min(height) {
            let labels = components.labels.get_row(wy);
            let values = distance.get_row(wy);
            for wx in x.saturating_sub(reach)..(x + reach + 1).min(width) {
                if labels[wx] == label && values[wx] > value {
                    return false;
                }
            }
        }
        true
    };

    candidates
        .data
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let labels = components.labels.get_row(y);
            for (x, out) in row.iter_mut().enumerate() {
                // 3x3 first, most pixels fail there
                *out = labels[x] != 0
                    && distance[(x, y)] > 0.0
                    && is_window_max(x, y, 1)
                    && is_window_max(x, y, half);
            }
        });
    candidates
}

/// Groups 8-adjacent peak candidates of the same component into one marker.
///
/// Returns the marker labels and the component label of every marker.
fn label_plateaus(
    candidates: &BinaryMask,
    components: &LabeledRegionSet,
) -> (LabeledRegionSet, Vec<u32>) {
    let (width, height) = (candidates.width, candidates.height);
    let plateau_set = DisjointSet::new(candidates.len() as u32);
    for y in 0..height {
        for x in 0..width {
            if !candidates[(x, y)] {
                continue;
            }
            let index = candidates.get_index(x, y) as u32;
            let label = components.labels[(x, y)];
            let link = |nx: usize, ny: usize| {
                if candidates[(nx, ny)] && components.labels[(nx, ny)] == label {
                    plateau_set.merge(candidates.get_index(nx, ny) as u32, index);
                }
            };
            if x > 0 {
                link(x - 1, y);
            }
            if y > 0 {
                link(x, y - 1);
                if x > 0 {
                    link(x - 1, y - 1);
                }
                if x + 1 < width {
                    link(x + 1, y - 1);
                }
            }
        }
    }

    let mut labels = Array2D::from_fill(0u32, width, height);
    let mut sources = vec![0u32];
    for (i, candidate) in candidates.data.iter().enumerate() {
        if !*candidate {
            continue;
        }
        let root = plateau_set.find(i as u32) as usize;
        labels.data[i] = if root == i {
            sources.push(components.labels.data[i]);
            (sources.len() - 1) as u32
        } else {
            labels.data[root]
        };
    }
    let num_labels = (sources.len() - 1) as u32;
    (LabeledRegionSet { labels, num_labels }, sources)
}

/// Finds the watershed markers of every component: plateaus of local distance maxima over a
/// square window of `footprint` pixels (rounded up to odd).
///
/// The highest pixel of a component always passes, so every component gets at least one
/// marker.
pub fn find_markers(
    distance: &Array2D<f32>,
    components: &LabeledRegionSet,
    footprint: usize,
) -> (LabeledRegionSet, Vec<u32>) {
    let candidates = peak_candidates(distance, components, footprint / 2);
    label_plateaus(&candidates, components)
}

#[derive(Debug)]
struct FloodEntry {
    height: f32,
    age: u64,
    index: usize,
}

impl PartialEq for FloodEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloodEntry {}

impl PartialOrd for FloodEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloodEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: highest distance first, older entries first on ties
        self.height
            .total_cmp(&other.height)
            .then_with(|| other.age.cmp(&self.age))
    }
}

/// Grows `markers` over the mask in order of decreasing distance.
///
/// Each popped pixel hands its label to unlabeled mask neighbors. Ties are resolved first in,
/// first out, so the result does not depend on heap internals.
pub fn flood(
    distance: &Array2D<f32>,
    markers: &LabeledRegionSet,
    mask: &BinaryMask,
    connectivity: Connectivity,
) -> LabeledRegionSet {
    let (width, height) = (mask.width, mask.height);
    let mut labels = markers.labels.clone();
    let mut heap = BinaryHeap::new();
    let mut age = 0u64;
    for (index, label) in labels.data.iter().enumerate() {
        if *label != 0 {
            heap.push(FloodEntry {
                height: distance.data[index],
                age,
                index,
            });
            age += 1;
        }
    }

    let offsets: &[(i64, i64)] = match connectivity {
        Connectivity::Four => &[(0, -1), (-1, 0), (1, 0), (0, 1)],
        Connectivity::Eight => &[
            (-1, -1),
            (0, -1),
            (1, -1),
            (-1, 0),
            (1, 0),
            (-1, 1),
            (0, 1),
            (1, 1),
        ],
    };

    while let Some(entry) = heap.pop() {
        let label = labels.data[entry.index];
        let (x, y) = labels.get_x_y_index(entry.index);
        for (dx, dy) in offsets {
            let (nx, ny) = (x as i64 + dx, y as i64 + dy);
            if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                continue;
            }
            let neighbor = labels.get_index(nx as usize, ny as usize);
            if !mask.data[neighbor] || labels.data[neighbor] != 0 {
                continue;
            }
            labels.data[neighbor] = label;
            heap.push(FloodEntry {
                height: distance.data[neighbor],
                age,
                index: neighbor,
            });
            age += 1;
        }
    }
    LabeledRegionSet {
        labels,
        num_labels: markers.num_labels,
    }
}

/// Re-segments every component of `components` with a marker-controlled watershed on its
/// distance map.
pub fn split_touching(
    components: &LabeledRegionSet,
    footprint: usize,
    connectivity: Connectivity,
) -> WatershedSplit {
    let mask = components.to_mask();
    let distance = euclidean_distance_transform(&mask);
    let (markers, sources) = find_markers(&distance, components, footprint);
    debug!(
        "watershed: {} markers for {} components",
        markers.num_labels, components.num_labels
    );
    let regions = flood(&distance, &markers, &mask, connectivity);
    WatershedSplit { regions, sources }
}

#[cfg(test)]
mod tests {
    use super::{euclidean_distance_transform, find_markers, split_touching};
    use crate::arrays::Array2D;
    use crate::common::Connectivity;
    use crate::labeling::label_components;
    use crate::synthetic::{fill_disk, fill_ellipse, fill_rect};

    #[test]
    fn distance_inside_square() {
        let mut mask = Array2D::from_fill(false, 7, 7);
        fill_rect(&mut mask, 1, 1, 5, 5);
        let distance = euclidean_distance_transform(&mask);
        assert_eq!(distance[(0, 0)], 0.0);
        assert_eq!(distance[(1, 1)], 1.0);
        assert_eq!(distance[(2, 3)], 2.0);
        assert_eq!(distance[(3, 3)], 3.0);
        assert_eq!(distance[(5, 3)], 1.0);
    }

    #[test]
    fn distance_is_euclidean() {
        let mut mask = Array2D::from_fill(true, 4, 4);
        mask[(0, 0)] = false;
        let distance = euclidean_distance_transform(&mask);
        assert!((distance[(3, 3)] - 18f32.sqrt()).abs() < 1e-6);
        assert!((distance[(2, 1)] - 5f32.sqrt()).abs() < 1e-6);
        assert_eq!(distance[(0, 3)], 3.0);
    }

    #[test]
    fn distance_without_background() {
        let mask = Array2D::from_fill(true, 3, 2);
        let distance = euclidean_distance_transform(&mask);
        assert!(distance.data.iter().all(|d| *d == f32::MAX));
    }

    #[test]
    fn plateau_is_one_marker() {
        // a 3-pixel-wide bar has a 1-pixel-wide ridge of equal distance
        let mut mask = Array2D::from_fill(false, 12, 5);
        fill_rect(&mut mask, 1, 1, 10, 3);
        let components = label_components(&mask, Connectivity::Eight);
        let distance = euclidean_distance_transform(&mask);
        let (markers, sources) = find_markers(&distance, &components, 15);
        assert_eq!(markers.num_labels, 1);
        assert_eq!(sources, vec![0, 1]);
    }

    #[test]
    fn overlapping_disks_split_in_two() {
        let mut mask = Array2D::from_fill(false, 80, 50);
        fill_disk(&mut mask, 25.0, 25.0, 15.0);
        fill_disk(&mut mask, 47.0, 25.0, 15.0);
        let components = label_components(&mask, Connectivity::Eight);
        assert_eq!(components.num_labels, 1);
        let split = split_touching(&components, 15, Connectivity::Eight);
        assert_eq!(split.regions.num_labels, 2);
        assert_eq!(split.sources, vec![0, 1, 1]);
        assert_eq!(split.regions.labels[(20, 25)], 1);
        assert_eq!(split.regions.labels[(52, 25)], 2);
        // every foreground pixel is assigned, nothing leaks into background
        for (label, fg) in split.regions.labels.data.iter().zip(mask.data.iter()) {
            assert_eq!(*label != 0, *fg);
        }
    }

    #[test]
    fn elongated_seed_needs_footprint_near_its_length() {
        // 81 x 25 px seed along x; its ridge has three separate maxima
        let mut mask = Array2D::from_fill(false, 120, 120);
        fill_ellipse(&mut mask, 60.0, 60.0, 40.0, 12.0, 0.0);
        let components = label_components(&mask, Connectivity::Eight);
        assert_eq!(components.num_labels, 1);
        assert_eq!(split_touching(&components, 15, Connectivity::Eight).regions.num_labels, 3);
        for footprint in [25, 41, 81] {
            let split = split_touching(&components, footprint, Connectivity::Eight);
            assert_eq!(split.regions.num_labels, 1, "footprint {footprint}");
        }

        let mut tilted = Array2D::from_fill(false, 120, 120);
        fill_ellipse(&mut tilted, 60.0, 60.0, 40.0, 12.0, 0.6);
        let components = label_components(&tilted, Connectivity::Eight);
        let split = split_touching(&components, 15, Connectivity::Eight);
        assert_eq!(split.regions.num_labels, 1);
    }

    #[test]
    fn separate_disks_keep_one_marker_each() {
        let mut mask = Array2D::from_fill(false, 100, 40);
        for cx in [20.0, 50.0, 80.0] {
            fill_disk(&mut mask, cx, 20.0, 10.0);
        }
        let components = label_components(&mask, Connectivity::Eight);
        let split = split_touching(&components, 15, Connectivity::Eight);
        assert_eq!(split.regions.num_labels, 3);
        assert_eq!(split.sources, vec![0, 1, 2, 3]);
    }
}

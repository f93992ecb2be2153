use crate::arrays::{Array2D, BinaryMask};
use crate::common::{split_length_to_ranges, Connectivity};
use assume::assume;
use multiversion::multiversion;
use rayon::current_num_threads;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

/// Union-find over pixel indices.
///
/// Parents always point to a lower or equal index, so the root of a component is its first
/// pixel in raster order.
pub struct DisjointSet {
    parents: Vec<AtomicU32>,
}

impl DisjointSet {
    pub fn new(size: u32) -> Self {
        assert!(size < u32::MAX, "Size must be smaller than {}", u32::MAX);
        DisjointSet {
            parents: (0..size).map(AtomicU32::new).collect(),
        }
    }

    #[inline]
    pub fn merge(&self, node_i: u32, node_j: u32) {
        // NOTE: Rem's algorithm with splicing. Concurrent calls are only safe when they touch
        //  disjoint sets of indices, which holds for row stripes: every parent of a pixel in a
        //  stripe lies in the same stripe until the seams are merged single-threaded.
        let mut root_x = node_i as usize;
        let mut root_y = node_j as usize;
        let mut parent_x = self.parents[root_x].load(Ordering::Relaxed);
        let mut parent_y = self.parents[root_y].load(Ordering::Relaxed);
        let len = self.parents.len();
        while parent_x != parent_y {
            if parent_x > parent_y {
                assume!(unsafe: root_x < len, "root: {root_x} > {len}");
                if root_x as u32 == parent_x {
                    self.parents[root_x].store(parent_y, Ordering::Relaxed);
                    break;
                }
                let z = parent_x as usize;
                parent_x = self.parents[z].load(Ordering::Relaxed);
                assume!(unsafe: (parent_x as usize) < len, "root: {parent_x} > {len}");
                self.parents[root_x].store(parent_y, Ordering::Relaxed);
                root_x = z;
            } else {
                assume!(unsafe: root_y < len, "root: {root_y} > {len}");
                if root_y as u32 == parent_y {
                    self.parents[root_y].store(parent_x, Ordering::Relaxed);
                    break;
                }
                let z = parent_y as usize;
                parent_y = self.parents[z].load(Ordering::Relaxed);
                assume!(unsafe: (parent_y as usize) < len, "root: {parent_y} > {len}");
                self.parents[root_y].store(parent_x, Ordering::Relaxed);
                root_y = z;
            }
        }
    }

    #[inline]
    pub fn find(&self, node: u32) -> u32 {
        let mut node = node;
        loop {
            let parent = self.parents[node as usize].load(Ordering::Relaxed);
            if parent == node {
                return node;
            }
            node = parent;
        }
    }
}

/// Label image: 0 is background, `1..=num_labels` are connected foreground components.
///
/// Labels are numbered in raster order of each component's first pixel.
#[derive(Debug, Clone)]
pub struct LabeledRegionSet {
    pub labels: Array2D<u32>,
    pub num_labels: u32,
}

impl LabeledRegionSet {
    #[inline]
    pub fn width(&self) -> usize {
        self.labels.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.labels.height
    }

    /// Pixel count per label, indexed by label. Entry 0 counts background.
    pub fn region_sizes(&self) -> Vec<u64> {
        let bins = self.num_labels as usize + 1;
        self.labels
            .data
            .par_chunks(self.labels.width.max(1))
            .fold(
                || vec![0u64; bins],
                |mut acc, row| {
                    for label in row {
                        acc[*label as usize] += 1;
                    }
                    acc
                },
            )
            .reduce(
                || vec![0u64; bins],
                |mut a, b| {
                    a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                    a
                },
            )
    }

    /// Keeps labels with `keep[label] == true` and renumbers them `1..` in their existing
    /// order. Dropped regions become background.
    pub fn retain(&self, keep: &[bool]) -> LabeledRegionSet {
        debug_assert_eq!(keep.len(), self.num_labels as usize + 1);
        let mut substitute = vec![0u32; self.num_labels as usize + 1];
        let mut next = 0u32;
        for (label, kept) in keep.iter().enumerate().skip(1) {
            if *kept {
                next += 1;
                substitute[label] = next;
            }
        }
        let mut labels = Array2D::from_fill(0u32, self.width(), self.height());
        labels
            .data
            .par_chunks_mut(self.width().max(1))
            .zip(self.labels.data.par_chunks(self.width().max(1)))
            .for_each(|(out, row)| {
                out.iter_mut()
                    .zip(row)
                    .for_each(|(o, label)| *o = substitute[*label as usize])
            });
        LabeledRegionSet {
            labels,
            num_labels: next,
        }
    }

    pub fn to_mask(&self) -> BinaryMask {
        self.labels.map(|label| *label != 0)
    }
}

#[inline(always)]
fn link_row(
    mask: &BinaryMask,
    cc_set: &DisjointSet,
    row_num: usize,
    connectivity: Connectivity,
    link_left: bool,
    link_up: bool,
) {
    let width = mask.width;
    let row = mask.get_row(row_num);
    let up_row = if link_up && row_num > 0 {
        Some(mask.get_row(row_num - 1))
    } else {
        None
    };
    let row_start = mask.get_index(0, row_num);
    for (x, fg) in row.iter().enumerate() {
        if !*fg {
            continue;
        }
        let index = (row_start + x) as u32;
        if link_left && x > 0 && row[x - 1] {
            cc_set.merge(index - 1, index);
        }
        let Some(up_row) = up_row else {
            continue;
        };
        let index_up = index - width as u32;
        if up_row[x] {
            // up-left and up-right are already joined with up through the previous row
            cc_set.merge(index_up, index);
        } else if connectivity == Connectivity::Eight {
            if x > 0 && up_row[x - 1] {
                cc_set.merge(index_up - 1, index);
            }
            if x + 1 < width && up_row[x + 1] {
                cc_set.merge(index_up + 1, index);
            }
        }
    }
}

#[multiversion(targets = "simd")]
pub fn assign_disjoint_set(mask: &BinaryMask, connectivity: Connectivity) -> DisjointSet {
    let num_threads: usize = current_num_threads();
    let cc_set = DisjointSet::new(mask.data.len() as u32);
    let vsplit_ranges = split_length_to_ranges(mask.height, num_threads);
    let seam_ys: Vec<usize> = vsplit_ranges.iter().skip(1).map(|r| r.start).collect();

    fn assign_disjoint_set_thread(
        mask: &BinaryMask,
        cc_set: &DisjointSet,
        connectivity: Connectivity,
        range: Range<usize>,
    ) {
        let first = range.start;
        for row_num in range {
            link_row(mask, cc_set, row_num, connectivity, true, row_num != first);
        }
    }

    vsplit_ranges
        .into_par_iter()
        .for_each(|r| assign_disjoint_set_thread(mask, &cc_set, connectivity, r));

    seam_ys
        .into_iter()
        .for_each(|y| link_row(mask, &cc_set, y, connectivity, false, true));
    cc_set
}

/// Assigns every maximal connected set of foreground pixels its own label.
pub fn label_components(mask: &BinaryMask, connectivity: Connectivity) -> LabeledRegionSet {
    let cc_set = assign_disjoint_set(mask, connectivity);
    let mut labels = Array2D::from_fill(0u32, mask.width, mask.height);
    let mut num_labels = 0u32;
    for (i, fg) in mask.data.iter().enumerate() {
        if !*fg {
            continue;
        }
        let root = cc_set.find(i as u32) as usize;
        labels.data[i] = if root == i {
            num_labels += 1;
            num_labels
        } else {
            // roots precede their members in raster order
            labels.data[root]
        };
    }
    LabeledRegionSet { labels, num_labels }
}

#[cfg(test)]
mod tests {
    use super::{label_components, LabeledRegionSet};
    use crate::arrays::{Array2D, BinaryMask};
    use crate::common::Connectivity;
    use std::collections::VecDeque;

    fn mask_from_rows(rows: &[&str]) -> BinaryMask {
        let width = rows[0].len();
        Array2D::from_iter(
            rows.iter().flat_map(|r| r.bytes().map(|b| b == b'#')),
            width,
            rows.len(),
        )
    }

    /// Flood-fill labeling used as a reference.
    fn reference_count(mask: &BinaryMask, connectivity: Connectivity) -> u32 {
        let mut seen = vec![false; mask.len()];
        let mut count = 0;
        for start in 0..mask.len() {
            if !mask.data[start] || seen[start] {
                continue;
            }
            count += 1;
            let mut queue = VecDeque::from([start]);
            seen[start] = true;
            while let Some(i) = queue.pop_front() {
                let (x, y) = mask.get_x_y_index(i);
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if (dx == 0 && dy == 0)
                            || (connectivity == Connectivity::Four && dx != 0 && dy != 0)
                        {
                            continue;
                        }
                        let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                        if nx < 0 || ny < 0 || nx >= mask.width as i64 || ny >= mask.height as i64
                        {
                            continue;
                        }
                        let j = mask.get_index(nx as usize, ny as usize);
                        if mask.data[j] && !seen[j] {
                            seen[j] = true;
                            queue.push_back(j);
                        }
                    }
                }
            }
        }
        count
    }

    fn pseudo_random_mask(width: usize, height: usize, seed: u64) -> BinaryMask {
        let mut state = seed;
        Array2D::from_iter(
            (0..width * height).map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 33) % 100 < 45
            }),
            width,
            height,
        )
    }

    #[test]
    fn diagonal_neighbors_depend_on_connectivity() {
        let mask = mask_from_rows(&["#..", ".#.", "..#"]);
        assert_eq!(label_components(&mask, Connectivity::Four).num_labels, 3);
        assert_eq!(label_components(&mask, Connectivity::Eight).num_labels, 1);
    }

    #[test]
    fn u_shape_is_one_component() {
        let mask = mask_from_rows(&["#...#", "#...#", "#####"]);
        let labeled = label_components(&mask, Connectivity::Four);
        assert_eq!(labeled.num_labels, 1);
        assert!(labeled
            .labels
            .data
            .iter()
            .zip(mask.data.iter())
            .all(|(l, fg)| (*l == 1) == *fg));
    }

    #[test]
    fn labels_follow_raster_order() {
        let mask = mask_from_rows(&["..##", "#...", "#..#"]);
        let labeled = label_components(&mask, Connectivity::Eight);
        assert_eq!(labeled.num_labels, 3);
        assert_eq!(labeled.labels[(2, 0)], 1);
        assert_eq!(labeled.labels[(0, 1)], 2);
        assert_eq!(labeled.labels[(3, 2)], 3);
    }

    #[test]
    fn matches_flood_fill_on_noise() {
        // tall enough to be split into several stripes
        let mask = pseudo_random_mask(97, 211, 7);
        for connectivity in [Connectivity::Four, Connectivity::Eight] {
            let labeled = label_components(&mask, connectivity);
            assert_eq!(
                labeled.num_labels,
                reference_count(&mask, connectivity),
                "{connectivity:?}"
            );
            let sizes = labeled.region_sizes();
            assert_eq!(sizes.iter().sum::<u64>(), mask.len() as u64);
            assert!(sizes.iter().skip(1).all(|s| *s > 0));
        }
    }

    #[test]
    fn empty_mask_has_no_labels() {
        let mask = Array2D::from_fill(false, 16, 9);
        let labeled = label_components(&mask, Connectivity::Eight);
        assert_eq!(labeled.num_labels, 0);
        assert_eq!(labeled.region_sizes(), vec![16 * 9]);
    }

    #[test]
    fn retain_renumbers_in_order() {
        let mask = mask_from_rows(&["#.#.#", ".....", "#.#.#"]);
        let labeled: LabeledRegionSet = label_components(&mask, Connectivity::Eight);
        assert_eq!(labeled.num_labels, 6);
        let keep = [false, false, true, false, true, true, false];
        let kept = labeled.retain(&keep);
        assert_eq!(kept.num_labels, 3);
        assert_eq!(kept.labels[(2, 0)], 1);
        assert_eq!(kept.labels[(4, 0)], 0);
        assert_eq!(kept.labels[(0, 2)], 2);
        assert_eq!(kept.labels[(2, 2)], 3);
        assert_eq!(kept.to_mask().data.iter().filter(|v| **v).count(), 3);
    }
}

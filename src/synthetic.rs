//! Deterministic synthetic scans for tests and benchmarks.

use crate::arrays::{BinaryMask, RawImage};
use crate::error::Result;

/// Sets an axis-aligned `width` x `height` block with top-left corner `(x, y)`.
pub fn fill_rect(mask: &mut BinaryMask, x: usize, y: usize, width: usize, height: usize) {
    for row in y..(y + height).min(mask.height) {
        let (lo, hi) = (x.min(mask.width), (x + width).min(mask.width));
        mask.get_row_mut(row)[lo..hi].fill(true);
    }
}

/// Sets every pixel whose center is within `radius` of `(cx, cy)`.
pub fn fill_disk(mask: &mut BinaryMask, cx: f64, cy: f64, radius: f64) {
    fill_ellipse(mask, cx, cy, radius, radius, 0.0);
}

/// Sets every pixel whose center lies inside the ellipse with semi-axes `a` (major) and `b`,
/// the major axis rotated by `angle` radians from +x towards +y.
pub fn fill_ellipse(mask: &mut BinaryMask, cx: f64, cy: f64, a: f64, b: f64, angle: f64) {
    let (sin, cos) = angle.sin_cos();
    let reach = a.max(b).ceil() + 1.0;
    let y0 = (cy - reach).max(0.0) as usize;
    let y1 = ((cy + reach).max(0.0) as usize).min(mask.height.saturating_sub(1));
    let x0 = (cx - reach).max(0.0) as usize;
    let x1 = ((cx + reach).max(0.0) as usize).min(mask.width.saturating_sub(1));
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let u = dx * cos + dy * sin;
            let v = -dx * sin + dy * cos;
            if (u / a).powi(2) + (v / b).powi(2) <= 1.0 {
                mask[(x, y)] = true;
            }
        }
    }
}

/// Disks of `radius` on a regular grid with `spacing` pixels between centers, starting at
/// `(spacing / 2, spacing / 2)`.
pub fn fill_disk_grid(
    mask: &mut BinaryMask,
    columns: usize,
    rows: usize,
    spacing: f64,
    radius: f64,
) {
    for row in 0..rows {
        for column in 0..columns {
            let cx = spacing / 2.0 + column as f64 * spacing;
            let cy = spacing / 2.0 + row as f64 * spacing;
            fill_disk(mask, cx, cy, radius);
        }
    }
}

/// Renders a mask as an 8-bit RGB scan: `seed` gray on a flat `background` gray. Seeds carry a
/// small deterministic texture, darker by up to 4 levels.
pub fn render_scan(mask: &BinaryMask, background: u8, seed: u8) -> Result<RawImage> {
    let mut data = Vec::with_capacity(mask.len() * 3);
    for (i, fg) in mask.data.iter().enumerate() {
        let texture = ((i * 7 + i / mask.width.max(1) * 3) % 5) as u8;
        let value = if *fg {
            seed.saturating_sub(texture)
        } else {
            background
        };
        data.extend_from_slice(&[value, value.saturating_sub(1), value.saturating_add(1)]);
    }
    RawImage::from_rgb8(data, mask.width, mask.height)
}

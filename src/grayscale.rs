use crate::arrays::{Array2D, GrayscaleField, RawImage, Samples};
use multiversion::multiversion;
use rayon::prelude::*;
use tables::U8_UNIT_TBL;

pub(crate) mod tables {
    use static_init::dynamic;
    /// 8-bit sample to `[0, 1]` intensity.
    #[dynamic(65535)]
    pub static U8_UNIT_TBL: [f32; 256] = core::array::from_fn(|i| i as f32 / 255.0);
}

const U16_SCALE: f32 = 1.0 / u16::MAX as f32;

#[multiversion(targets = "simd")]
fn reduce_row_u8(row_in: &[u8], row_out: &mut [f32], channels: usize, color_channels: usize) {
    let norm = 1.0 / color_channels as f32;
    for (pixel, out) in row_in.chunks_exact(channels).zip(row_out.iter_mut()) {
        let mut acc = 0f32;
        for sample in &pixel[..color_channels] {
            acc += unsafe { U8_UNIT_TBL[*sample as usize] };
        }
        *out = acc * norm;
    }
}

#[multiversion(targets = "simd")]
fn reduce_row_u16(row_in: &[u16], row_out: &mut [f32], channels: usize, color_channels: usize) {
    let norm = U16_SCALE / color_channels as f32;
    for (pixel, out) in row_in.chunks_exact(channels).zip(row_out.iter_mut()) {
        let mut acc = 0f32;
        for sample in &pixel[..color_channels] {
            acc += *sample as f32;
        }
        *out = acc * norm;
    }
}

/// Collapses a multi-channel scan into a normalized intensity plane by averaging the color
/// channels of every pixel.
///
/// The raw image is consumed; its sample buffer is freed when this function returns, before
/// the caller can start thresholding.
pub fn reduce_to_grayscale(image: RawImage) -> GrayscaleField {
    let RawImage {
        samples,
        width,
        height,
        channels,
        color_channels,
    } = image;
    let mut field = Array2D::from_fill(0f32, width, height);
    let row_len = width * channels;
    match &samples {
        Samples::U8(data) => field
            .data
            .par_chunks_mut(width)
            .zip(data.par_chunks(row_len))
            .for_each(|(out, row)| reduce_row_u8(row, out, channels, color_channels)),
        Samples::U16(data) => field
            .data
            .par_chunks_mut(width)
            .zip(data.par_chunks(row_len))
            .for_each(|(out, row)| reduce_row_u16(row, out, channels, color_channels)),
    }
    drop(samples);
    field
}

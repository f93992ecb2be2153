//! Decoding scans from disk.

use crate::arrays::{RawImage, Samples};
use crate::common::MM_PER_INCH;
use crate::error::{Error, Result};
use image::DynamicImage;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::ifd::Value;
use tiff::decoder::Decoder;
use tiff::tags::Tag;

/// File extensions picked up when a directory is scanned.
pub const IMAGE_EXTENSIONS: &[&str] = &["tif", "tiff", "png", "jpg", "jpeg", "bmp"];

const RESOLUTION_UNIT_INCH: u64 = 2;
const RESOLUTION_UNIT_CENTIMETER: u64 = 3;

/// Decodes an image file into interleaved 8- or 16-bit samples.
///
/// Floating point images are converted to 16-bit RGB.
pub fn load_image(path: &Path) -> Result<RawImage> {
    let decoded = image::open(path).map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let (width, height) = (decoded.width() as usize, decoded.height() as usize);
    let (samples, channels) = match decoded {
        DynamicImage::ImageLuma8(buffer) => (Samples::U8(buffer.into_raw()), 1),
        DynamicImage::ImageLumaA8(buffer) => (Samples::U8(buffer.into_raw()), 2),
        DynamicImage::ImageRgb8(buffer) => (Samples::U8(buffer.into_raw()), 3),
        DynamicImage::ImageRgba8(buffer) => (Samples::U8(buffer.into_raw()), 4),
        DynamicImage::ImageLuma16(buffer) => (Samples::U16(buffer.into_raw()), 1),
        DynamicImage::ImageLumaA16(buffer) => (Samples::U16(buffer.into_raw()), 2),
        DynamicImage::ImageRgb16(buffer) => (Samples::U16(buffer.into_raw()), 3),
        DynamicImage::ImageRgba16(buffer) => (Samples::U16(buffer.into_raw()), 4),
        other => (Samples::U16(other.into_rgb16().into_raw()), 3),
    };
    RawImage::new(samples, width, height, channels)
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Rational(numerator, denominator) if *denominator != 0 => {
            Some(*numerator as f64 / *denominator as f64)
        }
        Value::SRational(numerator, denominator) if *denominator != 0 => {
            Some(*numerator as f64 / *denominator as f64)
        }
        Value::Float(v) => Some(*v as f64),
        Value::Double(v) => Some(*v),
        Value::Short(v) => Some(*v as f64),
        Value::Unsigned(v) => Some(*v as f64),
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Short(v) => Some(*v as u64),
        Value::Unsigned(v) => Some(*v as u64),
        Value::UnsignedBig(v) => Some(*v),
        _ => None,
    }
}

/// Horizontal resolution of a TIFF file in pixels per inch.
///
/// Reads `XResolution` and `ResolutionUnit` (inch when absent). Returns `None` for files that
/// are not TIFF, lack the tag, or store a resolution without an absolute unit.
pub fn read_tiff_ppi(path: &Path) -> Result<Option<f64>> {
    let is_tiff = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"));
    if !is_tiff {
        return Ok(None);
    }
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;
    let Some(resolution) = decoder
        .find_tag(Tag::XResolution)?
        .as_ref()
        .and_then(value_as_f64)
    else {
        return Ok(None);
    };
    let unit = decoder
        .find_tag(Tag::ResolutionUnit)?
        .as_ref()
        .and_then(value_as_u64)
        .unwrap_or(RESOLUTION_UNIT_INCH);
    let ppi = match unit {
        RESOLUTION_UNIT_INCH => resolution,
        RESOLUTION_UNIT_CENTIMETER => resolution * MM_PER_INCH / 10.0,
        _ => return Ok(None),
    };
    Ok((ppi.is_finite() && ppi > 0.0).then_some(ppi))
}

#[cfg(test)]
mod tests {
    use super::{load_image, read_tiff_ppi};
    use crate::arrays::Samples;
    use crate::error::Error;
    use image::{GrayImage, Rgb, RgbImage, RgbaImage};
    use std::fs::File;
    use tiff::encoder::{colortype, Rational, TiffEncoder};
    use tiff::tags::ResolutionUnit;

    #[test]
    fn loads_png_as_rgb8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        let mut img = RgbImage::new(5, 3);
        img.put_pixel(1, 2, Rgb([10, 20, 30]));
        img.save(&path).unwrap();
        let raw = load_image(&path).unwrap();
        assert_eq!((raw.width, raw.height, raw.channels, raw.color_channels), (5, 3, 3, 3));
        match raw.samples {
            Samples::U8(v) => assert_eq!(&v[(2 * 5 + 1) * 3..(2 * 5 + 2) * 3], &[10, 20, 30]),
            Samples::U16(_) => panic!("expected 8-bit samples"),
        }
    }

    #[test]
    fn alpha_channel_is_not_color() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        RgbaImage::new(4, 4).save(&path).unwrap();
        let raw = load_image(&path).unwrap();
        assert_eq!((raw.channels, raw.color_channels), (4, 3));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tif");
        std::fs::write(&path, b"not an image at all").unwrap();
        let err = load_image(&path).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
        assert!(err.is_input_error());
    }

    #[test]
    fn reads_resolution_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.tif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(file).unwrap();
            let mut image = encoder.new_image::<colortype::Gray8>(4, 2).unwrap();
            image.resolution(ResolutionUnit::Inch, Rational { n: 1200, d: 1 });
            image.write_data(&[0u8; 8]).unwrap();
        }
        assert_eq!(read_tiff_ppi(&path).unwrap(), Some(1200.0));

        let cm_path = dir.path().join("scan_cm.tif");
        {
            let file = File::create(&cm_path).unwrap();
            let mut encoder = TiffEncoder::new(file).unwrap();
            let mut image = encoder.new_image::<colortype::Gray8>(4, 2).unwrap();
            image.resolution(ResolutionUnit::Centimeter, Rational { n: 500, d: 1 });
            image.write_data(&[0u8; 8]).unwrap();
        }
        assert!((read_tiff_ppi(&cm_path).unwrap().unwrap() - 1270.0).abs() < 1e-9);
    }

    #[test]
    fn non_tiff_has_no_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        GrayImage::new(2, 2).save(&path).unwrap();
        assert_eq!(read_tiff_ppi(&path).unwrap(), None);
    }
}

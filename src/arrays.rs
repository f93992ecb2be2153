use crate::error::{Error, Result};
use aligned_vec::{AVec, ConstAlign};
use std::ops::{Index, IndexMut};

const ALIGN: usize = 64;

/// Row-major 2-D grid backed by a cache-line aligned buffer.
#[derive(Debug, Clone)]
pub struct Array2D<T> {
    pub data: AVec<T, ConstAlign<ALIGN>>,
    pub width: usize,
    pub height: usize,
}

/// Normalized intensity plane, values in `[0, 1]`.
pub type GrayscaleField = Array2D<f32>;

/// Foreground/background classification of every pixel.
pub type BinaryMask = Array2D<bool>;

impl<T> Array2D<T> {
    pub fn from_slice(data: &[T], width: usize, height: usize) -> Result<Self>
    where
        T: Clone,
    {
        if data.len() != width * height {
            return Err(Error::DimensionMismatch {
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data: AVec::from_slice(ALIGN, data),
        })
    }

    pub fn from_fill(value: T, width: usize, height: usize) -> Self
    where
        T: Clone + Copy,
    {
        let data: AVec<T, ConstAlign<ALIGN>> =
            AVec::from_iter(ALIGN, (0..width * height).map(|_| value));
        Self {
            width,
            height,
            data,
        }
    }

    /// Builds the grid from a row-major iterator. Panics if the iterator yields a different
    /// number of elements than `width * height`.
    pub fn from_iter<I>(iter: I, width: usize, height: usize) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let data = AVec::from_iter(ALIGN, iter);
        assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn fill(&mut self, value: T)
    where
        T: Clone,
    {
        self.data.fill(value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline(always)]
    pub fn get_row(&self, row: usize) -> &[T] {
        debug_assert!(row < self.height);
        &self.data[(self.width * row)..(self.width * row + self.width)]
    }

    pub fn get_row_mut(&mut self, row: usize) -> &mut [T] {
        debug_assert!(row < self.height);
        &mut self.data[(self.width * row)..(self.width * row + self.width)]
    }

    #[inline(always)]
    pub fn get_index(&self, x: usize, y: usize) -> usize {
        debug_assert!(
            self.width > x,
            "Index ({x}, {y}) is out of bounds ({}, {})",
            self.width,
            self.height
        );
        debug_assert!(
            self.height > y,
            "Index ({x}, {y}) is out of bounds ({}, {})",
            self.width,
            self.height
        );
        self.width * y + x
    }

    #[inline(always)]
    pub fn get_x_y_index(&self, ind: usize) -> (usize, usize) {
        debug_assert!(ind < self.data.len());
        (ind % self.width, ind / self.width)
    }

    /// Same-shaped grid with every element mapped through `f`.
    pub fn map<U, F>(&self, f: F) -> Array2D<U>
    where
        F: FnMut(&T) -> U,
    {
        Array2D {
            data: AVec::from_iter(ALIGN, self.data.iter().map(f)),
            width: self.width,
            height: self.height,
        }
    }
}

impl<T> Index<(usize, usize)> for Array2D<T> {
    type Output = T;
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.data[self.get_index(x, y)]
    }
}

impl<T> IndexMut<(usize, usize)> for Array2D<T> {
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        let idx = self.get_index(x, y);
        &mut self.data[idx]
    }
}

/// Interleaved samples of a decoded scan.
#[derive(Debug, Clone)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded scan before grayscale reduction.
///
/// A 1200 PPI letter-size tray is several hundred megabytes of samples, so the pipeline takes
/// this by value and drops it as soon as the grayscale field exists.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub samples: Samples,
    pub width: usize,
    pub height: usize,
    /// Interleaved channels per pixel. Only the first `color_channels` are averaged.
    pub channels: usize,
    /// Number of leading channels carrying intensity (alpha excluded).
    pub color_channels: usize,
}

impl RawImage {
    /// Wraps interleaved samples. The last channel of 2- and 4-channel data is treated as
    /// alpha and ignored by the reducer.
    pub fn new(samples: Samples, width: usize, height: usize, channels: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage(format!(
                "zero-area image ({width}x{height})"
            )));
        }
        if channels == 0 {
            return Err(Error::InvalidImage("image has no channels".to_string()));
        }
        let expected = width * height * channels;
        if samples.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                actual: samples.len(),
            });
        }
        let color_channels = match channels {
            2 | 4 => channels - 1,
            n => n,
        };
        Ok(Self {
            samples,
            width,
            height,
            channels,
            color_channels,
        })
    }

    pub fn from_rgb8(data: Vec<u8>, width: usize, height: usize) -> Result<Self> {
        Self::new(Samples::U8(data), width, height, 3)
    }

    pub fn from_luma8(data: Vec<u8>, width: usize, height: usize) -> Result<Self> {
        Self::new(Samples::U8(data), width, height, 1)
    }
}

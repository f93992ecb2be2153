use std::path::PathBuf;

/// Errors returned by the pipeline, the image loader and the output writers.
///
/// Degenerate scans (nothing survives thresholding) and regions with non-finite shape
/// descriptors are not errors: the first yields an empty summary, the second is dropped
/// during measurement.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration value is outside its valid range. Reported before any image is read.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigurationParse(#[from] serde_yml::Error),
    /// The file could not be decoded as an image.
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    /// The image decoded but cannot be measured (zero area, no channels, ...).
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("dimension mismatch: expected {expected} samples, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("cannot read TIFF metadata: {0}")]
    Tiff(#[from] tiff::TiffError),
    /// An existing output table has different columns than this build writes.
    #[error("{path} has header `{found}`, expected `{expected}`")]
    SchemaMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors caused by one input image. The batch driver skips such images and
    /// carries on with the rest.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::Decode { .. }
                | Error::InvalidImage(_)
                | Error::DimensionMismatch { .. }
                | Error::Tiff(_)
                | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

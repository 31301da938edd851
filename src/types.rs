use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest file the converters accept, in bytes (50 MiB).
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Number of files converted concurrently in one group.
pub const DEFAULT_BATCH_WIDTH: usize = 3;

pub const DEFAULT_QUALITY: f32 = 0.85;

/// Largest scale factor a conversion request accepts.
pub const MAX_SCALE: f32 = 10.0;

/// Largest side, in pixels, of a converted raster.
pub const MAX_OUTPUT_SIDE: u32 = 65_535;

/// Checks that `scale` is a usable resize factor.
pub fn validate_scale(scale: f32) -> Result<(), ConversionError> {
    if !scale.is_finite() || scale <= 0.0 || scale > MAX_SCALE {
        return Err(ConversionError::InvalidRequest {
            message: format!("scale {} must be in (0, {}]", scale, MAX_SCALE),
        });
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("Could not encode image: {0}")]
    Encode(String),

    #[error("PDF processing error: {0}")]
    Pdf(String),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("Invalid conversion request: {message}")]
    InvalidRequest { message: String },

    #[error("File size {actual} exceeds limit {limit}")]
    SizeLimit { actual: u64, limit: u64 },

    #[error("Invalid file content: {message}")]
    InvalidContent { message: String },

    #[error("Conversion worker failed: {0}")]
    Worker(String),
}

impl From<lopdf::Error> for ConversionError {
    fn from(err: lopdf::Error) -> Self {
        Self::Pdf(err.to_string())
    }
}

/// A file handed over by the file-selection source.
///
/// `size` is the size the source reported; it is what validation and the
/// compression metrics use, so it is kept apart from `content.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub content: Bytes,
}

impl InputFile {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    /// Builds a file whose reported size is the length of its content.
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        let content = content.into();
        Self::new(name, content.len() as u64, content_type, content)
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

/// Output formats offered by the image converter.
///
/// `Jpg` and `Jpeg` encode identically; they differ only in the extension
/// written on the output file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Png,
    Jpg,
    Jpeg,
    Webp,
}

impl TargetFormat {
    /// Token used verbatim as the output file extension.
    pub fn token(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg | Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for TargetFormat {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" => Ok(Self::Jpg),
            "jpeg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            _ => Err(ConversionError::UnsupportedFormat {
                format: s.to_string(),
            }),
        }
    }
}

/// Parameters applied to every file of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConversionRequest {
    format: TargetFormat,
    quality: f32,
    scale: f32,
}

impl ConversionRequest {
    pub fn new(format: TargetFormat, quality: f32, scale: f32) -> Result<Self, ConversionError> {
        if !(0.0..=1.0).contains(&quality) {
            return Err(ConversionError::InvalidRequest {
                message: format!("quality {} is outside 0.0..=1.0", quality),
            });
        }
        validate_scale(scale)?;
        Ok(Self {
            format,
            quality,
            scale,
        })
    }

    pub fn format(&self) -> TargetFormat {
        self.format
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

/// Successful conversion of one input file.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertedFile {
    pub original_name: String,
    pub converted_name: String,
    pub format: TargetFormat,
    pub original_size: u64,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    /// Signed percentage; negative when the output grew.
    pub compression_ratio: f64,
    #[serde(skip)]
    pub content: Bytes,
}

impl ConvertedFile {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Failed conversion of one input file.
#[derive(Debug, Clone)]
pub struct FailedFile {
    pub file: InputFile,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum ConversionResult {
    Success(ConvertedFile),
    Failure(FailedFile),
}

impl ConversionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn original_name(&self) -> &str {
        match self {
            Self::Success(converted) => &converted.original_name,
            Self::Failure(failed) => &failed.file.name,
        }
    }
}

/// Lifecycle of one file inside a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Errored,
}

use crate::types::*;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Limits};
use std::io::Cursor;

/// Decode, resample and encode capability the batch pipeline runs on.
///
/// Implementations are called from blocking worker threads, one file at a
/// time per call, so they must be shareable across threads.
pub trait Rasterizer: Send + Sync + 'static {
    fn decode(&self, content: &[u8]) -> Result<DynamicImage, ConversionError>;

    fn resample(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage;

    fn encode(
        &self,
        image: &DynamicImage,
        format: TargetFormat,
        quality: f32,
    ) -> Result<Vec<u8>, ConversionError>;
}

/// Rasterizer backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    filter: FilterType,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcessor {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }

    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    /// Encode image as JPEG with specified quality (1-100)
    fn encode_jpeg(&self, img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ConversionError> {
        let mut output = Vec::new();
        // JPEG has no alpha channel
        let rgb = img.to_rgb8();
        let encoder = JpegEncoder::new_with_quality(&mut output, quality);
        rgb.write_with_encoder(encoder)
            .map_err(|e| ConversionError::Encode(format!("JPEG encoding failed: {}", e)))?;
        Ok(output)
    }

    /// Encode image in a lossless format
    fn encode_lossless(
        &self,
        img: &DynamicImage,
        format: ImageFormat,
    ) -> Result<Vec<u8>, ConversionError> {
        let mut output = Vec::new();
        let mut cursor = Cursor::new(&mut output);

        img.write_to(&mut cursor, format)
            .map_err(|e| ConversionError::Encode(format!("{:?} encoding failed: {}", format, e)))?;
        Ok(output)
    }
}

impl Rasterizer for ImageProcessor {
    fn decode(&self, content: &[u8]) -> Result<DynamicImage, ConversionError> {
        image::load_from_memory(content).map_err(|e| ConversionError::Decode(e.to_string()))
    }

    fn resample(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        if image.width() == width && image.height() == height {
            return image.clone();
        }
        image.resize_exact(width, height, self.filter)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: TargetFormat,
        quality: f32,
    ) -> Result<Vec<u8>, ConversionError> {
        let output = match format {
            TargetFormat::Jpg | TargetFormat::Jpeg => {
                self.encode_jpeg(image, jpeg_quality(quality))?
            }
            TargetFormat::Png => self.encode_lossless(image, ImageFormat::Png)?,
            // WebP output is lossless and 8-bit only; quality does not apply
            TargetFormat::Webp => {
                let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
                self.encode_lossless(&rgba, ImageFormat::WebP)?
            }
        };

        if output.is_empty() {
            return Err(ConversionError::Encode(format!(
                "{} encoder produced no output",
                format
            )));
        }
        Ok(output)
    }
}

/// Maps a `0.0..=1.0` quality factor onto the JPEG encoder's 1-100 scale.
pub fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Pixel size of the output raster for a given scale factor.
pub fn target_dimensions(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let scale = scale as f64;
    (
        (width as f64 * scale).round() as u32,
        (height as f64 * scale).round() as u32,
    )
}

/// Refuses target rasters too large to allocate.
///
/// Uses the same allocation budget the decoder applies to its input, so a
/// file that decodes cannot be scaled into one that exhausts memory.
pub fn check_raster_size(
    width: u32,
    height: u32,
    bytes_per_pixel: u8,
) -> Result<(), ConversionError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_OUTPUT_SIDE);
    limits.max_image_height = Some(MAX_OUTPUT_SIDE);
    limits.check_dimensions(width, height).map_err(|e| {
        ConversionError::Encode(format!("target raster {}x{} refused: {}", width, height, e))
    })?;

    let bytes = width as u64 * height as u64 * bytes_per_pixel as u64;
    if let Some(max_alloc) = limits.max_alloc {
        if bytes > max_alloc {
            return Err(ConversionError::Encode(format!(
                "target raster {}x{} needs {} bytes, limit is {}",
                width, height, bytes, max_alloc
            )));
        }
    }
    Ok(())
}

/// Signed size change in percent, rounded to one decimal place.
///
/// Positive values mean the output shrank.
pub fn compression_ratio(original_size: u64, converted_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    let ratio = (original_size as f64 - converted_size as f64) / original_size as f64 * 100.0;
    (ratio * 10.0).round() / 10.0
}

/// Name of the converted file: the input name up to its first `.` followed by
/// the target token.
pub fn output_file_name(input_name: &str, format: TargetFormat) -> String {
    let base_name = input_name.split('.').next().unwrap_or(input_name);
    format!("{}.{}", base_name, format.token())
}

/// Runs one file through decode, resample and encode.
pub fn convert_file<R: Rasterizer + ?Sized>(
    rasterizer: &R,
    file: &InputFile,
    request: &ConversionRequest,
) -> Result<ConvertedFile, ConversionError> {
    let img = rasterizer.decode(&file.content)?;
    let (width, height) = target_dimensions(img.width(), img.height(), request.scale());

    if width == 0 || height == 0 {
        return Err(ConversionError::Encode(format!(
            "scaled image of {}x{} has no pixels",
            width, height
        )));
    }
    check_raster_size(width, height, img.color().bytes_per_pixel())?;

    let resized = rasterizer.resample(&img, width, height);
    let content = rasterizer.encode(&resized, request.format(), request.quality())?;
    let size = content.len() as u64;
    let converted_name = output_file_name(&file.name, request.format());

    log::info!(
        "Converted {} -> {} ({}x{}, {} -> {} bytes)",
        file.name,
        converted_name,
        width,
        height,
        file.size,
        size
    );

    Ok(ConvertedFile {
        original_name: file.name.clone(),
        converted_name,
        format: request.format(),
        original_size: file.size,
        size,
        width,
        height,
        compression_ratio: compression_ratio(file.size, size),
        content: content.into(),
    })
}

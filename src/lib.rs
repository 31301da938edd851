//! Turtle Convert Library
//!
//! Batch image conversion (PNG, JPEG, WebP) with resizing and size metrics,
//! plus PDF page splitting and a small PDF multi-tool (merge, split, compress).

pub mod batch;
pub mod config;
pub mod converter;
pub mod image_processor;
pub mod pdf_processor;
pub mod results;
pub mod selection;
pub mod types;

pub use batch::{BatchRun, BatchScheduler, LogProgress, ProgressSink};
pub use config::ConverterConfig;
pub use converter::ImageConverter;
pub use image_processor::{ImageProcessor, Rasterizer};
pub use pdf_processor::{PageNaming, PdfProcessor, PdfTool};
pub use results::ResultSet;
pub use selection::{AcceptReport, RejectReason, SelectionSet};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_through_public_api() {
        let mut converter = ImageConverter::with_config(ConverterConfig {
            batch_width: 2,
            ..ConverterConfig::default()
        });
        let files = (0..5).map(|i| {
            InputFile::from_bytes(
                format!("img{}.png", i),
                "image/png",
                image_processor::tests::png_bytes(10 + i, 10),
            )
        });
        assert_eq!(converter.add_files(files).accepted, 5);
        converter.select_format(TargetFormat::Webp);

        let results = converter.convert(&LogProgress).await.unwrap();
        let names: Vec<_> = results.export().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["img0.webp", "img1.webp", "img2.webp", "img3.webp", "img4.webp"]
        );
    }
}

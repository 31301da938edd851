use crate::batch::{BatchRun, BatchScheduler, ProgressSink};
use crate::config::ConverterConfig;
use crate::image_processor::{ImageProcessor, Rasterizer};
use crate::results::ResultSet;
use crate::selection::{AcceptReport, SelectionSet};
use crate::types::*;
use std::sync::Arc;

/// One image-conversion session: the current selection, the chosen output
/// settings and the results of the last run.
///
/// `reset` and `clear_files` only drop what the session holds. A run that is
/// already awaiting its current group is not interrupted by them.
pub struct ImageConverter<R: Rasterizer = ImageProcessor> {
    config: ConverterConfig,
    selection: SelectionSet,
    format: Option<TargetFormat>,
    quality: f32,
    scale: f32,
    results: ResultSet,
    rasterizer: Arc<R>,
}

impl ImageConverter<ImageProcessor> {
    pub fn new() -> Self {
        Self::with_config(ConverterConfig::default())
    }

    pub fn with_config(config: ConverterConfig) -> Self {
        Self::with_rasterizer(config, ImageProcessor::new())
    }
}

impl Default for ImageConverter<ImageProcessor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rasterizer> ImageConverter<R> {
    pub fn with_rasterizer(config: ConverterConfig, rasterizer: R) -> Self {
        Self {
            selection: SelectionSet::new(config.max_file_size),
            format: None,
            quality: config.default_quality,
            scale: config.default_scale,
            results: ResultSet::default(),
            rasterizer: Arc::new(rasterizer),
            config,
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn add_files(&mut self, files: impl IntoIterator<Item = InputFile>) -> AcceptReport {
        let report = self.selection.accept(files);
        if report.has_rejections() {
            log::warn!(
                "{} of {} files rejected:\n{}",
                report.rejected.len(),
                report.accepted + report.rejected.len(),
                report.summary()
            );
        }
        report
    }

    pub fn remove_file(&mut self, index: usize) -> Option<InputFile> {
        self.selection.remove(index)
    }

    /// Drops the selection and any previous results.
    pub fn clear_files(&mut self) {
        let count = self.selection.len();
        self.selection.clear();
        self.results = ResultSet::default();
        log::info!("Cleared {} selected files", count);
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn select_format(&mut self, format: TargetFormat) {
        self.format = Some(format);
    }

    pub fn format(&self) -> Option<TargetFormat> {
        self.format
    }

    pub fn set_quality(&mut self, quality: f32) -> Result<(), ConversionError> {
        if !(0.0..=1.0).contains(&quality) {
            return Err(ConversionError::InvalidRequest {
                message: format!("quality {} is outside 0.0..=1.0", quality),
            });
        }
        self.quality = quality;
        Ok(())
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn set_scale(&mut self, scale: f32) -> Result<(), ConversionError> {
        validate_scale(scale)?;
        self.scale = scale;
        Ok(())
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// True when there is something to convert and a format was chosen.
    pub fn can_convert(&self) -> bool {
        !self.selection.is_empty() && self.format.is_some()
    }

    /// Converts the whole selection with the current settings.
    pub async fn convert<P>(&mut self, progress: &P) -> Result<&ResultSet, ConversionError>
    where
        P: ProgressSink + ?Sized,
    {
        let format = self.format.ok_or_else(|| ConversionError::InvalidRequest {
            message: "no output format selected".to_string(),
        })?;
        if self.selection.is_empty() {
            return Err(ConversionError::InvalidRequest {
                message: "no files selected".to_string(),
            });
        }

        let request = ConversionRequest::new(format, self.quality, self.scale)?;
        let run = BatchRun::new(self.selection.snapshot(), request);
        let scheduler =
            BatchScheduler::with_shared(Arc::clone(&self.rasterizer), self.config.batch_width);

        self.results = scheduler.run(&run, progress).await;
        Ok(&self.results)
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    /// Number of converted outputs held and their combined size.
    pub fn result_stats(&self) -> (usize, u64) {
        self.results.storage_stats()
    }

    /// Back to a fresh session: no files, no results, no format, default
    /// quality and scale.
    pub fn reset(&mut self) {
        let (count, size) = self.result_stats();
        self.selection.clear();
        self.results = ResultSet::default();
        self.format = None;
        self.quality = self.config.default_quality;
        self.scale = self.config.default_scale;
        log::info!("Converter reset, released {} results ({} bytes)", count, size);
    }
}

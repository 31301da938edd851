use crate::types::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for the image converter.
///
/// Every field has a default, so a config file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Files converted concurrently per group.
    pub batch_width: usize,
    /// Largest accepted input, in bytes. Files strictly larger are rejected.
    pub max_file_size: u64,
    pub default_quality: f32,
    pub default_scale: f32,
    pub scale_presets: Vec<f32>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            batch_width: DEFAULT_BATCH_WIDTH,
            max_file_size: MAX_FILE_SIZE,
            default_quality: DEFAULT_QUALITY,
            default_scale: 1.0,
            scale_presets: vec![1.0, 0.75, 0.5, 0.25],
        }
    }
}

impl ConverterConfig {
    pub fn from_json(json: &str) -> Result<Self, ConversionError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConversionError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded converter config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConversionError> {
        if self.batch_width == 0 {
            return Err(invalid("batch_width must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.default_quality) {
            return Err(invalid(format!(
                "default_quality {} is outside 0.0..=1.0",
                self.default_quality
            )));
        }
        std::iter::once(&self.default_scale)
            .chain(&self.scale_presets)
            .try_for_each(|scale| validate_scale(*scale))
    }
}

fn invalid(message: impl Into<String>) -> ConversionError {
    ConversionError::InvalidRequest {
        message: message.into(),
    }
}

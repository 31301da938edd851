use crate::types::*;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Outcomes of one batch run, in the order the files were selected.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    results: Vec<ConversionResult>,
}

/// Aggregate numbers for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub original_bytes: u64,
    pub converted_bytes: u64,
    pub compression_ratio: f64,
    pub files: Vec<ConvertedFile>,
    pub failures: Vec<FailureSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub name: String,
    pub reason: String,
}

impl ResultSet {
    pub fn new(results: Vec<ConversionResult>) -> Self {
        Self { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ConversionResult> {
        self.results.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results.iter()
    }

    pub fn successes(&self) -> impl Iterator<Item = &ConvertedFile> {
        self.results.iter().filter_map(|r| match r {
            ConversionResult::Success(converted) => Some(converted),
            ConversionResult::Failure(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &FailedFile> {
        self.results.iter().filter_map(|r| match r {
            ConversionResult::Failure(failed) => Some(failed),
            ConversionResult::Success(_) => None,
        })
    }

    /// Stable split into successes and failures.
    pub fn partition(&self) -> (Vec<&ConvertedFile>, Vec<&FailedFile>) {
        (self.successes().collect(), self.failures().collect())
    }

    /// `(file name, bytes)` for every success, in selection order.
    ///
    /// Names are unique within the export: when outputs collide (`a.png` and
    /// `a.jpg` both become `a.webp`) later ones get a numeric suffix.
    pub fn export(&self) -> Vec<(String, Bytes)> {
        let mut used = HashSet::new();
        self.successes()
            .map(|c| (unique_entry_name(&c.converted_name, &mut used), c.content.clone()))
            .collect()
    }

    /// Packs every success into one ZIP archive.
    pub fn export_zip(&self) -> Result<Vec<u8>, ConversionError> {
        write_zip(self.export())
    }

    /// Number of stored outputs and their combined size.
    pub fn storage_stats(&self) -> (usize, u64) {
        self.successes()
            .fold((0, 0), |(count, size), c| (count + 1, size + c.size))
    }

    pub fn summary(&self) -> RunSummary {
        let files: Vec<ConvertedFile> = self.successes().cloned().collect();
        let failures: Vec<FailureSummary> = self
            .failures()
            .map(|f| FailureSummary {
                name: f.file.name.clone(),
                reason: f.reason.clone(),
            })
            .collect();
        let original_bytes = files.iter().map(|f| f.original_size).sum();
        let converted_bytes = files.iter().map(|f| f.size).sum();

        RunSummary {
            total: self.results.len(),
            succeeded: files.len(),
            failed: failures.len(),
            original_bytes,
            converted_bytes,
            compression_ratio: crate::image_processor::compression_ratio(
                original_bytes,
                converted_bytes,
            ),
            files,
            failures,
        }
    }
}

impl IntoIterator for ResultSet {
    type Item = ConversionResult;
    type IntoIter = std::vec::IntoIter<ConversionResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Writes `(name, bytes)` entries into an in-memory ZIP archive.
pub fn write_zip<I>(entries: I) -> Result<Vec<u8>, ConversionError>
where
    I: IntoIterator<Item = (String, Bytes)>,
{
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used = HashSet::new();
    let mut count = 0;

    for (name, content) in entries {
        let entry_name = unique_entry_name(&name, &mut used);
        zip.start_file(entry_name, options)?;
        zip.write_all(&content)?;
        count += 1;
    }

    let archive = zip.finish()?.into_inner();
    log::info!("Packed {} files into archive ({} bytes)", count, archive.len());
    Ok(archive)
}

fn unique_entry_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{}", ext)),
        None => (name, String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

impl ConvertedFile {
    /// `data:` URL of the output, for inline previews.
    pub fn preview_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type(),
            general_purpose::STANDARD.encode(&self.content)
        )
    }
}

/// Human readable size, base 1024, at most two decimals.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn success(name: &str, content: &[u8]) -> ConversionResult {
        ConversionResult::Success(ConvertedFile {
            original_name: format!("{}.png", name),
            converted_name: format!("{}.webp", name),
            format: TargetFormat::Webp,
            original_size: 100,
            size: content.len() as u64,
            width: 1,
            height: 1,
            compression_ratio: crate::image_processor::compression_ratio(100, content.len() as u64),
            content: Bytes::copy_from_slice(content),
        })
    }

    fn failure(name: &str) -> ConversionResult {
        ConversionResult::Failure(FailedFile {
            file: InputFile::from_bytes(name, "image/png", Vec::new()),
            reason: "Could not decode image: bad data".to_string(),
        })
    }

    #[test]
    fn test_partition_keeps_order() {
        let results = ResultSet::new(vec![
            success("a", b"1"),
            failure("b.png"),
            success("c", b"22"),
            failure("d.png"),
        ]);

        let (ok, failed) = results.partition();
        let ok: Vec<_> = ok.iter().map(|c| c.converted_name.as_str()).collect();
        let failed: Vec<_> = failed.iter().map(|f| f.file.name.as_str()).collect();
        assert_eq!(ok, vec!["a.webp", "c.webp"]);
        assert_eq!(failed, vec!["b.png", "d.png"]);

        let exported: Vec<_> = results.export().into_iter().map(|(name, _)| name).collect();
        assert_eq!(exported, vec!["a.webp", "c.webp"]);
        assert_eq!(results.storage_stats(), (2, 3));
    }

    #[test]
    fn test_summary_totals() {
        let results = ResultSet::new(vec![success("a", &[0; 25]), failure("b.png")]);
        let summary = results.summary();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.compression_ratio, 75.0);
        assert_eq!(summary.failures[0].name, "b.png");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["files"][0]["converted_name"], "a.webp");
        assert!(json["files"][0].get("content").is_none());
    }

    #[test]
    fn test_export_names_are_unique() {
        let results = ResultSet::new(vec![
            success("a", b"first"),
            success("b", b"other"),
            success("a", b"second"),
            success("a", b"third"),
        ]);

        let exported = results.export();
        let names: Vec<_> = exported.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a.webp", "b.webp", "a (1).webp", "a (2).webp"]);
        assert_eq!(exported[2].1, Bytes::from_static(b"second"));
    }

    #[test]
    fn test_export_zip_renames_collisions() {
        let results = ResultSet::new(vec![success("a", b"first"), success("a", b"second")]);
        let archive = results.export_zip().unwrap();

        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        assert_eq!(zip.len(), 2);
        assert_eq!(zip.by_index(0).unwrap().name(), "a.webp");

        let mut second = String::new();
        let mut entry = zip.by_index(1).unwrap();
        assert_eq!(entry.name(), "a (1).webp");
        entry.read_to_string(&mut second).unwrap();
        assert_eq!(second, "second");
    }

    #[test]
    fn test_preview_data_url() {
        let results = ResultSet::new(vec![success("a", b"hi")]);
        let converted = results.successes().next().unwrap();
        assert_eq!(converted.preview_data_url(), "data:image/webp;base64,aGk=");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(512), "512 Bytes");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(52_428_800), "50 MB");
    }
}

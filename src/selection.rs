use crate::types::*;
use serde::Serialize;
use thiserror::Error;

/// Why a candidate file was kept out of the selection.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum RejectReason {
    #[error("not a valid image")]
    NotAnImage,

    #[error("exceeds the {limit} byte limit ({actual} bytes)")]
    TooLarge { actual: u64, limit: u64 },

    #[error("duplicate file")]
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub name: String,
    pub reason: RejectReason,
}

/// Outcome of one `accept` call.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptReport {
    pub accepted: usize,
    pub rejected: Vec<Rejection>,
}

impl AcceptReport {
    pub fn has_rejections(&self) -> bool {
        !self.rejected.is_empty()
    }

    /// One line per rejection, `name: reason`.
    pub fn summary(&self) -> String {
        self.rejected
            .iter()
            .map(|r| format!("{}: {}", r.name, r.reason))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Ordered files waiting for conversion.
///
/// No two entries share both name and size.
#[derive(Debug, Clone)]
pub struct SelectionSet {
    files: Vec<InputFile>,
    max_file_size: u64,
}

impl Default for SelectionSet {
    fn default() -> Self {
        Self::new(MAX_FILE_SIZE)
    }
}

impl SelectionSet {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            files: Vec::new(),
            max_file_size,
        }
    }

    /// Validates `candidates` and appends the valid ones in arrival order.
    pub fn accept(&mut self, candidates: impl IntoIterator<Item = InputFile>) -> AcceptReport {
        let mut report = AcceptReport::default();

        for file in candidates {
            match self.check(&file) {
                Ok(()) => {
                    log::debug!("Accepted {} ({} bytes)", file.name, file.size);
                    self.files.push(file);
                    report.accepted += 1;
                }
                Err(reason) => {
                    log::warn!("Rejected {}: {}", file.name, reason);
                    report.rejected.push(Rejection {
                        name: file.name,
                        reason,
                    });
                }
            }
        }

        report
    }

    fn check(&self, file: &InputFile) -> Result<(), RejectReason> {
        if !file.is_image() {
            return Err(RejectReason::NotAnImage);
        }
        if file.size > self.max_file_size {
            return Err(RejectReason::TooLarge {
                actual: file.size,
                limit: self.max_file_size,
            });
        }
        if self.contains(&file.name, file.size) {
            return Err(RejectReason::Duplicate);
        }
        Ok(())
    }

    pub fn contains(&self, name: &str, size: u64) -> bool {
        self.files.iter().any(|f| f.name == name && f.size == size)
    }

    pub fn remove(&mut self, index: usize) -> Option<InputFile> {
        if index < self.files.len() {
            Some(self.files.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[InputFile] {
        &self.files
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Copy of the current selection for a batch run. File contents are
    /// reference counted, so this does not copy pixel data.
    pub fn snapshot(&self) -> Vec<InputFile> {
        self.files.clone()
    }
}

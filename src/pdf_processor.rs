use crate::batch::ProgressSink;
use crate::results::write_zip;
use crate::types::*;
use bytes::Bytes;
use lopdf::{Document as PdfDocument, Object, ObjectId};
use std::fmt;
use std::str::FromStr;

pub const PDF_MIME_TYPE: &str = "application/pdf";

/// How split pages are named.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PageNaming {
    /// `Page 1`, `Page 2`, ...
    #[default]
    Auto,
    /// One name per page; missing or blank names fall back to the automatic one.
    Manual(Vec<String>),
}

impl PageNaming {
    pub fn names(&self, page_count: usize) -> Vec<String> {
        (0..page_count)
            .map(|i| {
                let manual = match self {
                    Self::Manual(names) => {
                        names.get(i).map(|n| n.trim()).filter(|n| !n.is_empty())
                    }
                    Self::Auto => None,
                };
                manual
                    .map(safe_page_name)
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| default_page_name(i + 1))
            })
            .collect()
    }
}

pub fn default_page_name(page_number: usize) -> String {
    format!("Page {}", page_number)
}

/// Strips path separators and control characters so a page name can only
/// ever name a file, never a directory.
fn safe_page_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace()).to_string()
}

/// One page extracted as its own document.
#[derive(Debug, Clone)]
pub struct PdfPage {
    pub number: u32,
    pub name: String,
    pub content: Bytes,
}

impl PdfPage {
    pub fn file_name(&self) -> String {
        format!("{}.pdf", self.name)
    }
}

/// A parsed PDF ready for splitting.
pub struct LoadedPdf {
    pub name: String,
    pub size: u64,
    document: PdfDocument,
}

impl LoadedPdf {
    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// Name of the ZIP holding every page: `<name without .pdf>_pages.zip`.
    pub fn archive_name(&self) -> String {
        let stem = self.name.strip_suffix(".pdf").unwrap_or(&self.name);
        format!("{}_pages.zip", stem)
    }
}

/// Operations offered by the PDF multi-tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfTool {
    Merge,
    Split,
    WordToPdf,
    PdfToWord,
    Compress,
    Unlock,
}

impl PdfTool {
    pub fn name(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Split => "split",
            Self::WordToPdf => "word-to-pdf",
            Self::PdfToWord => "pdf-to-word",
            Self::Compress => "compress",
            Self::Unlock => "unlock",
        }
    }

    pub fn output_name(self) -> String {
        format!("result_{}.pdf", self.name())
    }
}

impl fmt::Display for PdfTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PdfTool {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(Self::Merge),
            "split" => Ok(Self::Split),
            "word-to-pdf" => Ok(Self::WordToPdf),
            "pdf-to-word" => Ok(Self::PdfToWord),
            "compress" => Ok(Self::Compress),
            "unlock" => Ok(Self::Unlock),
            _ => Err(ConversionError::UnsupportedOperation {
                operation: s.to_string(),
            }),
        }
    }
}

/// Output of one multi-tool operation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub file_name: String,
    pub content: Bytes,
}

pub struct PdfProcessor {
    max_file_size: u64,
}

impl Default for PdfProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfProcessor {
    pub fn new() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// Checks the declared type and size of a PDF upload.
    pub fn validate(&self, file: &InputFile) -> Result<(), ConversionError> {
        if file.content_type != PDF_MIME_TYPE {
            return Err(ConversionError::InvalidContent {
                message: format!("{} is not a PDF ({})", file.name, file.content_type),
            });
        }
        if file.size > self.max_file_size {
            return Err(ConversionError::SizeLimit {
                actual: file.size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    pub fn load(&self, file: &InputFile) -> Result<LoadedPdf, ConversionError> {
        self.validate(file)?;
        let document = PdfDocument::load_mem(&file.content)
            .map_err(|e| ConversionError::Pdf(format!("Failed to load {}: {}", file.name, e)))?;

        let pdf = LoadedPdf {
            name: file.name.clone(),
            size: file.size,
            document,
        };
        log::info!("Loaded {} ({} bytes, {} pages)", pdf.name, pdf.size, pdf.page_count());
        Ok(pdf)
    }

    /// Extracts every page as a single-page document, one after another.
    ///
    /// A page that cannot be extracted is logged and left out; progress still
    /// counts it.
    pub fn split_pages<P>(
        &self,
        pdf: &LoadedPdf,
        naming: &PageNaming,
        progress: &P,
    ) -> Vec<PdfPage>
    where
        P: ProgressSink + ?Sized,
    {
        let page_numbers: Vec<u32> = pdf.document.get_pages().keys().copied().collect();
        let total = page_numbers.len();
        let names = naming.names(total);
        let mut pages = Vec::with_capacity(total);

        for (index, number) in page_numbers.iter().enumerate() {
            match self.extract_page(&pdf.document, *number) {
                Ok(content) => pages.push(PdfPage {
                    number: *number,
                    name: names[index].clone(),
                    content: content.into(),
                }),
                Err(e) => log::error!("Failed to extract page {} of {}: {}", number, pdf.name, e),
            }
            progress.on_progress(index + 1, total);
        }

        log::info!("Split {} into {}/{} pages", pdf.name, pages.len(), total);
        pages
    }

    /// Packs split pages into a ZIP archive named after the source document.
    pub fn pages_archive(
        &self,
        pdf: &LoadedPdf,
        pages: &[PdfPage],
    ) -> Result<ToolOutput, ConversionError> {
        let content = write_zip(pages.iter().map(|p| (p.file_name(), p.content.clone())))?;
        Ok(ToolOutput {
            file_name: pdf.archive_name(),
            content: content.into(),
        })
    }

    fn extract_page(&self, document: &PdfDocument, number: u32) -> Result<Vec<u8>, ConversionError> {
        let mut single = document.clone();
        let others: Vec<u32> = single
            .get_pages()
            .keys()
            .copied()
            .filter(|n| *n != number)
            .collect();
        single.delete_pages(&others);
        single.prune_objects();
        save(&mut single)
    }

    /// Runs one multi-tool operation over `files`.
    ///
    /// Conversions to and from Word and password removal are not available
    /// and return `UnsupportedOperation` instead of echoing the input.
    pub fn run_tool(&self, tool: PdfTool, files: &[InputFile]) -> Result<ToolOutput, ConversionError> {
        let first = files.first().ok_or_else(|| ConversionError::InvalidRequest {
            message: format!("{} needs at least one file", tool),
        })?;

        log::info!("Running {} on {} files", tool, files.len());
        let content = match tool {
            PdfTool::Merge => self.merge(files)?,
            PdfTool::Split => self.first_page(first)?,
            PdfTool::Compress => self.optimize(first)?,
            PdfTool::WordToPdf | PdfTool::PdfToWord | PdfTool::Unlock => {
                return Err(ConversionError::UnsupportedOperation {
                    operation: tool.to_string(),
                })
            }
        };

        Ok(ToolOutput {
            file_name: tool.output_name(),
            content: content.into(),
        })
    }

    /// Concatenates the pages of every document in input order.
    pub fn merge(&self, files: &[InputFile]) -> Result<Vec<u8>, ConversionError> {
        let mut max_id = 1;
        let mut pages: Vec<(ObjectId, Object)> = Vec::new();
        let mut objects = std::collections::BTreeMap::new();

        for file in files {
            let mut doc = self.load(file)?.document;
            doc.renumber_objects_with(max_id);
            max_id = doc.max_id + 1;

            for (_, page_id) in doc.get_pages() {
                let page = doc.get_object(page_id)?.clone();
                pages.push((page_id, page));
            }
            objects.extend(doc.objects);
        }

        let mut merged = PdfDocument::with_version("1.5");
        let mut catalog: Option<(ObjectId, Object)> = None;
        let mut page_tree: Option<(ObjectId, lopdf::Dictionary)> = None;

        for (object_id, object) in objects {
            let type_name = object.type_name().unwrap_or("").to_string();
            match type_name.as_str() {
                "Catalog" => {
                    let id = catalog.as_ref().map(|(id, _)| *id).unwrap_or(object_id);
                    catalog = Some((id, object));
                }
                "Pages" => {
                    let mut dictionary = object.as_dict()?.clone();
                    if let Some((_, previous)) = &page_tree {
                        dictionary.extend(previous);
                    }
                    let id = page_tree.as_ref().map(|(id, _)| *id).unwrap_or(object_id);
                    page_tree = Some((id, dictionary));
                }
                // pages are re-parented below, outlines would point at stale ids
                "Page" | "Outlines" | "Outline" => {}
                _ => {
                    merged.objects.insert(object_id, object);
                }
            }
        }

        let (catalog_id, catalog) =
            catalog.ok_or_else(|| ConversionError::Pdf("no document catalog found".to_string()))?;
        let (tree_id, mut tree) =
            page_tree.ok_or_else(|| ConversionError::Pdf("no page tree found".to_string()))?;

        let page_count = pages.len();
        let mut kids = Vec::with_capacity(page_count);
        for (page_id, page) in pages {
            let mut dictionary = page.as_dict()?.clone();
            dictionary.set("Parent", tree_id);
            merged.objects.insert(page_id, Object::Dictionary(dictionary));
            kids.push(Object::Reference(page_id));
        }

        tree.set("Count", page_count as i64);
        tree.set("Kids", kids);
        merged.objects.insert(tree_id, Object::Dictionary(tree));

        let mut catalog = catalog.as_dict()?.clone();
        catalog.set("Pages", tree_id);
        catalog.remove(b"Outlines");
        merged.objects.insert(catalog_id, Object::Dictionary(catalog));

        merged.trailer.set("Root", catalog_id);
        merged.max_id = merged.objects.keys().map(|(id, _)| *id).max().unwrap_or(0);
        merged.renumber_objects();
        compress_streams(&mut merged);

        log::info!("Merged {} documents into {} pages", files.len(), page_count);
        save(&mut merged)
    }

    /// First page of the document as its own PDF.
    pub fn first_page(&self, file: &InputFile) -> Result<Vec<u8>, ConversionError> {
        let pdf = self.load(file)?;
        let first = pdf
            .document
            .get_pages()
            .keys()
            .next()
            .copied()
            .ok_or_else(|| ConversionError::Pdf(format!("{} has no pages", file.name)))?;
        self.extract_page(&pdf.document, first)
    }

    /// Optimize existing PDF by removing unreferenced objects and compressing streams
    pub fn optimize(&self, file: &InputFile) -> Result<Vec<u8>, ConversionError> {
        let mut doc = self.load(file)?.document;
        doc.prune_objects();
        compress_streams(&mut doc);
        let output = save(&mut doc)?;

        log::info!(
            "PDF optimized: {} -> {} bytes ({:.1}% reduction)",
            file.size,
            output.len(),
            crate::image_processor::compression_ratio(file.size, output.len() as u64)
        );
        Ok(output)
    }
}

/// Deflates every stream that has no filter yet.
fn compress_streams(doc: &mut PdfDocument) {
    for (id, object) in doc.objects.iter_mut() {
        if let Object::Stream(stream) = object {
            if !stream.dict.has(b"Filter") {
                if let Err(e) = stream.compress() {
                    log::warn!("Keeping stream {:?} uncompressed: {}", id, e);
                }
            }
        }
    }
}

fn save(doc: &mut PdfDocument) -> Result<Vec<u8>, ConversionError> {
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| ConversionError::Pdf(format!("Failed to save PDF: {}", e)))?;
    Ok(output)
}

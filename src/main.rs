use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use turtle_convert::pdf_processor::ToolOutput;
use turtle_convert::results::format_file_size;
use turtle_convert::{
    ConversionResult, ConverterConfig, ImageConverter, InputFile, LogProgress, PageNaming,
    PdfProcessor, PdfTool, TargetFormat,
};

#[derive(Parser)]
#[command(name = "turtle-convert", version, about = "Image and PDF conversion tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert images to another format and size
    Images {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// png, jpg, jpeg or webp
        #[arg(short, long)]
        format: TargetFormat,
        /// Quality in percent (0-100)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        quality: Option<u8>,
        #[arg(short, long)]
        scale: Option<f32>,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// Write all outputs into this ZIP instead of separate files
        #[arg(long)]
        zip: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print a JSON summary of the run
        #[arg(long)]
        report: bool,
    },
    /// Split a PDF into one document per page
    SplitPdf {
        file: PathBuf,
        /// Comma separated page names
        #[arg(long, value_delimiter = ',')]
        names: Vec<String>,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// Package the pages as a single ZIP
        #[arg(long)]
        zip: bool,
    },
    /// Merge, split or compress PDF documents
    Pdf {
        tool: PdfTool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Images {
            files,
            format,
            quality,
            scale,
            out,
            zip,
            config,
            report,
        } => {
            let config = match config {
                Some(path) => ConverterConfig::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => ConverterConfig::default(),
            };
            convert_images(config, &files, format, quality, scale, &out, zip, report).await
        }
        Command::SplitPdf {
            file,
            names,
            out,
            zip,
        } => split_pdf(&file, names, &out, zip),
        Command::Pdf { tool, files, out } => run_pdf_tool(tool, &files, &out),
    }
}

#[allow(clippy::too_many_arguments)]
async fn convert_images(
    config: ConverterConfig,
    paths: &[PathBuf],
    format: TargetFormat,
    quality: Option<u8>,
    scale: Option<f32>,
    out: &Path,
    zip: Option<PathBuf>,
    report: bool,
) -> Result<()> {
    let mut converter = ImageConverter::with_config(config);
    converter.select_format(format);
    if let Some(quality) = quality {
        converter.set_quality(quality as f32 / 100.0)?;
    }
    if let Some(scale) = scale {
        converter.set_scale(scale)?;
    }

    let files = paths.iter().map(|p| read_input(p)).collect::<Result<Vec<_>>>()?;
    let accepted = converter.add_files(files);
    for rejection in &accepted.rejected {
        eprintln!("skipped {}: {}", rejection.name, rejection.reason);
    }
    if !converter.can_convert() {
        bail!("no convertible images were given");
    }

    let results = converter.convert(&LogProgress).await?;

    for result in results.iter() {
        match result {
            ConversionResult::Success(c) => println!(
                "ok    {} -> {} ({} -> {}, {}%)",
                c.original_name,
                c.converted_name,
                format_file_size(c.original_size),
                format_file_size(c.size),
                c.compression_ratio
            ),
            ConversionResult::Failure(f) => println!("error {}: {}", f.file.name, f.reason),
        }
    }

    match zip {
        Some(path) => {
            let archive = results.export_zip()?;
            std::fs::write(&path, archive).with_context(|| format!("writing {}", path.display()))?;
        }
        None => {
            std::fs::create_dir_all(out)?;
            for (name, content) in results.export() {
                let path = out.join(&name);
                std::fs::write(&path, &content)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
        }
    }

    if report {
        println!("{}", serde_json::to_string_pretty(&results.summary())?);
    }
    Ok(())
}

fn split_pdf(path: &Path, names: Vec<String>, out: &Path, zip: bool) -> Result<()> {
    let processor = PdfProcessor::new();
    let pdf = processor.load(&read_input(path)?)?;
    let naming = if names.is_empty() {
        PageNaming::Auto
    } else {
        PageNaming::Manual(names)
    };

    let pages = processor.split_pages(&pdf, &naming, &LogProgress);
    std::fs::create_dir_all(out)?;

    if zip {
        write_output(out, &processor.pages_archive(&pdf, &pages)?)?;
    } else {
        for page in &pages {
            std::fs::write(out.join(page.file_name()), &page.content)?;
        }
    }
    println!("{} pages written", pages.len());
    Ok(())
}

fn run_pdf_tool(tool: PdfTool, paths: &[PathBuf], out: &Path) -> Result<()> {
    let files = paths.iter().map(|p| read_input(p)).collect::<Result<Vec<_>>>()?;
    let output = PdfProcessor::new()
        .run_tool(tool, &files)
        .with_context(|| format!("running {}", tool))?;

    std::fs::create_dir_all(out)?;
    write_output(out, &output)?;
    println!("{} written", output.file_name);
    Ok(())
}

fn write_output(dir: &Path, output: &ToolOutput) -> Result<()> {
    let path = dir.join(&output.file_name);
    std::fs::write(&path, &output.content).with_context(|| format!("writing {}", path.display()))
}

/// Reads a file from disk, guessing its content type from the extension.
fn read_input(path: &Path) -> Result<InputFile> {
    let content = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    Ok(InputFile::from_bytes(name, content_type, content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("turtle-convert").chain(args.iter().copied()))
    }

    #[test]
    fn test_quality_accepts_zero_to_hundred() {
        for quality in ["0", "100"] {
            let cli = parse(&["images", "a.png", "--format", "jpg", "--quality", quality]).unwrap();
            assert!(matches!(cli.command, Command::Images { quality: Some(_), .. }));
        }
        assert!(parse(&["images", "a.png", "--format", "jpg", "--quality", "101"]).is_err());
    }

    #[test]
    fn test_split_pdf_names_are_comma_separated() {
        let cli = parse(&["split-pdf", "doc.pdf", "--names", "Cover,Index"]).unwrap();
        match cli.command {
            Command::SplitPdf { names, .. } => assert_eq!(names, vec!["Cover", "Index"]),
            _ => panic!("expected split-pdf"),
        }
    }
}

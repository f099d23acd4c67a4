//! Response assembly: turn engine results into an inline JSON body or a ZIP
//! archive staged in the task's scratch directory.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::convert::engine::{ConversionResult, ConversionStatus, ErrorItem};
use crate::datamodel::convert::{ConvertDocumentsOptions, ImageRefMode, OutputFormat};
use crate::datamodel::responses::{ConvertDocumentResponse, DocumentResponse};
use crate::datamodel::task::{FileResult, TaskResult};

/// File name of the archive staged for file responses.
pub const ARCHIVE_NAME: &str = "converted_docs.zip";

/// Errors raised while assembling a response.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// The document was skipped by the engine (e.g. over limits); maps to 400.
    #[error("document was skipped: {0:?}")]
    Skipped(Vec<ErrorItem>),

    /// The document failed to convert; maps to 500.
    #[error("document conversion failed: {0:?}")]
    Conversion(Vec<ErrorItem>),

    /// A document failed and `abort_on_error` is set.
    #[error("aborting batch, document {name} failed to convert")]
    Aborted { name: String },

    /// The engine produced no results at all.
    #[error("No documents were generated by the conversion engine.")]
    Empty,

    /// Nothing was written to the output directory.
    #[error("No documents were exported.")]
    NothingExported,

    #[error("archive staging failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive creation failed: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Assemble the client-facing result.
///
/// One document not forced as file becomes an inline JSON body; anything
/// else becomes a ZIP staged under `work_dir`.
pub fn process_results(
    options: &ConvertDocumentsOptions,
    results: Vec<ConversionResult>,
    processing_time: f64,
    work_dir: &Path,
) -> Result<TaskResult, ResponseError> {
    tracing::info!(
        num_docs = results.len(),
        processing_time,
        "Processed conversion batch"
    );

    if results.is_empty() {
        return Err(ResponseError::Empty);
    }

    if results.len() == 1 && !options.return_as_file {
        let result = results.into_iter().next().expect("one result");
        let document = export_document_as_content(&result, options)?;
        return Ok(TaskResult::Inline(Box::new(ConvertDocumentResponse {
            document,
            status: result.status,
            errors: result.errors,
            processing_time,
            timings: result.timings,
        })));
    }

    let output_dir = work_dir.join("output");
    std::fs::create_dir_all(&output_dir)?;
    export_documents_as_files(&results, options, &output_dir)?;

    let entries = std::fs::read_dir(&output_dir)?.count();
    if entries == 0 {
        return Err(ResponseError::NothingExported);
    }

    let archive_path = work_dir.join(ARCHIVE_NAME);
    write_archive(&output_dir, &archive_path)?;

    Ok(TaskResult::File(FileResult {
        path: archive_path,
        filename: ARCHIVE_NAME.to_string(),
        media_type: "application/zip".to_string(),
    }))
}

/// Render the single inline document, one field per requested format.
fn export_document_as_content(
    result: &ConversionResult,
    options: &ConvertDocumentsOptions,
) -> Result<DocumentResponse, ResponseError> {
    let mut response = DocumentResponse {
        filename: result.name.clone(),
        ..DocumentResponse::default()
    };

    match result.status {
        ConversionStatus::Success | ConversionStatus::PartialSuccess => {}
        ConversionStatus::Skipped => return Err(ResponseError::Skipped(result.errors.clone())),
        ConversionStatus::Failure => {
            return Err(ResponseError::Conversion(result.errors.clone()))
        }
    }

    let document = result
        .document
        .as_ref()
        .ok_or_else(|| ResponseError::Conversion(result.errors.clone()))?;
    let image_mode = options.image_export_mode;
    let page_break = non_empty(&options.md_page_break_placeholder);

    if options.exports(OutputFormat::Json) {
        response.json_content = Some(document.clone());
    }
    if options.exports(OutputFormat::Html) {
        response.html_content = Some(document.export_to_html(image_mode));
    }
    if options.exports(OutputFormat::Text) {
        response.text_content = Some(document.export_to_markdown(image_mode, None, true));
    }
    if options.exports(OutputFormat::Markdown) {
        response.md_content = Some(document.export_to_markdown(image_mode, page_break, false));
    }
    if options.exports(OutputFormat::Doctags) {
        response.doctags_content = Some(document.export_to_doctags());
    }

    Ok(response)
}

/// Write one file per success and requested format into `output_dir`.
///
/// Individual failures are logged and counted; the batch only aborts when
/// `abort_on_error` is set.
fn export_documents_as_files(
    results: &[ConversionResult],
    options: &ConvertDocumentsOptions,
    output_dir: &Path,
) -> Result<(), ResponseError> {
    let mut success_count = 0usize;
    let mut failure_count = 0usize;
    let image_mode = options.image_export_mode;
    let page_break = non_empty(&options.md_page_break_placeholder);

    for result in results {
        let document = match (&result.status, &result.document) {
            (ConversionStatus::Success | ConversionStatus::PartialSuccess, Some(document)) => {
                success_count += 1;
                document
            }
            _ => {
                tracing::warn!(document = %result.name, "Document failed to convert");
                failure_count += 1;
                if options.abort_on_error {
                    return Err(ResponseError::Aborted {
                        name: result.name.clone(),
                    });
                }
                continue;
            }
        };

        let stem = result.stem();
        if options.exports(OutputFormat::Json) {
            let fname = output_dir.join(format!("{stem}.json"));
            tracing::info!("writing JSON output to {}", fname.display());
            let body = serde_json::to_vec_pretty(document)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(fname, body)?;
        }
        if options.exports(OutputFormat::Html) {
            let fname = output_dir.join(format!("{stem}.html"));
            tracing::info!("writing HTML output to {}", fname.display());
            std::fs::write(fname, document.export_to_html(image_mode))?;
        }
        if options.exports(OutputFormat::Text) {
            let fname = output_dir.join(format!("{stem}.txt"));
            tracing::info!("writing TXT output to {}", fname.display());
            std::fs::write(
                fname,
                document.export_to_markdown(ImageRefMode::Placeholder, None, true),
            )?;
        }
        if options.exports(OutputFormat::Markdown) {
            let fname = output_dir.join(format!("{stem}.md"));
            tracing::info!("writing Markdown output to {}", fname.display());
            std::fs::write(
                fname,
                document.export_to_markdown(image_mode, page_break, false),
            )?;
        }
        if options.exports(OutputFormat::Doctags) {
            let fname = output_dir.join(format!("{stem}.doctags"));
            tracing::info!("writing Doc Tags output to {}", fname.display());
            std::fs::write(fname, document.export_to_doctags())?;
        }
    }

    tracing::info!(
        "Processed {} docs, of which {} failed",
        success_count + failure_count,
        failure_count
    );
    Ok(())
}

/// Archive every file of `output_dir` (flat) into `archive_path`.
fn write_archive(output_dir: &Path, archive_path: &Path) -> Result<(), ResponseError> {
    let file = File::create(archive_path)?;
    let mut archive = zip::ZipWriter::new(file);
    let zip_options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut entries: Vec<_> = std::fs::read_dir(output_dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|entry| entry.path().is_file())
        .collect();
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        archive.start_file(name, zip_options)?;
        let data = std::fs::read(entry.path())?;
        archive.write_all(&data)?;
    }
    archive.finish()?;
    Ok(())
}

fn non_empty(placeholder: &str) -> Option<&str> {
    if placeholder.is_empty() {
        None
    } else {
        Some(placeholder)
    }
}

impl ResponseError {
    /// HTTP status the error translates to at the surface.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Skipped(_) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::convert::document::{DocItem, DoclingDocument, DocumentOrigin};

    fn success_result(name: &str) -> ConversionResult {
        let mut document = DoclingDocument::new("doc", DocumentOrigin::default());
        document.body = vec![
            DocItem::Title {
                text: "Title".to_string(),
            },
            DocItem::Paragraph {
                text: "Body.".to_string(),
            },
        ];
        ConversionResult {
            name: name.to_string(),
            status: ConversionStatus::Success,
            errors: Vec::new(),
            document: Some(document),
            timings: HashMap::new(),
        }
    }

    fn all_formats() -> ConvertDocumentsOptions {
        let mut options = ConvertDocumentsOptions::default();
        options.to_formats = vec![
            OutputFormat::Json,
            OutputFormat::Html,
            OutputFormat::Markdown,
            OutputFormat::Text,
            OutputFormat::Doctags,
        ];
        options
    }

    #[test]
    fn single_document_is_inline() {
        let work_dir = tempfile::tempdir().unwrap();
        let result = process_results(
            &all_formats(),
            vec![success_result("a.md")],
            0.1,
            work_dir.path(),
        )
        .unwrap();

        match result {
            TaskResult::Inline(response) => {
                assert_eq!(response.status, ConversionStatus::Success);
                assert!(response.document.md_content.is_some());
                assert!(response.document.json_content.is_some());
                assert!(response.document.html_content.is_some());
                assert!(response.document.text_content.is_some());
                assert!(response.document.doctags_content.is_some());
            }
            TaskResult::File(_) => panic!("expected inline response"),
        }
    }

    #[test]
    fn single_document_forced_as_file() {
        let work_dir = tempfile::tempdir().unwrap();
        let mut options = all_formats();
        options.return_as_file = true;

        let result = process_results(
            &options,
            vec![success_result("a.md")],
            0.1,
            work_dir.path(),
        )
        .unwrap();
        match result {
            TaskResult::File(file) => {
                assert_eq!(file.filename, ARCHIVE_NAME);
                assert_eq!(file.media_type, "application/zip");
                assert!(file.path.exists());
            }
            TaskResult::Inline(_) => panic!("expected file response"),
        }
    }

    #[test]
    fn two_documents_archive_all_formats() {
        let work_dir = tempfile::tempdir().unwrap();
        let result = process_results(
            &all_formats(),
            vec![success_result("a.md"), success_result("b.md")],
            0.1,
            work_dir.path(),
        )
        .unwrap();

        let TaskResult::File(file) = result else {
            panic!("expected file response");
        };
        let archive = zip::ZipArchive::new(File::open(&file.path).unwrap()).unwrap();
        // 2 documents x 5 formats.
        assert_eq!(archive.len(), 10);
    }

    #[test]
    fn skipped_single_document_maps_to_400() {
        let work_dir = tempfile::tempdir().unwrap();
        let mut result = success_result("a.md");
        result.status = ConversionStatus::Skipped;
        result.document = None;

        let err =
            process_results(&all_formats(), vec![result], 0.1, work_dir.path()).unwrap_err();
        assert!(matches!(err, ResponseError::Skipped(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn batch_failure_is_counted_not_fatal() {
        let work_dir = tempfile::tempdir().unwrap();
        let failed = ConversionResult::failure("b.md", "broken");
        let result = process_results(
            &all_formats(),
            vec![success_result("a.md"), failed],
            0.1,
            work_dir.path(),
        )
        .unwrap();
        let TaskResult::File(file) = result else {
            panic!("expected file response");
        };
        let archive = zip::ZipArchive::new(File::open(&file.path).unwrap()).unwrap();
        assert_eq!(archive.len(), 5);
    }

    #[test]
    fn abort_on_error_stops_the_batch() {
        let work_dir = tempfile::tempdir().unwrap();
        let mut options = all_formats();
        options.abort_on_error = true;
        let failed = ConversionResult::failure("b.md", "broken");

        let err = process_results(
            &options,
            vec![success_result("a.md"), failed],
            0.1,
            work_dir.path(),
        )
        .unwrap_err();
        assert!(matches!(err, ResponseError::Aborted { name } if name == "b.md"));
    }

    #[test]
    fn empty_batch_is_an_error() {
        let work_dir = tempfile::tempdir().unwrap();
        let err =
            process_results(&all_formats(), Vec::new(), 0.0, work_dir.path()).unwrap_err();
        assert!(matches!(err, ResponseError::Empty));
        assert_eq!(err.http_status(), 500);
    }
}

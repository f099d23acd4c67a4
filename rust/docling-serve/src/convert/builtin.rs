//! Built-in basic conversion engine.
//!
//! Converts plain-text and Markdown documents into [`DoclingDocument`]s and
//! fetches HTTP sources itself, which is enough to exercise the whole
//! orchestration path end-to-end. Deployments with a full document stack
//! plug their own [`EngineFactory`] instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::convert::document::{DocItem, DoclingDocument, DocumentOrigin};
use crate::convert::engine::{
    ConversionEngine, ConversionResult, ConversionStatus, ConvertLimits, EngineError,
    EngineFactory, EngineSource, ErrorItem, ProfilingItem,
};
use crate::convert::PipelineSpec;

/// Factory for [`BasicEngine`] instances.
///
/// Tracks which OCR engines are installed; requesting one that is not
/// yields [`EngineError::UnavailableEngine`].
#[derive(Debug, Clone)]
pub struct BasicEngineFactory {
    available_ocr_engines: Vec<String>,
}

impl Default for BasicEngineFactory {
    fn default() -> Self {
        let mut available = vec![
            "easyocr".to_string(),
            "tesseract".to_string(),
            "tesseract_cli".to_string(),
            "rapidocr".to_string(),
        ];
        if cfg!(target_os = "macos") {
            available.push("ocrmac".to_string());
        }
        Self {
            available_ocr_engines: available,
        }
    }
}

impl BasicEngineFactory {
    /// Factory with an explicit set of installed OCR engines.
    #[must_use]
    pub fn with_ocr_engines(engines: impl IntoIterator<Item = String>) -> Self {
        Self {
            available_ocr_engines: engines.into_iter().collect(),
        }
    }
}

impl EngineFactory for BasicEngineFactory {
    fn build(&self, spec: &PipelineSpec) -> Result<Arc<dyn ConversionEngine>, EngineError> {
        let ocr_kind = &spec.pipeline_options.ocr.kind;
        if spec.pipeline_options.do_ocr && !self.available_ocr_engines.contains(ocr_kind) {
            return Err(EngineError::UnavailableEngine(ocr_kind.clone()));
        }
        Ok(Arc::new(BasicEngine { spec: spec.clone() }))
    }
}

/// Basic text/Markdown engine bound to one resolved pipeline.
#[derive(Debug)]
pub struct BasicEngine {
    spec: PipelineSpec,
}

impl ConversionEngine for BasicEngine {
    fn convert_all(
        &self,
        sources: &[EngineSource],
        headers: Option<&HashMap<String, String>>,
        limits: &ConvertLimits,
    ) -> Vec<ConversionResult> {
        sources
            .iter()
            .map(|source| self.convert_one(source, headers, limits))
            .collect()
    }
}

impl BasicEngine {
    fn convert_one(
        &self,
        source: &EngineSource,
        headers: Option<&HashMap<String, String>>,
        limits: &ConvertLimits,
    ) -> ConversionResult {
        let start = Instant::now();
        let (name, data) = match source {
            EngineSource::Stream { name, data } => (name.clone(), Ok(data.clone())),
            EngineSource::Url { url } => (source_name(url), self.fetch(url, headers, limits)),
        };

        let data = match data {
            Ok(data) => data,
            Err(err) => return ConversionResult::failure(name, err),
        };

        if data.len() as u64 > limits.max_file_size {
            return skipped(
                name,
                format!(
                    "File size {} exceeds the maximum of {} bytes",
                    data.len(),
                    limits.max_file_size
                ),
            );
        }

        let Ok(text) = std::str::from_utf8(&data) else {
            return ConversionResult::failure(name, "Document is not valid UTF-8 text");
        };

        let document = parse_text(&name, text, &data, limits.page_range);
        if u64::from(document.num_pages) > limits.max_num_pages {
            return skipped(
                name,
                format!(
                    "Document has {} pages, exceeding the maximum of {}",
                    document.num_pages, limits.max_num_pages
                ),
            );
        }

        let mut timings = HashMap::new();
        timings.insert(
            "pipeline_total".to_string(),
            ProfilingItem {
                times: vec![start.elapsed().as_secs_f64()],
            },
        );

        ConversionResult {
            name,
            status: ConversionStatus::Success,
            errors: Vec::new(),
            document: Some(document),
            timings,
        }
    }

    fn fetch(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
        limits: &ConvertLimits,
    ) -> Result<Bytes, String> {
        let timeout = limits
            .document_timeout
            .or_else(|| {
                self.spec
                    .pipeline_options
                    .document_timeout
                    .map(Duration::from_secs_f64)
            })
            .unwrap_or(Duration::from_secs(120));

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        let mut request = client.get(url);
        if let Some(headers) = headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let response = request
            .send()
            .map_err(|e| format!("Failed to fetch {url}: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("Fetching {url} returned HTTP {}", response.status()));
        }
        response
            .bytes()
            .map_err(|e| format!("Failed to read body of {url}: {e}"))
    }
}

fn skipped(name: String, message: String) -> ConversionResult {
    ConversionResult {
        name,
        status: ConversionStatus::Skipped,
        errors: vec![ErrorItem {
            component_type: "document_backend".to_string(),
            module_name: "limits".to_string(),
            error_message: message,
        }],
        document: None,
        timings: HashMap::new(),
    }
}

/// Last path segment of the URL, or a fallback name.
fn source_name(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(ToString::to_string))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

fn stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Parse text/Markdown into a document. Pages are separated by form feeds;
/// `page_range` is 1-based inclusive.
fn parse_text(name: &str, text: &str, raw: &[u8], page_range: [u64; 2]) -> DoclingDocument {
    let digest = Sha256::digest(raw);
    let binary_hash = u64::from_be_bytes(digest[..8].try_into().expect("sha256 is 32 bytes"));

    let origin = DocumentOrigin {
        mimetype: if name.ends_with(".md") {
            "text/markdown".to_string()
        } else {
            "text/plain".to_string()
        },
        binary_hash,
        filename: name.to_string(),
    };

    let mut document = DoclingDocument::new(stem(name), origin);
    let pages: Vec<&str> = text.split('\u{c}').collect();
    document.num_pages = pages.len() as u32;

    let mut body = Vec::new();
    let mut saw_title = false;
    for (index, page) in pages.iter().enumerate() {
        let page_no = index as u64 + 1;
        if page_no < page_range[0] || page_no > page_range[1] {
            continue;
        }
        if index > 0 && !body.is_empty() {
            body.push(DocItem::PageBreak);
        }
        parse_page(page, &mut body, &mut saw_title);
    }
    document.body = body;
    document
}

fn parse_page(page: &str, body: &mut Vec<DocItem>, saw_title: &mut bool) {
    let mut paragraph: Vec<&str> = Vec::new();
    let mut in_code = false;
    let mut code: Vec<&str> = Vec::new();

    let mut flush_paragraph = |paragraph: &mut Vec<&str>, body: &mut Vec<DocItem>| {
        if !paragraph.is_empty() {
            body.push(DocItem::Paragraph {
                text: paragraph.join(" "),
            });
            paragraph.clear();
        }
    };

    for line in page.lines() {
        let trimmed = line.trim_end();
        if trimmed.starts_with("```") {
            if in_code {
                body.push(DocItem::Code {
                    text: code.join("\n"),
                });
                code.clear();
            } else {
                flush_paragraph(&mut paragraph, body);
            }
            in_code = !in_code;
            continue;
        }
        if in_code {
            code.push(trimmed);
            continue;
        }
        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, body);
            continue;
        }
        if let Some(heading) = trimmed.strip_prefix('#') {
            flush_paragraph(&mut paragraph, body);
            let level = heading.chars().take_while(|c| *c == '#').count() + 1;
            let text = heading.trim_start_matches('#').trim().to_string();
            if level == 1 && !*saw_title {
                *saw_title = true;
                body.push(DocItem::Title { text });
            } else {
                body.push(DocItem::SectionHeader {
                    level: level.min(6) as u8,
                    text,
                });
            }
            continue;
        }
        paragraph.push(trimmed.trim_start());
    }
    flush_paragraph(&mut paragraph, body);
    if in_code && !code.is_empty() {
        body.push(DocItem::Code {
            text: code.join("\n"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DoclingServeSettings;
    use crate::convert::prepare_pipeline;
    use crate::datamodel::convert::{ConvertDocumentsOptions, OcrEngine};

    fn default_limits() -> ConvertLimits {
        ConvertLimits {
            max_num_pages: u64::MAX,
            max_file_size: u64::MAX,
            page_range: [1, u64::MAX],
            document_timeout: None,
        }
    }

    fn build_engine() -> Arc<dyn ConversionEngine> {
        let spec = prepare_pipeline(
            &ConvertDocumentsOptions::default(),
            &DoclingServeSettings::default(),
        );
        BasicEngineFactory::default().build(&spec).unwrap()
    }

    #[test]
    fn converts_markdown_stream() {
        let engine = build_engine();
        let text = "# Title\n\n## Section\n\nBody paragraph.\n";
        let results = engine.convert_all(
            &[EngineSource::Stream {
                name: "doc.md".to_string(),
                data: Bytes::from_static(text.as_bytes()),
            }],
            None,
            &default_limits(),
        );

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.status, ConversionStatus::Success);
        let document = result.document.as_ref().unwrap();
        assert_eq!(document.schema_name, "DoclingDocument");
        assert_eq!(document.name, "doc");
        assert!(matches!(&document.body[0], DocItem::Title { text } if text == "Title"));
        assert!(matches!(
            &document.body[1],
            DocItem::SectionHeader { level: 2, text } if text == "Section"
        ));
    }

    #[test]
    fn oversize_file_is_skipped() {
        let engine = build_engine();
        let mut limits = default_limits();
        limits.max_file_size = 4;
        let results = engine.convert_all(
            &[EngineSource::Stream {
                name: "big.txt".to_string(),
                data: Bytes::from_static(b"way too large"),
            }],
            None,
            &limits,
        );
        assert_eq!(results[0].status, ConversionStatus::Skipped);
        assert!(!results[0].errors.is_empty());
    }

    #[test]
    fn invalid_utf8_fails() {
        let engine = build_engine();
        let results = engine.convert_all(
            &[EngineSource::Stream {
                name: "bin.dat".to_string(),
                data: Bytes::from_static(&[0xff, 0xfe, 0x00, 0x01]),
            }],
            None,
            &default_limits(),
        );
        assert_eq!(results[0].status, ConversionStatus::Failure);
    }

    #[test]
    fn unavailable_ocr_engine_is_rejected() {
        let factory = BasicEngineFactory::with_ocr_engines(["easyocr".to_string()]);
        let mut options = ConvertDocumentsOptions::default();
        options.ocr_engine = OcrEngine::Rapidocr;
        let spec = prepare_pipeline(&options, &DoclingServeSettings::default());
        let err = match factory.build(&spec) {
            Err(e) => e,
            Ok(_) => panic!("expected build to fail"),
        };
        assert!(matches!(err, EngineError::UnavailableEngine(name) if name == "rapidocr"));
    }

    #[test]
    fn disabled_ocr_skips_availability_check() {
        let factory = BasicEngineFactory::with_ocr_engines([]);
        let mut options = ConvertDocumentsOptions::default();
        options.do_ocr = false;
        let spec = prepare_pipeline(&options, &DoclingServeSettings::default());
        assert!(factory.build(&spec).is_ok());
    }

    #[test]
    fn form_feed_splits_pages() {
        let engine = build_engine();
        let results = engine.convert_all(
            &[EngineSource::Stream {
                name: "two-pages.txt".to_string(),
                data: Bytes::from_static(b"First page.\x0cSecond page."),
            }],
            None,
            &default_limits(),
        );
        let document = results[0].document.as_ref().unwrap();
        assert_eq!(document.num_pages, 2);
        assert!(document
            .body
            .iter()
            .any(|item| matches!(item, DocItem::PageBreak)));
    }
}

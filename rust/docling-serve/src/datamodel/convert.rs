//! Conversion options accepted by every convert endpoint.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

/// Input format(s) a conversion may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Docx,
    Pptx,
    Html,
    Image,
    Pdf,
    Asciidoc,
    Md,
    Csv,
    Xlsx,
}

impl InputFormat {
    /// All supported input formats, the default for `from_formats`.
    #[must_use]
    pub fn all() -> Vec<Self> {
        vec![
            Self::Docx,
            Self::Pptx,
            Self::Html,
            Self::Image,
            Self::Pdf,
            Self::Asciidoc,
            Self::Md,
            Self::Csv,
            Self::Xlsx,
        ]
    }
}

/// Output format(s) a conversion may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum OutputFormat {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "html")]
    Html,
    #[serde(rename = "md")]
    Markdown,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "doctags")]
    Doctags,
}

/// How images are referenced in exported documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageRefMode {
    Placeholder,
    #[default]
    Embedded,
    Referenced,
}

/// OCR engine selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngine {
    #[default]
    Easyocr,
    Tesseract,
    TesseractCli,
    Rapidocr,
    Ocrmac,
}

impl OcrEngine {
    /// Canonical name used in fingerprints and error messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easyocr => "easyocr",
            Self::Tesseract => "tesseract",
            Self::TesseractCli => "tesseract_cli",
            Self::Rapidocr => "rapidocr",
            Self::Ocrmac => "ocrmac",
        }
    }
}

/// PDF parsing backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PdfBackend {
    Pypdfium2,
    DlparseV1,
    #[default]
    DlparseV2,
    DlparseV4,
}

impl PdfBackend {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pypdfium2 => "pypdfium2",
            Self::DlparseV1 => "dlparse_v1",
            Self::DlparseV2 => "dlparse_v2",
            Self::DlparseV4 => "dlparse_v4",
        }
    }
}

/// Table structure extraction mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    #[default]
    Fast,
    Accurate,
}

/// Conversion pipeline flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PdfPipeline {
    #[default]
    Standard,
    Vlm,
}

/// Local VLM picture-description settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PictureDescriptionLocal {
    /// Model repository id, e.g. `HuggingFaceTB/SmolVLM-256M-Instruct`.
    pub repo_id: String,
    /// Prompt used when describing pictures.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Extra generation parameters forwarded verbatim to the model.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub generation_config: serde_json::Map<String, serde_json::Value>,
}

/// Remote API picture-description settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PictureDescriptionApi {
    /// Endpoint of the vision model API.
    #[schema(value_type = String)]
    pub url: Url,
    /// Additional headers for the API calls, e.g. authorization.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Model parameters, e.g. `{"model": "granite3.2-vision:2b"}`.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Prompt used when describing pictures.
    #[serde(default)]
    pub prompt: Option<String>,
}

fn default_from_formats() -> Vec<InputFormat> {
    InputFormat::all()
}

fn default_to_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::Markdown]
}

fn default_true() -> bool {
    true
}

fn default_images_scale() -> f64 {
    2.0
}

fn default_picture_area_threshold() -> f64 {
    0.05
}

fn default_page_range() -> [u64; 2] {
    [1, u64::MAX]
}

/// Options governing a document conversion.
///
/// Defaults mirror the service defaults so that an empty JSON object is a
/// valid, fully-specified request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ConvertDocumentsOptions {
    /// Input format(s) to convert from. Defaults to all formats.
    pub from_formats: Vec<InputFormat>,
    /// Output format(s) to convert to. Defaults to Markdown.
    pub to_formats: Vec<OutputFormat>,
    /// Image export mode for the document. Defaults to embedded.
    pub image_export_mode: ImageRefMode,
    /// If enabled, bitmap content is processed with OCR.
    pub do_ocr: bool,
    /// If enabled, replace existing text with OCR-generated text.
    pub force_ocr: bool,
    /// The OCR engine to use.
    pub ocr_engine: OcrEngine,
    /// Languages used by the OCR engine. Engine-specific names.
    pub ocr_lang: Option<Vec<String>>,
    /// The PDF backend to use.
    pub pdf_backend: PdfBackend,
    /// Mode to use for table structure.
    pub table_mode: TableMode,
    /// Abort the whole batch on the first failing document.
    pub abort_on_error: bool,
    /// Return the output as a zip file even for a single document.
    pub return_as_file: bool,
    /// If enabled, table structure is extracted.
    pub do_table_structure: bool,
    /// If enabled, images are extracted from the document.
    pub include_images: bool,
    /// Scale factor for images.
    pub images_scale: f64,
    /// Placeholder inserted at page breaks in the markdown export.
    pub md_page_break_placeholder: String,
    /// If enabled, code blocks are enriched.
    pub do_code_enrichment: bool,
    /// If enabled, formulas are enriched.
    pub do_formula_enrichment: bool,
    /// If enabled, pictures are classified.
    pub do_picture_classification: bool,
    /// If enabled, pictures are described with a vision model.
    pub do_picture_description: bool,
    /// Local model settings for picture description.
    pub picture_description_local: Option<PictureDescriptionLocal>,
    /// Remote API settings for picture description.
    pub picture_description_api: Option<PictureDescriptionApi>,
    /// Minimum picture area (fraction of the page) to describe.
    pub picture_description_area_threshold: f64,
    /// Conversion pipeline flavor.
    pub pipeline: PdfPipeline,
    /// 1-based inclusive page range to convert.
    pub page_range: [u64; 2],
    /// Per-document conversion timeout in seconds.
    pub document_timeout: Option<f64>,
}

impl Default for ConvertDocumentsOptions {
    fn default() -> Self {
        Self {
            from_formats: default_from_formats(),
            to_formats: default_to_formats(),
            image_export_mode: ImageRefMode::default(),
            do_ocr: default_true(),
            force_ocr: false,
            ocr_engine: OcrEngine::default(),
            ocr_lang: None,
            pdf_backend: PdfBackend::default(),
            table_mode: TableMode::default(),
            abort_on_error: false,
            return_as_file: false,
            do_table_structure: default_true(),
            include_images: default_true(),
            images_scale: default_images_scale(),
            md_page_break_placeholder: String::new(),
            do_code_enrichment: false,
            do_formula_enrichment: false,
            do_picture_classification: false,
            do_picture_description: false,
            picture_description_local: None,
            picture_description_api: None,
            picture_description_area_threshold: default_picture_area_threshold(),
            pipeline: PdfPipeline::default(),
            page_range: default_page_range(),
            document_timeout: None,
        }
    }
}

impl ConvertDocumentsOptions {
    /// Whether the given output format was requested.
    #[must_use]
    pub fn exports(&self, format: OutputFormat) -> bool {
        self.to_formats.contains(&format)
    }
}

//! Option resolution and converter construction.
//!
//! Incoming [`ConvertDocumentsOptions`] are resolved into a fully-defaulted
//! [`PipelineSpec`], the canonical structure that is fingerprinted for the
//! converter cache and handed to the engine factory.

pub mod builtin;
pub mod cache;
pub mod document;
pub mod engine;

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::config::DoclingServeSettings;
use crate::datamodel::convert::{
    ConvertDocumentsOptions, ImageRefMode, PdfPipeline, TableMode,
};
use engine::ConvertLimits;

/// Resolved OCR configuration with the engine rendered as a canonical string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrSpec {
    pub kind: String,
    pub lang: Option<Vec<String>>,
    pub force_full_page_ocr: bool,
}

/// Resolved picture-description configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PictureDescriptionSpec {
    Disabled,
    Vlm {
        repo_id: String,
        prompt: Option<String>,
        generation_config: serde_json::Map<String, serde_json::Value>,
    },
    Api {
        url: String,
        headers: HashMap<String, String>,
        params: serde_json::Map<String, serde_json::Value>,
        prompt: Option<String>,
        timeout: Option<f64>,
    },
}

/// Fully-defaulted pipeline options. Every opaque field (pipeline class,
/// backend, device) is rendered as a stable string so that equal options
/// serialize to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOptionsSpec {
    pub accelerator_device: String,
    pub artifacts_path: Option<String>,
    pub enable_remote_services: bool,
    pub allow_external_plugins: bool,
    pub document_timeout: Option<f64>,
    pub do_ocr: bool,
    pub ocr: OcrSpec,
    pub do_table_structure: bool,
    pub table_mode: String,
    pub do_code_enrichment: bool,
    pub do_formula_enrichment: bool,
    pub do_picture_classification: bool,
    pub do_picture_description: bool,
    pub picture_description: PictureDescriptionSpec,
    pub picture_description_area_threshold: f64,
    pub generate_page_images: bool,
    pub generate_picture_images: bool,
    pub images_scale: f64,
}

/// The resolved conversion pipeline: what the converter cache keys on and
/// what the engine factory consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSpec {
    /// Canonical pipeline class name.
    pub pipeline_cls: String,
    /// Canonical document backend name.
    pub backend: String,
    pub pipeline_options: PipelineOptionsSpec,
}

/// Resolve request options into a [`PipelineSpec`].
///
/// The per-document timeout is clamped to `max_document_timeout`.
#[must_use]
pub fn prepare_pipeline(
    options: &ConvertDocumentsOptions,
    settings: &DoclingServeSettings,
) -> PipelineSpec {
    let document_timeout = options
        .document_timeout
        .map(|t| t.min(settings.max_document_timeout));

    let picture_description = if let Some(api) = &options.picture_description_api {
        PictureDescriptionSpec::Api {
            url: api.url.to_string(),
            headers: api.headers.clone(),
            params: api.params.clone(),
            prompt: api.prompt.clone(),
            timeout: api.timeout,
        }
    } else if let Some(local) = &options.picture_description_local {
        PictureDescriptionSpec::Vlm {
            repo_id: local.repo_id.clone(),
            prompt: local.prompt.clone(),
            generation_config: local.generation_config.clone(),
        }
    } else {
        PictureDescriptionSpec::Disabled
    };

    // Image refs other than placeholder need rendered page images.
    let generate_page_images = options.image_export_mode != ImageRefMode::Placeholder;
    let generate_picture_images = options.image_export_mode == ImageRefMode::Referenced;

    let (pipeline_cls, backend) = match options.pipeline {
        PdfPipeline::Standard => (
            "StandardPdfPipeline".to_string(),
            options.pdf_backend.as_str().to_string(),
        ),
        PdfPipeline::Vlm => ("VlmPipeline".to_string(), "smoldocling".to_string()),
    };

    PipelineSpec {
        pipeline_cls,
        backend,
        pipeline_options: PipelineOptionsSpec {
            accelerator_device: "auto".to_string(),
            artifacts_path: settings
                .artifacts_path
                .as_ref()
                .map(|p| p.display().to_string()),
            enable_remote_services: settings.enable_remote_services,
            allow_external_plugins: settings.allow_external_plugins,
            document_timeout,
            do_ocr: options.do_ocr,
            ocr: OcrSpec {
                kind: options.ocr_engine.as_str().to_string(),
                lang: options.ocr_lang.clone(),
                force_full_page_ocr: options.force_ocr,
            },
            do_table_structure: options.do_table_structure,
            table_mode: match options.table_mode {
                TableMode::Fast => "fast".to_string(),
                TableMode::Accurate => "accurate".to_string(),
            },
            do_code_enrichment: options.do_code_enrichment,
            do_formula_enrichment: options.do_formula_enrichment,
            do_picture_classification: options.do_picture_classification,
            do_picture_description: options.do_picture_description,
            picture_description,
            picture_description_area_threshold: options.picture_description_area_threshold,
            generate_page_images,
            generate_picture_images,
            images_scale: options.images_scale,
        },
    }
}

/// Batch limits derived from the options and service settings.
#[must_use]
pub fn prepare_limits(
    options: &ConvertDocumentsOptions,
    settings: &DoclingServeSettings,
) -> ConvertLimits {
    let document_timeout = options
        .document_timeout
        .map(|t| t.min(settings.max_document_timeout))
        .map(Duration::from_secs_f64);

    ConvertLimits {
        max_num_pages: settings.max_num_pages,
        max_file_size: settings.max_file_size,
        page_range: options.page_range,
        document_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::convert::OcrEngine;

    #[test]
    fn default_options_resolve_to_standard_pipeline() {
        let settings = DoclingServeSettings::default();
        let spec = prepare_pipeline(&ConvertDocumentsOptions::default(), &settings);
        assert_eq!(spec.pipeline_cls, "StandardPdfPipeline");
        assert_eq!(spec.backend, "dlparse_v2");
        assert_eq!(spec.pipeline_options.ocr.kind, "easyocr");
        assert_eq!(
            spec.pipeline_options.picture_description,
            PictureDescriptionSpec::Disabled
        );
    }

    #[test]
    fn document_timeout_is_clamped() {
        let mut settings = DoclingServeSettings::default();
        settings.max_document_timeout = 60.0;

        let mut options = ConvertDocumentsOptions::default();
        options.document_timeout = Some(3600.0);

        let spec = prepare_pipeline(&options, &settings);
        assert_eq!(spec.pipeline_options.document_timeout, Some(60.0));
    }

    #[test]
    fn vlm_pipeline_uses_canonical_class_names() {
        let settings = DoclingServeSettings::default();
        let mut options = ConvertDocumentsOptions::default();
        options.pipeline = PdfPipeline::Vlm;
        options.ocr_engine = OcrEngine::Tesseract;

        let spec = prepare_pipeline(&options, &settings);
        assert_eq!(spec.pipeline_cls, "VlmPipeline");
        assert_eq!(spec.backend, "smoldocling");
    }

    #[test]
    fn referenced_images_enable_picture_rendering() {
        let settings = DoclingServeSettings::default();
        let mut options = ConvertDocumentsOptions::default();
        options.image_export_mode = ImageRefMode::Referenced;

        let spec = prepare_pipeline(&options, &settings);
        assert!(spec.pipeline_options.generate_page_images);
        assert!(spec.pipeline_options.generate_picture_images);
    }
}

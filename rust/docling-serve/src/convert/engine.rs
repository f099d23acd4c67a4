//! The conversion-engine seam.
//!
//! The engine is an external collaborator: the service only depends on the
//! traits defined here. A built-in basic engine lives in
//! [`crate::convert::builtin`]; real deployments plug their own factory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::convert::document::DoclingDocument;
use crate::convert::PipelineSpec;

/// Outcome of converting one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Success,
    PartialSuccess,
    Skipped,
    Failure,
}

/// One error raised while converting a document.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorItem {
    pub component_type: String,
    pub module_name: String,
    pub error_message: String,
}

/// Timing samples for one pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProfilingItem {
    pub times: Vec<f64>,
}

/// The per-document result handed back by the engine.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    /// Input file name, e.g. `2206.01062.pdf`.
    pub name: String,
    pub status: ConversionStatus,
    pub errors: Vec<ErrorItem>,
    pub document: Option<DoclingDocument>,
    pub timings: HashMap<String, ProfilingItem>,
}

impl ConversionResult {
    /// File name without its final extension, used for export file names.
    #[must_use]
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }

    /// A failed result carrying a single error.
    #[must_use]
    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ConversionStatus::Failure,
            errors: vec![ErrorItem {
                component_type: "document_backend".to_string(),
                module_name: "convert".to_string(),
                error_message: error.into(),
            }],
            document: None,
            timings: HashMap::new(),
        }
    }
}

/// One input handed to the engine: a URL it fetches itself, or bytes already
/// in memory.
#[derive(Debug, Clone)]
pub enum EngineSource {
    Url { url: String },
    Stream { name: String, data: Bytes },
}

/// Per-batch guards forwarded to the engine.
#[derive(Debug, Clone)]
pub struct ConvertLimits {
    pub max_num_pages: u64,
    pub max_file_size: u64,
    pub page_range: [u64; 2],
    pub document_timeout: Option<Duration>,
}

/// A prepared engine instance bound to one resolved pipeline.
///
/// Expensive to build (loads models, warms pipelines), cheap to reuse.
pub trait ConversionEngine: Send + Sync {
    /// Convert every source, returning one result per document in order.
    ///
    /// `headers` apply to every URL fetch of the batch.
    fn convert_all(
        &self,
        sources: &[EngineSource],
        headers: Option<&HashMap<String, String>>,
        limits: &ConvertLimits,
    ) -> Vec<ConversionResult>;

    /// Whether `convert_all` may run concurrently on the same instance.
    /// When false, callers serialise per instance.
    fn is_concurrent_safe(&self) -> bool {
        true
    }
}

/// Errors constructing an engine instance.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The requested OCR engine is not installed on this system.
    #[error(
        "The requested OCR engine (ocr_engine={0}) is not available on this system. \
         Please choose another OCR engine or contact your system administrator."
    )]
    UnavailableEngine(String),
}

/// Builds engine instances for resolved pipeline specs.
pub trait EngineFactory: Send + Sync {
    fn build(&self, spec: &PipelineSpec) -> Result<Arc<dyn ConversionEngine>, EngineError>;
}

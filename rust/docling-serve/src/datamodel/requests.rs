//! Request payloads for the convert endpoints.

use std::collections::HashMap;

use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

use crate::datamodel::convert::ConvertDocumentsOptions;

/// A document fetched over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HttpSource {
    /// HTTP url to process, e.g. `https://arxiv.org/pdf/2206.01062`.
    #[schema(value_type = String)]
    pub url: Url,
    /// Additional headers used to fetch the url, e.g. authorization, agent.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// A document submitted inline as base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FileSource {
    /// Content of the file serialized in base64, e.g. the output of
    /// `base64 -w 0 /path/to/file/pdf-to-convert.pdf`.
    pub base64_string: String,
    /// Filename of the uploaded document, e.g. `file.pdf`.
    pub filename: String,
}

impl FileSource {
    /// Decode the payload into an in-memory document stream.
    pub fn to_document_stream(&self) -> Result<DocumentStream, base64::DecodeError> {
        let data = base64::engine::general_purpose::STANDARD.decode(&self.base64_string)?;
        Ok(DocumentStream {
            name: self.filename.clone(),
            stream: Bytes::from(data),
        })
    }
}

/// An in-memory document, e.g. from a multipart upload.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentStream {
    pub name: String,
    pub stream: Bytes,
}

/// One input document of a task. Workers match on the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskSource {
    Http(HttpSource),
    File(FileSource),
    Stream(DocumentStream),
}

/// Convert request with HTTP sources.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConvertDocumentHttpSourcesRequest {
    #[serde(default)]
    pub options: ConvertDocumentsOptions,
    pub http_sources: Vec<HttpSource>,
}

/// Convert request with inline base64 file sources.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConvertDocumentFileSourcesRequest {
    #[serde(default)]
    pub options: ConvertDocumentsOptions,
    pub file_sources: Vec<FileSource>,
}

/// Either flavor of convert request, discriminated by which source list the
/// body carries.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ConvertDocumentsRequest {
    FileSources(ConvertDocumentFileSourcesRequest),
    HttpSources(ConvertDocumentHttpSourcesRequest),
}

impl ConvertDocumentsRequest {
    /// Split the request into the task source list and its options snapshot.
    #[must_use]
    pub fn into_parts(self) -> (Vec<TaskSource>, ConvertDocumentsOptions) {
        match self {
            Self::FileSources(req) => (
                req.file_sources.into_iter().map(TaskSource::File).collect(),
                req.options,
            ),
            Self::HttpSources(req) => (
                req.http_sources.into_iter().map(TaskSource::Http).collect(),
                req.options,
            ),
        }
    }
}

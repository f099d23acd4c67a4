//! Docling Serve - Asynchronous document-conversion job orchestration.
//!
//! This crate exposes a document-conversion service over HTTP: clients
//! submit URLs, inline base64 blobs, or multipart uploads together with
//! conversion options; the service queues each submission as a task, runs it
//! through a conversion engine off the request path, and serves the result
//! as inline JSON or a ZIP archive.
//!
//! # Architecture
//!
//! - [`config`]: configuration loading and validation
//! - [`datamodel`]: wire payloads and the in-memory task record
//! - [`convert`]: option resolution, options fingerprinting, the bounded
//!   converter cache, and the engine seam
//! - [`orchestrator`]: the pluggable task orchestration layer (local worker
//!   pool or remote workflow engine)
//! - [`response`]: response assembly (inline JSON vs ZIP archive)
//! - [`storage`]: per-task scratch directories
//! - [`api`]: HTTP and WebSocket endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use docling_serve::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:5001").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod convert;
pub mod datamodel;
pub mod logging;
pub mod orchestrator;
pub mod response;
pub mod server;
pub mod storage;

use std::sync::Arc;

use config::AppConfig;
use convert::cache::ConverterCache;
use orchestrator::Orchestrator;
use storage::ScratchStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Orchestrator backend selected by `eng_kind`.
    pub orchestrator: Arc<dyn Orchestrator>,
    /// Converter cache, shared with the orchestrator.
    pub converter_cache: Arc<ConverterCache>,
    /// Scratch storage root.
    pub scratch: Arc<ScratchStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("eng_kind", &self.config.settings.eng_kind)
            .field("converter_cache", &self.converter_cache)
            .finish()
    }
}

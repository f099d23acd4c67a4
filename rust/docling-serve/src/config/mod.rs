//! Configuration management.
//!
//! Configuration is loaded from defaults, an optional config file, and
//! environment variables with the `DOCLING_SERVE_` prefix, then validated
//! before the server starts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

/// Which orchestrator backend executes tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// In-process FIFO queue and worker pool.
    #[default]
    Local,
    /// External workflow engine with HTTP progress callbacks.
    Kfp,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Kfp => write!(f, "kfp"),
        }
    }
}

/// Errors raised by configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("eng_kind=kfp requires eng_kfp_endpoint to be set")]
    MissingRemoteEndpoint,

    #[error("eng_loc_num_workers must be at least 1")]
    NoWorkers,

    #[error("options_cache_size must be at least 1")]
    EmptyOptionsCache,

    #[error("configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
}

/// Server binding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5001
}

fn default_timeout() -> u64 {
    600
}

/// Service settings. Field names double as the environment keys under the
/// `DOCLING_SERVE_` prefix, e.g. `DOCLING_SERVE_ENG_LOC_NUM_WORKERS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoclingServeSettings {
    /// Directory with pre-fetched model weights; unset downloads at runtime.
    pub artifacts_path: Option<PathBuf>,
    /// Converter LRU capacity.
    pub options_cache_size: usize,
    pub allow_external_plugins: bool,
    pub enable_remote_services: bool,

    /// Upper bound in seconds for the per-document timeout.
    pub max_document_timeout: f64,
    pub max_num_pages: u64,
    pub max_file_size: u64,
    /// Seconds a synchronous convert call waits before returning 504.
    pub max_sync_wait: u64,

    /// Delete a task after its result was read once.
    pub single_use_results: bool,
    /// Seconds between the first result read and deletion.
    pub result_removal_delay: f64,
    /// Scratch root; unset creates a private temp dir removed at shutdown.
    pub scratch_path: Option<PathBuf>,

    pub cors_origins: Vec<String>,
    pub cors_methods: Vec<String>,
    pub cors_headers: Vec<String>,

    pub eng_kind: EngineKind,
    /// Local worker pool size.
    pub eng_loc_num_workers: usize,

    /// Workflow engine API endpoint (kfp backend).
    pub eng_kfp_endpoint: Option<Url>,
    pub eng_kfp_token_path: Option<PathBuf>,
    pub eng_kfp_ca_cert_path: Option<PathBuf>,
    /// Where the pipeline calls back into this service.
    pub eng_kfp_self_callback_endpoint: Option<Url>,
    pub eng_kfp_self_callback_token_path: Option<PathBuf>,
    pub eng_kfp_self_callback_ca_cert_path: Option<PathBuf>,
}

impl Default for DoclingServeSettings {
    fn default() -> Self {
        Self {
            artifacts_path: None,
            options_cache_size: 2,
            allow_external_plugins: false,
            enable_remote_services: false,
            max_document_timeout: 3_600.0 * 24.0 * 7.0,
            max_num_pages: u64::MAX,
            max_file_size: u64::MAX,
            max_sync_wait: 120,
            single_use_results: true,
            result_removal_delay: 300.0,
            scratch_path: None,
            cors_origins: vec!["*".to_string()],
            cors_methods: vec!["*".to_string()],
            cors_headers: vec!["*".to_string()],
            eng_kind: EngineKind::Local,
            eng_loc_num_workers: 2,
            eng_kfp_endpoint: None,
            eng_kfp_token_path: None,
            eng_kfp_ca_cert_path: None,
            eng_kfp_self_callback_endpoint: None,
            eng_kfp_self_callback_token_path: None,
            eng_kfp_self_callback_ca_cert_path: None,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub settings: DoclingServeSettings,
}

impl AppConfig {
    /// Load configuration from environment and config files, then validate.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::load_unchecked()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let loader = config::Config::builder()
            .add_source(config::File::with_name("config/docling-serve").required(false))
            .add_source(
                config::Environment::with_prefix("DOCLING_SERVE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config = AppConfig {
            server: ServerConfig::default(),
            settings: loader
                .try_deserialize()
                .unwrap_or_else(|_| DoclingServeSettings::default()),
        };

        // Server binding keys keep their own prefix.
        if let Ok(host) = std::env::var("DOCLING_SERVE_HOST") {
            app_config.server.host = host;
        }
        if let Ok(port) = std::env::var("DOCLING_SERVE_PORT") {
            if let Ok(port) = port.parse() {
                app_config.server.port = port;
            }
        }

        // Explicit overrides: lists and enums arrive as plain strings, and a
        // single untypable variable must not drop the other layered values.
        if let Ok(kind) = std::env::var("DOCLING_SERVE_ENG_KIND") {
            app_config.settings.eng_kind = match kind.to_lowercase().as_str() {
                "kfp" => EngineKind::Kfp,
                _ => EngineKind::Local,
            };
        }
        override_parsed(
            "DOCLING_SERVE_ENG_LOC_NUM_WORKERS",
            &mut app_config.settings.eng_loc_num_workers,
        );
        override_parsed(
            "DOCLING_SERVE_OPTIONS_CACHE_SIZE",
            &mut app_config.settings.options_cache_size,
        );
        override_parsed(
            "DOCLING_SERVE_MAX_SYNC_WAIT",
            &mut app_config.settings.max_sync_wait,
        );
        override_parsed(
            "DOCLING_SERVE_MAX_DOCUMENT_TIMEOUT",
            &mut app_config.settings.max_document_timeout,
        );
        override_parsed(
            "DOCLING_SERVE_MAX_NUM_PAGES",
            &mut app_config.settings.max_num_pages,
        );
        override_parsed(
            "DOCLING_SERVE_MAX_FILE_SIZE",
            &mut app_config.settings.max_file_size,
        );
        override_parsed(
            "DOCLING_SERVE_SINGLE_USE_RESULTS",
            &mut app_config.settings.single_use_results,
        );
        override_parsed(
            "DOCLING_SERVE_RESULT_REMOVAL_DELAY",
            &mut app_config.settings.result_removal_delay,
        );
        if let Ok(endpoint) = std::env::var("DOCLING_SERVE_ENG_KFP_ENDPOINT") {
            if let Ok(url) = endpoint.parse() {
                app_config.settings.eng_kfp_endpoint = Some(url);
            }
        }
        if let Ok(endpoint) = std::env::var("DOCLING_SERVE_ENG_KFP_SELF_CALLBACK_ENDPOINT") {
            if let Ok(url) = endpoint.parse() {
                app_config.settings.eng_kfp_self_callback_endpoint = Some(url);
            }
        }
        if let Ok(origins) = std::env::var("DOCLING_SERVE_CORS_ORIGINS") {
            app_config.settings.cors_origins = split_list(&origins);
        }
        if let Ok(methods) = std::env::var("DOCLING_SERVE_CORS_METHODS") {
            app_config.settings.cors_methods = split_list(&methods);
        }
        if let Ok(headers) = std::env::var("DOCLING_SERVE_CORS_HEADERS") {
            app_config.settings.cors_headers = split_list(&headers);
        }
        if let Ok(path) = std::env::var("DOCLING_SERVE_SCRATCH_PATH") {
            if !path.is_empty() {
                app_config.settings.scratch_path = Some(PathBuf::from(path));
            }
        }

        Ok(app_config)
    }

    /// Validate configuration combinations before startup.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.settings.eng_loc_num_workers == 0 {
            return Err(ConfigurationError::NoWorkers);
        }
        if self.settings.options_cache_size == 0 {
            return Err(ConfigurationError::EmptyOptionsCache);
        }
        if self.settings.eng_kind == EngineKind::Kfp && self.settings.eng_kfp_endpoint.is_none() {
            return Err(ConfigurationError::MissingRemoteEndpoint);
        }
        Ok(())
    }
}

fn override_parsed<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse() {
            *slot = value;
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

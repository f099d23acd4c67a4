//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::AppConfig;
use crate::convert::builtin::BasicEngineFactory;
use crate::convert::cache::ConverterCache;
use crate::logging::OpTimer;
use crate::orchestrator::{create_orchestrator, Orchestrator};
use crate::storage::ScratchStore;
use crate::{log_banner, log_init_step, log_init_warning, log_success, AppState};

/// Docling Serve version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the application with all routes and middleware.
///
/// Starts the queue processor and cache warm-up as background tasks owned by
/// the runtime; at shutdown the processor is cancelled while in-flight
/// conversions finish on the blocking pool.
pub async fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("🐥 Docling Serve v{VERSION}"),
        format!(
            "Engine: {} | Workers: {}",
            config.settings.eng_kind, config.settings.eng_loc_num_workers
        )
    );

    // [1/5] Scratch store
    let step_timer = OpTimer::new("server", "scratch_store");
    let scratch = Arc::new(ScratchStore::new(config.settings.scratch_path.as_deref())?);
    log_init_step!(
        1,
        5,
        "Scratch Store",
        format!("📁 {}", scratch.root().display())
    );
    step_timer.finish();

    // [2/5] Converter cache
    let step_timer = OpTimer::new("server", "converter_cache");
    let converter_cache = Arc::new(ConverterCache::new(
        Arc::new(BasicEngineFactory::default()),
        config.settings.options_cache_size,
    ));
    log_init_step!(
        2,
        5,
        "Converter Cache",
        format!("🧰 capacity {}", config.settings.options_cache_size)
    );
    step_timer.finish();

    // [3/5] Orchestrator
    let step_timer = OpTimer::new("server", "orchestrator");
    let orchestrator = create_orchestrator(
        &config,
        Arc::clone(&scratch),
        Arc::clone(&converter_cache),
    )?;
    log_init_step!(
        3,
        5,
        "Orchestrator",
        format!("⚡ {} engine", config.settings.eng_kind)
    );
    step_timer.finish();

    // [4/5] Queue processor and cache warm-up
    let step_timer = OpTimer::new("server", "background_tasks");
    spawn_background_tasks(Arc::clone(&orchestrator));
    log_init_step!(4, 5, "Queue Processor", "🏃 workers started");
    step_timer.finish();

    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator,
        converter_cache,
        scratch,
    };

    // [5/5] Router with middleware
    let step_timer = OpTimer::new("server", "router");
    let app = api::create_router()
        .layer(cors_layer(&config))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    log_init_step!(5, 5, "Router", "🌐 Routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("Docling Serve server created successfully");
    tracing::info!("");

    Ok(app)
}

/// Spawn the queue processor and the converter warm-up.
fn spawn_background_tasks(orchestrator: Arc<dyn Orchestrator>) {
    let processor = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if let Err(err) = processor.process_queue().await {
            tracing::error!(error = %err, "Queue processor stopped");
        }
    });

    tokio::spawn(async move {
        let timer = OpTimer::new("orchestrator", "warm_up");
        if let Err(err) = orchestrator.warm_up_caches().await {
            log_init_warning!("Converter warm-up failed: {}", err);
        }
        timer.finish();
    });
}

/// CORS layer from the configured allow-lists; `*` means any.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let settings = &config.settings;

    let origins = if settings.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            settings
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
        )
    };
    let methods = if settings.cors_methods.iter().any(|m| m == "*") {
        AllowMethods::any()
    } else {
        AllowMethods::list(
            settings
                .cors_methods
                .iter()
                .filter_map(|method| method.parse::<Method>().ok()),
        )
    };
    let headers = if settings.cors_headers.iter().any(|h| h == "*") {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(
            settings
                .cors_headers
                .iter()
                .filter_map(|header| header.parse::<HeaderName>().ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
}

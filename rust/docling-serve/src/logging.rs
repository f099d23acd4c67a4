//! Structured logging utilities.
//!
//! Provides operation timing and formatting helpers used during server
//! startup and inside the request handlers.

use std::time::Instant;

/// Operation timer for measuring and logging execution duration.
///
/// Logs the operation start on creation; call [`OpTimer::finish`] to log the
/// duration.
///
/// # Examples
///
/// ```rust,ignore
/// let timer = OpTimer::new("orchestrator", "warm_up");
/// // ... perform operation ...
/// timer.finish();
/// ```
#[derive(Debug)]
pub struct OpTimer {
    /// Component being timed (e.g. "orchestrator", "server").
    component: String,
    /// Operation being performed (e.g. "enqueue", "warm_up").
    operation: String,
    start: Instant,
}

impl OpTimer {
    /// Creates a new operation timer and logs the start.
    #[must_use]
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        let component = component.into();
        let operation = operation.into();

        tracing::debug!(
            component = %component,
            operation = %operation,
            "Operation started"
        );

        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Finishes the timer and logs the duration.
    pub fn finish(self) {
        let duration_ms = self.start.elapsed().as_millis();

        tracing::info!(
            component = %self.component,
            operation = %self.operation,
            duration_ms = duration_ms,
            "Operation completed"
        );
    }
}

/// Macro for logging initialization steps with consistent formatting.
///
/// # Examples
///
/// ```rust,ignore
/// log_init_step!(1, 5, "Scratch Store", "/tmp/docling_x");
/// ```
#[macro_export]
macro_rules! log_init_step {
    ($step:expr, $total:expr, $name:expr, $detail:expr) => {
        tracing::info!(
            step = $step,
            total = $total,
            "[{}/{}] {} - {}",
            $step,
            $total,
            $name,
            $detail
        );
    };
    ($step:expr, $total:expr, $name:expr) => {
        tracing::info!(
            step = $step,
            total = $total,
            "[{}/{}] {}",
            $step,
            $total,
            $name
        );
    };
}

/// Macro for logging warnings during initialization.
#[macro_export]
macro_rules! log_init_warning {
    ($msg:expr) => {
        tracing::warn!("⚠️  {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        tracing::warn!("⚠️  {}", format!($msg, $($arg)*));
    };
}

/// Macro for logging successful completion of major phases.
#[macro_export]
macro_rules! log_success {
    ($msg:expr) => {
        tracing::info!("✅ {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        tracing::info!("✅ {}", format!($msg, $($arg)*));
    };
}

/// Macro for logging startup banners.
#[macro_export]
macro_rules! log_banner {
    ($title:expr, $subtitle:expr) => {
        tracing::info!("");
        tracing::info!("═══════════════════════════════════════════════════");
        tracing::info!("  {}", $title);
        tracing::info!("  {}", $subtitle);
        tracing::info!("═══════════════════════════════════════════════════");
        tracing::info!("");
    };
}

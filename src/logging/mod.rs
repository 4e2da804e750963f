//! Logging infrastructure - structured tracing for the bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels
//! - Zero-cost when disabled
//! - Span-based performance tracking
//! - Console or file output

pub use tracing::{debug, debug_span, error, info, trace, warn, Level};

use crate::config::LoggingConfig;
use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the non-blocking file writer flushing for the life of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path (console when absent)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // GIR_BRIDGE_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("GIR_BRIDGE_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        // GIR_BRIDGE_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("GIR_BRIDGE_LOG_FILE") {
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("GIR_BRIDGE_LOG_JSON").is_ok();
        config.show_spans = std::env::var("GIR_BRIDGE_LOG_SPANS").is_ok();

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: Some("gir_bridge.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(section: &LoggingConfig) -> Self {
        Self {
            level: parse_level(&section.level),
            log_path: section.file.clone(),
            json_format: section.json,
            show_spans: section.spans,
        }
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "gir_bridge={}",
                config.level.as_str().to_lowercase()
            ))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer = match &config.log_path {
            Some(path) => {
                let path = Path::new(path);
                let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
                let file_name = path
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| "gir_bridge.log".into());
                let appender = tracing_appender::rolling::never(
                    directory.unwrap_or_else(|| Path::new(".")),
                    file_name,
                );
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                let base = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_span_events(span_events)
                    .with_target(true);
                if config.json_format {
                    base.json().boxed()
                } else {
                    base.boxed()
                }
            }
            None => {
                let base = fmt::layer()
                    .with_writer(io::stderr)
                    .with_span_events(span_events)
                    .with_target(true)
                    .with_thread_ids(cfg!(debug_assertions))
                    .with_line_number(cfg!(debug_assertions));
                if config.json_format {
                    base.json().boxed()
                } else {
                    base.boxed()
                }
            }
        };

        // Another subscriber may already be installed by the embedder
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Bridge-specific logging functions
// ============================================================================

/// Log a forward native call
pub fn log_native_call(callable: &str, in_count: usize, out_count: usize) {
    use tracing::debug;
    debug!(
        event = "native_call",
        callable = callable,
        in_args = in_count,
        out_args = out_count,
        "Native function called"
    );
}

/// Log a forward native call return
pub fn log_native_return(callable: &str) {
    use tracing::trace;
    trace!(
        event = "native_return",
        callable = callable,
        "Native function returned"
    );
}

/// Log a native error signal
pub fn log_native_error(callable: &str, message: &str) {
    use tracing::warn;
    warn!(
        event = "native_error",
        callable = callable,
        error = message,
        "Native function signalled an error"
    );
}

/// Log a marshalling failure
pub fn log_marshal_error(callable: &str, error: &str) {
    use tracing::debug;
    debug!(
        event = "marshal_error",
        callable = callable,
        error = error,
        "Argument marshalling failed"
    );
}

/// Log type conversion
#[inline]
pub fn log_conversion(direction: &str, tag: &str) {
    use tracing::trace;
    trace!(
        event = "type_conversion",
        direction = direction,
        tag = tag,
        "Type conversion performed"
    );
}

/// Log a native-to-script callback entry
pub fn log_callback(name: &str, arg_count: usize) {
    use tracing::trace;
    trace!(
        event = "callback",
        callback = name,
        args = arg_count,
        "Callback invoked from native code"
    );
}

/// Log closure finalization
pub fn log_closure_finalized(name: &str) {
    use tracing::debug;
    debug!(
        event = "closure_finalized",
        closure = name,
        "Closure finalized"
    );
}

/// Log a callback failure that native code has no way to observe
pub fn log_dropped_callback_error(name: &str, error: &str) {
    use tracing::error;
    error!(
        event = "callback_error",
        callback = name,
        error = error,
        "Callback failed inside native invocation"
    );
}

/// Log wrapper creation for a native instance
#[inline]
pub fn log_wrapper_created(type_name: &str, ptr: *const core::ffi::c_void) {
    use tracing::trace;
    trace!(
        event = "wrapper_created",
        type_name = type_name,
        address = ?ptr,
        "Native instance wrapped"
    );
}

/// Log library loading
pub fn log_library_loaded(name: &str) {
    use tracing::info;
    info!(
        event = "library_loaded",
        library = name,
        "Native library loaded"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &str) -> PerformanceGuard {
        PerformanceGuard {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: String,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = %self.operation,
                duration_us = elapsed.as_micros(),
                "operation completed"
            );
        }
    }
}

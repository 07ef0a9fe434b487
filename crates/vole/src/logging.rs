//! Logging setup and debug mode.
//!
//! vole logs through `tracing`. Nothing is printed until a subscriber is
//! installed, either by the embedding application or by one of the
//! `init_*` functions here. The subscriber is installed at most once per
//! process; later calls are no-ops.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard tracing filter, wins when set
//! - `VOLE_LOG_LEVEL`: simple level (error, warn, info, debug, trace)

use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

const LOG_LEVEL_ENV: &str = "VOLE_LOG_LEVEL";

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to EnvFilter string
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Print the event target (module path) with each line.
    pub with_target: bool,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    /// Level from `VOLE_LOG_LEVEL`, falling back to the default.
    pub fn from_env() -> Self {
        let level = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|s| LogLevel::from_str(&s))
            .unwrap_or_default();
        Self::new().with_level(level)
    }
}

/// Per-session configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Verbose diagnostics for this session's graph only.
    pub debug: bool,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Install the subscriber using `VOLE_LOG_LEVEL` (or `RUST_LOG`).
pub fn init_logging_default() {
    init_logging(&LoggingConfig::from_env());
}

/// Install the subscriber with `config`. Idempotent.
pub fn init_logging(config: &LoggingConfig) {
    TRACING_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter_str()));
        let layer = fmt::layer().with_target(config.with_target);
        // another subscriber may already be installed by the host application
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

/// Turn on process-wide debug mode.
///
/// Installs a `debug` level subscriber unless one is already installed,
/// and makes every session prepared afterwards request engine diagnostics.
/// There is no way back: debug mode stays on for the life of the process.
pub fn set_debug_mode() {
    DEBUG_MODE.store(true, Ordering::Relaxed);
    init_logging(&LoggingConfig::new().with_level(LogLevel::Debug));
    tracing::debug!("debug mode enabled");
}

/// Whether [`set_debug_mode`] has been called.
pub fn debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

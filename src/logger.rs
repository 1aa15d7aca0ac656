//! Centralized logging configuration for applications built on lmsolve
//!
//! The solver itself only emits `tracing` events; this module installs a
//! subscriber with a consistent format and a default INFO level.

use tracing::Level;

/// Initialize the tracing subscriber with lmsolve's standard configuration
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// Format includes:
/// - Timestamp (YYYY-MM-DD HH:MM:SS)
/// - Log level (INFO, WARN, ERROR, DEBUG, TRACE)
/// - Module/target path
///
/// # Example
/// ```no_run
/// use lmsolve::init_logger;
///
/// fn main() {
///     init_logger();
///     tracing::info!("Application started");
/// }
/// ```
///
/// # Environment Variables
/// Per-iteration trace lines are emitted at DEBUG level:
/// ```bash
/// RUST_LOG=lmsolve=debug cargo test
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// Only the first call installs a subscriber. Later calls, or a subscriber
/// installed elsewhere, leave the existing one in place and note it at DEBUG.
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
///
/// # Example
/// ```no_run
/// use lmsolve::init_logger_with_level;
/// use tracing::Level;
///
/// fn main() {
///     init_logger_with_level(Level::DEBUG);
///     tracing::debug!("Debug logging enabled");
/// }
/// ```
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();

    if let Err(e) = installed {
        tracing::debug!("Keeping existing tracing subscriber: {}", e);
    }
}

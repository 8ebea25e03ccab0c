use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::AppError;

/// Global crash log directory, set during init.
static CRASH_LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

pub const LOG_FILE_PREFIX: &str = "mplus-ledger.log";

/// Initialize tracing with stdout, rolling JSON file and Sentry layers.
///
/// - Stdout: compact, human-readable
/// - File: one JSON object per line under `log_dir`, rotated daily
/// - Sentry: ERROR events become issues, WARN become breadcrumbs
/// - Default level: INFO (DEBUG for this crate), override via RUST_LOG
///
/// The returned guard flushes the file writer on drop; hold it for the
/// lifetime of the process.
pub fn init(log_dir: &Path) -> Result<WorkerGuard, AppError> {
    std::fs::create_dir_all(log_dir)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mplus_ledger=debug"));

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX));
    let file_layer = fmt::layer()
        .json()
        .with_current_span(false)
        .with_writer(file_writer);

    // No-op when Sentry DSN is not configured.
    let sentry_layer = sentry_tracing::layer().event_filter(|meta| match *meta.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .with(sentry_layer)
        .try_init()
        .map_err(|e| AppError::Internal(format!("tracing already initialized: {e}")))?;

    tracing::debug!(log_dir = %log_dir.display(), "Tracing initialized");
    Ok(guard)
}

/// Install a panic hook that writes a crash report under
/// `<data_dir>/crash_logs` before handing off to the previous hook.
pub fn install_crash_hook(data_dir: &Path) {
    let crash_dir = data_dir.join("crash_logs");
    if let Err(e) = std::fs::create_dir_all(&crash_dir) {
        tracing::warn!("Cannot create crash log directory: {}", e);
        return;
    }
    CRASH_LOG_DIR.set(crash_dir).ok();

    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(dir) = CRASH_LOG_DIR.get() {
            let path = dir.join(format!("crash_{}.log", chrono::Utc::now().format("%Y%m%d_%H%M%S")));
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<unknown payload>".into());
            let report = crash_report(
                &message,
                info.location().map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
                &std::backtrace::Backtrace::force_capture().to_string(),
            );

            if std::fs::write(&path, report).is_ok() {
                eprintln!("[CRASH] Report written to: {}", path.display());
            }
        }
        prev_hook(info);
    }));

    tracing::info!("Crash hook installed");
}

fn crash_report(message: &str, location: Option<String>, backtrace: &str) -> String {
    let thread = std::thread::current();
    format!(
        "=== MPLUS LEDGER CRASH REPORT ===\n\
         Time: {}\n\
         Version: {}\n\n\
         Panic: {}\n\
         Location: {}\n\n\
         Backtrace:\n{}\n\n\
         Thread: {:?}\n",
        chrono::Utc::now().to_rfc3339(),
        env!("CARGO_PKG_VERSION"),
        message,
        location.as_deref().unwrap_or("<unknown>"),
        backtrace,
        thread.name(),
    )
}

//! # Loggers
//!
//! fern-based setup for the `log` facade: one line per record on stdout and,
//! when a directory is given, a timestamped file per run. Older files of the
//! same application are pruned so the directory never grows unbounded.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Log files of one application kept after pruning, the new run's included.
pub const KEEP_LOG_FILES: usize = 5;

/// Failures while installing the logger.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Creating the directory or a file failed.
    #[error("Log file error: {0}")]
    Io(#[from] std::io::Error),

    /// A global logger is already installed.
    #[error("Logger already installed: {0}")]
    AlreadySet(#[from] log::SetLoggerError),
}

/// Maps a level name to a filter. Unknown names fall back to `Info`.
pub fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => log::LevelFilter::Off,
        "error" => log::LevelFilter::Error,
        "warn" | "warning" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}

/// Installs the global logger for `app_name`.
///
/// With `log_dir`, records also go to `<log_dir>/<app_name>_<timestamp>.log`.
/// Returns the path of that file.
pub fn setup_logging(
    app_name: &str,
    log_dir: Option<&Path>,
    level: &str,
) -> Result<Option<PathBuf>, LoggingError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(level))
        .chain(std::io::stdout());

    let mut log_path = None;
    if let Some(dir) = log_dir {
        fs::create_dir_all(dir)?;
        cleanup_old_logs(dir, app_name, KEEP_LOG_FILES.saturating_sub(1))?;

        let file_name = format!(
            "{}_{}.log",
            app_name,
            chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let path = dir.join(file_name);
        dispatch = dispatch.chain(fern::log_file(&path)?);
        log_path = Some(path);
    }

    dispatch.apply()?;
    Ok(log_path)
}

/// Deletes all but the `keep` newest `<app_name>_*.log` files in `log_dir`.
/// Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> Result<usize, LoggingError> {
    let prefix = format!("{}_", app_name);
    let mut entries: Vec<(std::time::SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .filter_map(|p| {
            let modified = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .collect();

    // Newest first; names carry the timestamp, so they break ties.
    entries.sort_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

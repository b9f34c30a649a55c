//! tracing-subscriber setup. [`init`] runs once, after the CLI and config
//! have settled on a level.

use std::fs::{File, OpenOptions};
use std::path::Path;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::AppError;

/// Install the global subscriber.
///
/// `level` is a plain level (`"warn"`, `"debug"`, ...) or any `EnvFilter`
/// directive, e.g. `"persona_bot=debug,reqwest=warn"`. It has already been
/// resolved from `-v`, `PERSONA_LOG_LEVEL` and the config file, in that
/// order. `RUST_LOG` is only consulted when `level` does not parse.
///
/// With `log_file` set, output is appended there (no ANSI colours) instead of
/// going to stderr.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<(), AppError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(level, rust_log.as_deref())?;
    let writer = match log_file {
        Some(path) => BoxMakeWriter::new(open_log_file(path)?),
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .with_target(false)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

fn build_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter, AppError> {
    EnvFilter::try_new(level).or_else(|e| {
        rust_log
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .ok_or_else(|| AppError::Logger(format!("invalid log level '{level}': {e}")))
    })
}

fn open_log_file(path: &Path) -> Result<File, AppError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| AppError::Logger(format!("cannot create log dir {}: {e}", dir.display())))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::Logger(format!("cannot open log file {}: {e}", path.display())))
}

pub fn level_for_verbosity(verbosity: u8) -> Option<&'static str> {
    match verbosity {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_and_directives_parse() {
        assert!(build_filter("debug", None).is_ok());
        assert!(build_filter("persona_bot=trace,reqwest=warn", None).is_ok());
    }

    #[test]
    fn configured_level_beats_rust_log() {
        let filter = build_filter("warn", Some("trace")).unwrap();
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn rust_log_only_covers_an_invalid_level() {
        let filter = build_filter("persona_bot=loud", Some("debug")).unwrap();
        assert_eq!(filter.to_string(), "debug");
        let err = build_filter("persona_bot=loud", None).unwrap_err();
        assert!(matches!(err, AppError::Logger(ref m) if m.contains("invalid log level")), "{err}");
    }

    #[test]
    fn verbosity_tiers() {
        assert_eq!(level_for_verbosity(0), None);
        assert_eq!(level_for_verbosity(1), Some("info"));
        assert_eq!(level_for_verbosity(2), Some("debug"));
        assert_eq!(level_for_verbosity(9), Some("trace"));
    }

    #[test]
    fn log_file_parent_is_created() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs").join("bot.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn init_twice_reports_existing_subscriber() {
        // Another test may have installed one already; either way the second call fails.
        let _ = init("info", None);
        match init("info", None) {
            Err(AppError::Logger(msg)) => assert!(msg.contains("set subscriber"), "{msg}"),
            other => panic!("expected an error on the second init, got {other:?}"),
        }
    }
}

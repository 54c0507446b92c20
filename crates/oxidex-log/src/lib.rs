//! Terminal logging backend for the `OxideX` project.
//!
//! Library crates in the workspace log through the [`log`] facade
//! (`log::debug!`, `log::warn!`, ...). This crate provides the backend that
//! binaries and test harnesses install: colored `[LEVEL] target: message`
//! lines, a runtime-adjustable maximum level, and level parsing from strings
//! and environment variables.
//!
//! # Example
//!
//! ```
//! use log::LevelFilter;
//!
//! // Install once; later calls are ignored.
//! oxidex_log::try_init(LevelFilter::Debug);
//!
//! log::info!("bridge ready");
//! log::debug!("classes imported: {}", 3);
//! ```

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fmt::Arguments;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Environment variable read by [`init_from_env`] when no name is given.
pub const DEFAULT_ENV_VAR: &str = "OXIDEX_LOG";

const RESET: &str = "\x1b[0m";

/// Returns the ANSI color code for a log level.
const fn color_code(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31m", // Red
        Level::Warn => "\x1b[33m",  // Yellow
        Level::Info => "\x1b[32m",  // Green
        Level::Debug => "\x1b[36m", // Cyan
        Level::Trace => "\x1b[35m", // Magenta
    }
}

/// Parses a level name into a [`LevelFilter`].
///
/// Matching is case-insensitive and accepts `off` in addition to the five
/// level names.
///
/// # Example
///
/// ```
/// use log::LevelFilter;
/// use oxidex_log::parse_level;
///
/// assert_eq!(parse_level("debug"), Ok(LevelFilter::Debug));
/// assert_eq!(parse_level("WARN"), Ok(LevelFilter::Warn));
/// assert!(parse_level("loud").is_err());
/// ```
pub fn parse_level(s: &str) -> Result<LevelFilter, String> {
    match s.trim().to_uppercase().as_str() {
        "OFF" => Ok(LevelFilter::Off),
        "ERROR" => Ok(LevelFilter::Error),
        "WARN" => Ok(LevelFilter::Warn),
        "INFO" => Ok(LevelFilter::Info),
        "DEBUG" => Ok(LevelFilter::Debug),
        "TRACE" => Ok(LevelFilter::Trace),
        _ => Err(format!("Invalid log level: {s}")),
    }
}

/// Formats one log line the way [`TerminalLogger`] prints it.
pub fn format_line(level: Level, target: &str, args: &Arguments<'_>) -> String {
    let color = color_code(level);
    format!("{color}[{level}]{RESET} {target}: {args}")
}

/// The terminal logger.
///
/// The maximum level is kept in an atomic so it can be changed after the
/// logger has been installed with [`set_level`].
pub struct TerminalLogger {
    level: AtomicUsize,
}

impl TerminalLogger {
    const fn new(level: LevelFilter) -> Self {
        TerminalLogger {
            level: AtomicUsize::new(level as usize),
        }
    }

    /// Returns the current maximum level.
    pub fn level(&self) -> LevelFilter {
        match self.level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn set_level(&self, level: LevelFilter) {
        self.level.store(level as usize, Ordering::SeqCst);
    }
}

impl Log for TerminalLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        println!(
            "{}",
            format_line(record.level(), record.target(), record.args())
        );
    }

    fn flush(&self) {}
}

static LOGGER: TerminalLogger = TerminalLogger::new(LevelFilter::Info);

/// Installs the terminal logger with the given maximum level.
///
/// # Errors
///
/// Returns [`SetLoggerError`] if another logger is already installed.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    set_level(level);
    Ok(())
}

/// Installs the terminal logger, ignoring an already-installed logger.
///
/// Intended for test harnesses where every test calls it.
pub fn try_init(level: LevelFilter) {
    if init(level).is_err() {
        set_level(level);
    }
}

/// Installs the terminal logger with the level named by an environment
/// variable, falling back to `Info` when the variable is unset or invalid.
///
/// # Errors
///
/// Returns [`SetLoggerError`] if another logger is already installed.
pub fn init_from_env(var: Option<&str>) -> Result<(), SetLoggerError> {
    let level = std::env::var(var.unwrap_or(DEFAULT_ENV_VAR))
        .ok()
        .and_then(|value| parse_level(&value).ok())
        .unwrap_or(LevelFilter::Info);
    init(level)
}

/// Changes the maximum level of the installed logger.
pub fn set_level(level: LevelFilter) {
    LOGGER.set_level(level);
    log::set_max_level(level);
}

/// Returns the terminal logger instance.
pub fn logger() -> &'static TerminalLogger {
    &LOGGER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error"), Ok(LevelFilter::Error));
        assert_eq!(parse_level("WARN"), Ok(LevelFilter::Warn));
        assert_eq!(parse_level("Info"), Ok(LevelFilter::Info));
        assert_eq!(parse_level(" debug "), Ok(LevelFilter::Debug));
        assert_eq!(parse_level("trace"), Ok(LevelFilter::Trace));
        assert_eq!(parse_level("off"), Ok(LevelFilter::Off));
        assert!(parse_level("invalid").is_err());
    }

    #[test]
    fn test_format_line() {
        let line = format_line(
            Level::Warn,
            "oxidex_bridge::registry",
            &format_args!("guessed {}", "v@:@"),
        );
        assert!(line.starts_with("\x1b[33m[WARN]"));
        assert!(line.ends_with("oxidex_bridge::registry: guessed v@:@"));
    }

    #[test]
    fn test_level_filtering() {
        let logger = TerminalLogger::new(LevelFilter::Info);
        let info = Metadata::builder().level(Level::Info).build();
        let debug = Metadata::builder().level(Level::Debug).build();

        assert!(logger.enabled(&info));
        assert!(!logger.enabled(&debug));

        logger.set_level(LevelFilter::Trace);
        assert!(logger.enabled(&debug));

        logger.set_level(LevelFilter::Off);
        assert!(!logger.enabled(&info));
    }

    #[test]
    fn test_try_init_is_idempotent() {
        try_init(LevelFilter::Debug);
        try_init(LevelFilter::Warn);
        assert_eq!(logger().level(), LevelFilter::Warn);
        log::warn!("logged through the facade");
    }
}
